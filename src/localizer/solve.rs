//! Per-corner 3D position from the ray bundles.

use std::panic;
use std::thread;

use super::RayBundles;
use crate::error::{LocalizerError, Result};
use crate::geometry::{LineIntersection, intersect_lines};

/// Intersect the four corner bundles, one scoped thread per corner.
///
/// Every corner needs rays from at least two views; the first corner short
/// of that fails the whole solve with [`LocalizerError::InsufficientObservations`].
pub fn solve_corners(bundles: &RayBundles, max_condition: f64) -> Result<[LineIntersection; 4]> {
    for (corner, rays) in bundles.corners.iter().enumerate() {
        if rays.len() < 2 {
            return Err(LocalizerError::InsufficientObservations {
                corner,
                observed: rays.len(),
            });
        }
    }

    let results = thread::scope(|scope| {
        let handles: [_; 4] = std::array::from_fn(|i| {
            let rays = &bundles.corners[i];
            scope.spawn(move || intersect_lines(rays, max_condition))
        });
        handles.map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
    });

    let [c0, c1, c2, c3] = results;
    Ok([c0?, c1?, c2?, c3?])
}
