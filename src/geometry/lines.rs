//! 3D rays and least-squares intersection of many lines.
//!
//! For a line through `o` with unit direction `d`, the projector
//! P = I - d * d^T maps any vector onto the plane orthogonal to the line, so
//! ||P * (x - o)||² is the squared perpendicular distance of `x` to the line.
//! Summing over all lines and setting the gradient to zero gives the normal
//! equations
//!
//! ```text
//! (sum P_i) x = sum P_i o_i
//! ```
//!
//! which are solved through an SVD so that a (near) singular system, e.g. all
//! rays parallel, still yields the minimum-norm least-squares point.

use nalgebra::{Matrix3, Vector3};
use tracing::warn;

use crate::error::{LocalizerError, Result};

/// Singular values below this (relative to the largest) are treated as zero
/// by the pseudo-inverse.
const PSEUDO_INVERSE_EPS: f64 = 1e-12;

/// Default condition number above which an intersection is flagged.
pub const DEFAULT_MAX_CONDITION: f64 = 1e8;

/// A ray with a unit-length direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f64>,
    pub direction: Vector3<f64>,
}

impl Ray {
    /// Build a ray, normalizing `direction`.
    ///
    /// Returns `None` for a zero-length direction.
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>) -> Option<Self> {
        let direction = direction.try_normalize(f64::EPSILON)?;
        Some(Self { origin, direction })
    }

    /// Perpendicular distance from `point` to the (infinite) line.
    pub fn distance_to(&self, point: &Vector3<f64>) -> f64 {
        let v = point - self.origin;
        (v - self.direction * self.direction.dot(&v)).norm()
    }

    /// Orthogonal-complement projector I - d * d^T.
    pub fn projector(&self) -> Matrix3<f64> {
        Matrix3::identity() - self.direction * self.direction.transpose()
    }
}

/// Outcome of a least-squares line intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineIntersection {
    pub point: Vector3<f64>,
    /// Ratio of largest to smallest singular value of the normal matrix.
    pub condition_number: f64,
    /// RMS perpendicular distance of `point` to the input lines.
    pub rms_distance: f64,
    pub num_rays: usize,
    /// Set when `condition_number` exceeds the threshold the solve was run with.
    pub ill_conditioned: bool,
}

/// Least-squares intersection of `rays`, flagging results whose normal matrix
/// has a condition number above `max_condition`.
///
/// Precondition: at least two rays. A single line does not determine a point,
/// so `rays.len() < 2` is rejected with [`LocalizerError::TooFewRays`].
/// Parallel or nearly parallel bundles are not an error; the minimum-norm
/// solution is returned with `ill_conditioned` set and a warning is logged.
pub fn intersect_lines(rays: &[Ray], max_condition: f64) -> Result<LineIntersection> {
    if rays.len() < 2 {
        return Err(LocalizerError::TooFewRays(rays.len()));
    }

    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for ray in rays {
        let p = ray.projector();
        a += p;
        b += p * ray.origin;
    }

    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    let condition_number = if sigma_min > 0.0 {
        sigma_max / sigma_min
    } else {
        f64::INFINITY
    };

    // Pseudo-inverse solve. Only fails if U/V were not computed, which they are.
    let point = svd
        .solve(&b, sigma_max * PSEUDO_INVERSE_EPS)
        .unwrap_or_else(|_| Vector3::zeros());

    let sum_sq: f64 = rays.iter().map(|r| r.distance_to(&point).powi(2)).sum();
    let rms_distance = (sum_sq / rays.len() as f64).sqrt();

    let ill_conditioned = condition_number > max_condition;
    if ill_conditioned {
        warn!(
            "Line intersection of {} rays is ill-conditioned (cond = {:.3e}); rays are nearly parallel",
            rays.len(),
            condition_number
        );
    }

    Ok(LineIntersection {
        point,
        condition_number,
        rms_distance,
        num_rays: rays.len(),
        ill_conditioned,
    })
}
