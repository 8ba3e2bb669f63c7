//! Geometry utilities: rigid and similarity transforms, rays, rotation fitting.

pub mod alignment;
pub mod lines;
pub mod se3;
pub mod sim3;

pub use alignment::align_rotation;
pub use lines::{DEFAULT_MAX_CONDITION, LineIntersection, Ray, intersect_lines};
pub use se3::SE3;
pub use sim3::Sim3;

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::error::{LocalizerError, Result};

/// |w| at or below this is treated as a point at infinity.
const MIN_HOMOGENEOUS_W: f64 = 1e-12;

/// Transform a 3D point by a 4x4 homogeneous matrix.
///
/// The point is lifted to [x, y, z, 1], multiplied, and divided by the
/// resulting w. Rigid and similarity transforms keep w = 1; anything that
/// sends w to zero is rejected rather than producing infinities.
pub fn transform_point_homogeneous(mat: &Matrix4<f64>, p: &Vector3<f64>) -> Result<Vector3<f64>> {
    let h = mat * Vector4::new(p.x, p.y, p.z, 1.0);
    if h.w.abs() <= MIN_HOMOGENEOUS_W {
        return Err(LocalizerError::ZeroHomogeneousW);
    }
    Ok(h.xyz() / h.w)
}
