//! Least-squares rotation fitting (orthogonal Procrustes / Kabsch).

use nalgebra::{Matrix3, Vector3};

/// Find the proper rotation R minimizing sum ||target_i - R * source_i||².
///
/// Algorithm:
/// 1. Cross-covariance H = sum(source_i * target_i^T)
/// 2. SVD: H = U * S * V^T
/// 3. R = V * U^T, flipping the last singular direction if det(R) = -1
///
/// The vectors are used as-is (no centering): callers pass directions, not
/// point sets. Returns `None` when fewer than two pairs are given, the counts
/// differ, or the SVD fails.
pub fn align_rotation(source: &[Vector3<f64>], target: &[Vector3<f64>]) -> Option<Matrix3<f64>> {
    if source.len() < 2 || source.len() != target.len() {
        return None;
    }

    let mut h = Matrix3::zeros();
    for (s, t) in source.iter().zip(target.iter()) {
        h += s * t.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation = v_t.transpose() * u.transpose();

    // Handle reflection case (det(R) = -1)
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation = v * u.transpose();
    }

    Some(rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit};

    #[test]
    fn test_recovers_known_rotation() {
        let rot = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::new(1.0, 2.0, -0.5)),
            1.1,
        )
        .into_inner();

        let source = vec![Vector3::x(), Vector3::y(), Vector3::z()];
        let target: Vec<_> = source.iter().map(|v| rot * v).collect();

        let estimated = align_rotation(&source, &target).unwrap();
        assert_relative_eq!(estimated, rot, epsilon = 1e-10);
    }

    #[test]
    fn test_result_is_proper_rotation() {
        // Left-handed target set: best fit must still have det = +1
        let source = vec![Vector3::x(), Vector3::y(), Vector3::z()];
        let target = vec![Vector3::x(), Vector3::y(), -Vector3::z()];

        let estimated = align_rotation(&source, &target).unwrap();
        assert_relative_eq!(estimated.determinant(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(
            estimated * estimated.transpose(),
            Matrix3::identity(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let source = vec![Vector3::x(), Vector3::y()];
        let target = vec![Vector3::x()];

        assert!(align_rotation(&source, &target).is_none());
    }
}
