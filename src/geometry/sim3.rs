//! Sim3: 7-DOF similarity transformation (rotation + translation + scale).
//!
//! The reconstruction transforms are all expressed as Sim3: a pure metric
//! rescale is `Sim3::scaling(s)`, a marker normalization is rigid (scale 1),
//! and the two can be composed into one transform.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use super::SE3;

/// Similarity transformation. Transforms points as: p' = s * R * p + t.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sim3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Sim3 {
    /// Identity transformation (no rotation, no translation, scale = 1).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Isotropic scaling about the world origin.
    pub fn scaling(scale: f64) -> Self {
        Self {
            scale,
            ..Self::identity()
        }
    }

    /// Construct from rotation matrix, translation, and scale.
    pub fn from_rts(rotation: Matrix3<f64>, translation: Vector3<f64>, scale: f64) -> Self {
        let rot3 = Rotation3::from_matrix(&rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
            scale,
        }
    }

    /// Construct from SE3 with scale = 1.0.
    pub fn from_se3(se3: &SE3) -> Self {
        Self {
            rotation: se3.rotation,
            translation: se3.translation,
            scale: 1.0,
        }
    }

    /// Construct from homogeneous 4x4 matrix of form [s*R | t; 0 | 1].
    ///
    /// The scale is extracted from the rotation block's first column norm.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let sr_block = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = Vector3::new(mat[(0, 3)], mat[(1, 3)], mat[(2, 3)]);

        // Assumes uniform scaling
        let scale = sr_block.column(0).norm();

        let rotation_mat = if scale > 1e-10 {
            sr_block / scale
        } else {
            Matrix3::identity()
        };

        Self::from_rts(rotation_mat, translation, scale)
    }

    /// Convert to homogeneous 4x4 matrix of form [s*R | t; 0 0 0 1].
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.scaled_rotation_matrix());
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Inverse transformation.
    ///
    /// For Sim3: S = [sR | t; 0 | 1]
    /// Inverse: S^{-1} = [(1/s)R^T | -(1/s)R^T*t; 0 | 1]
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        let scale_inv = 1.0 / self.scale;
        let t_inv = -(rot_inv * self.translation) * scale_inv;
        Self {
            rotation: rot_inv,
            translation: t_inv,
            scale: scale_inv,
        }
    }

    /// Compose two Sim3 transforms: self ∘ other.
    ///
    /// For S1 = [s1*R1 | t1] and S2 = [s2*R2 | t2]:
    /// S1 ∘ S2 = [s1*s2*R1*R2 | s1*R1*t2 + t1]
    pub fn compose(&self, other: &Sim3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.scale * (self.rotation * other.translation) + self.translation,
            scale: self.scale * other.scale,
        }
    }

    /// Transform a single point: p' = s * R * p + t.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.scale * (self.rotation * p) + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Get the scaled rotation matrix (s * R).
    pub fn scaled_rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation_matrix() * self.scale
    }

    /// Re-express a world-to-camera pose in the world frame this transform maps into.
    ///
    /// With x' = S(x), the camera frame is rescaled by the same factor so the
    /// pose stays rigid: T_cw' = s * (T_cw ∘ S^{-1}), giving
    /// R' = R_cw * R^T and t' = s * t_cw - R_cw * R^T * t.
    pub fn transform_pose(&self, pose_cw: &SE3) -> SE3 {
        let moved = Sim3::from_se3(pose_cw).compose(&self.inverse());
        SE3 {
            rotation: moved.rotation,
            translation: moved.translation * self.scale,
        }
    }
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}
