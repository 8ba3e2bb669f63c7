//! Camera intrinsics and the per-image view geometry the localizer consumes.

use std::path::PathBuf;

use anyhow::{Result, bail};
use nalgebra::{Matrix3, Vector3};

use crate::geometry::SE3;

/// Pinhole projection parameters extracted from a calibrated camera.
///
/// Lens distortion is not modeled: detected corners are unprojected through
/// K^-1 only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn from_k(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    /// Camera matrix K.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Closed-form K^-1 (K is upper triangular with unit last row).
    pub fn k_inv(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Back-project a pixel to a camera-frame direction on the z = 1 plane.
    pub fn unproject(&self, u: f64, v: f64) -> Vector3<f64> {
        Vector3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0)
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<(f64, f64)> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some((
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }
}

/// A calibrated camera in a reconstruction, as stored by COLMAP.
///
/// The raw parameter vector is kept verbatim so the camera can be written
/// back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    pub id: u32,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

impl CameraModel {
    /// Pinhole part of the camera parameters.
    ///
    /// Single-focal models (`SIMPLE_*`, `RADIAL*`) start with `f, cx, cy`;
    /// the rest start with `fx, fy, cx, cy`.
    pub fn intrinsics(&self) -> Result<Intrinsics> {
        let p = &self.params;
        let needed = match self.model.as_str() {
            "SIMPLE_PINHOLE" | "SIMPLE_RADIAL" | "RADIAL" | "SIMPLE_RADIAL_FISHEYE"
            | "RADIAL_FISHEYE" => 3,
            "PINHOLE" | "OPENCV" | "FULL_OPENCV" | "OPENCV_FISHEYE" | "FOV"
            | "THIN_PRISM_FISHEYE" => 4,
            other => bail!("Unsupported camera model {other} for camera {}", self.id),
        };
        if p.len() < needed {
            bail!(
                "Camera {} ({}) has {} parameters, expected at least {}",
                self.id,
                self.model,
                p.len(),
                needed
            );
        }

        Ok(if needed == 3 {
            Intrinsics::new(p[0], p[0], p[1], p[2])
        } else {
            Intrinsics::new(p[0], p[1], p[2], p[3])
        })
    }
}

/// Everything the detection stage and the ray caster need about one image.
///
/// Built from a reconstruction but holds no reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub image_id: u32,
    pub image_path: PathBuf,
    /// World-to-camera transform T_cw.
    pub pose: SE3,
    pub intrinsics: Intrinsics,
    /// Calibrated image resolution the intrinsics refer to.
    pub width: u32,
    pub height: u32,
}

impl View {
    /// Camera center in world coordinates.
    pub fn center(&self) -> Vector3<f64> {
        self.pose.center()
    }

    /// Project a world point into this view (pixels).
    pub fn project(&self, p_world: &Vector3<f64>) -> Option<(f64, f64)> {
        self.intrinsics.project(&self.pose.transform_point(p_world))
    }
}
