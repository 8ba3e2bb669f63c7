//! Synthetic scenes: cameras on a ring looking at a flat marker, and a
//! detector that reports the exact projections of known marker corners.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use aruco_estimator::camera::{Intrinsics, View};
use aruco_estimator::detection::{DetectorOutput, MarkerDetector, MarkerId, MarkerObservation};
use aruco_estimator::error::{LocalizerError, Result};
use aruco_estimator::geometry::SE3;
use nalgebra::{Matrix3, Point2, Rotation3, Vector2, Vector3};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

pub fn intrinsics() -> Intrinsics {
    Intrinsics::new(800.0, 800.0, 320.0, 240.0)
}

/// Camera at `center` looking at `target`, world z roughly up.
pub fn look_at(
    image_id: u32,
    center: Vector3<f64>,
    target: Vector3<f64>,
    image_path: PathBuf,
) -> View {
    let z = (target - center).normalize();
    let x = z.cross(&Vector3::z()).normalize();
    let y = z.cross(&x);
    let r_cw = Matrix3::from_columns(&[x, y, z]).transpose();

    View {
        image_id,
        image_path,
        pose: SE3::from_rt(r_cw, -r_cw * center),
        intrinsics: intrinsics(),
        width: WIDTH,
        height: HEIGHT,
    }
}

/// `n` cameras on a ring of radius 2 at height 1.5 around the origin.
pub fn ring_views(n: usize, images_dir: &Path) -> Vec<View> {
    (0..n)
        .map(|i| {
            let a = i as f64 * 2.0 * std::f64::consts::PI / n as f64;
            let center = Vector3::new(2.0 * a.cos(), 2.0 * a.sin(), 1.5);
            look_at(
                i as u32 + 1,
                center,
                Vector3::zeros(),
                images_dir.join(format!("frame_{:03}.jpg", i + 1)),
            )
        })
        .collect()
}

/// Square marker of edge `size` lying on the z = 0 plane, rotated about z
/// and shifted off the origin.
pub fn marker_corners(size: f64) -> [Vector3<f64>; 4] {
    let h = size / 2.0;
    let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.4);
    let offset = Vector3::new(0.3, -0.2, 0.0);
    [
        Vector3::new(-h, h, 0.0),
        Vector3::new(h, h, 0.0),
        Vector3::new(h, -h, 0.0),
        Vector3::new(-h, -h, 0.0),
    ]
    .map(|c| rot * c + offset)
}

/// Detector that projects known 3D markers into the matching view.
pub struct ProjectingDetector {
    pub views: Vec<View>,
    pub markers: Vec<(MarkerId, [Vector3<f64>; 4])>,
    /// Resolution factor of the "processed" image the corners refer to.
    pub downscale: f64,
    /// Start the reported corner list at this corner.
    pub corner_shift: usize,
    /// Pixel offsets per view and corner, added before downscaling.
    pub noise: Vec<[Vector2<f64>; 4]>,
}

impl ProjectingDetector {
    pub fn new(views: Vec<View>, markers: Vec<(MarkerId, [Vector3<f64>; 4])>) -> Self {
        Self {
            views,
            markers,
            downscale: 1.0,
            corner_shift: 0,
            noise: Vec::new(),
        }
    }
}

impl MarkerDetector for ProjectingDetector {
    fn detect(&self, image_path: &Path) -> Result<DetectorOutput> {
        let (idx, view) = self
            .views
            .iter()
            .enumerate()
            .find(|(_, v)| v.image_path == image_path)
            .ok_or_else(|| LocalizerError::Detection {
                image: image_path.to_path_buf(),
                message: "unknown image".to_string(),
            })?;

        let mut markers = Vec::new();
        for (id, corners) in &self.markers {
            let mut pixels = [Point2::origin(); 4];
            let mut visible = true;
            for (k, c) in corners.iter().enumerate() {
                match view.project(c) {
                    Some((u, v)) => {
                        let offset = self.noise.get(idx).map_or(Vector2::zeros(), |n| n[k]);
                        pixels[k] = Point2::new(
                            (u + offset.x) * self.downscale,
                            (v + offset.y) * self.downscale,
                        );
                    }
                    None => visible = false,
                }
            }
            if visible {
                pixels.rotate_left(self.corner_shift % 4);
                markers.push(MarkerObservation {
                    id: *id,
                    corners: pixels,
                });
            }
        }

        Ok(DetectorOutput {
            markers,
            processed_width: (WIDTH as f64 * self.downscale).round() as u32,
            processed_height: (HEIGHT as f64 * self.downscale).round() as u32,
        })
    }
}
