//! Back-projection of detected marker corners into world-space rays.

use tracing::warn;

use crate::camera::View;
use crate::detection::{Corners, DetectionResult, MarkerId};
use crate::geometry::Ray;

/// Cast one world ray per corner from a view.
///
/// The origin is the camera center C = -R^T t, the direction
/// R^T K^-1 [u, v, 1]^T normalized. Returns `None` if a direction degenerates.
pub fn cast_rays(view: &View, corners: &Corners) -> Option<[Ray; 4]> {
    let origin = view.center();
    let r_wc = view.pose.rotation.inverse();

    let mut rays = [None; 4];
    for (slot, corner) in rays.iter_mut().zip(corners) {
        let dir_cam = view.intrinsics.k_inv() * corner.to_homogeneous();
        *slot = Ray::new(origin, r_wc * dir_cam);
    }
    let [a, b, c, d] = rays;
    Some([a?, b?, c?, d?])
}

/// Rays grouped by corner index across every view that saw the marker.
///
/// `corners[k][j]` and `corners[m][j]` always come from the same view,
/// `views[image_indices[j]]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RayBundles {
    pub corners: [Vec<Ray>; 4],
    pub image_indices: Vec<usize>,
}

impl RayBundles {
    /// Collect rays for the corners retained by the detection stage.
    pub fn from_detections(views: &[View], detection: &DetectionResult) -> Self {
        Self::collect(
            views,
            detection
                .detections
                .iter()
                .enumerate()
                .filter_map(|(i, d)| d.corners.as_ref().map(|c| (i, c))),
        )
    }

    /// Collect rays for one marker id, whether or not it won the vote.
    pub fn for_marker(views: &[View], detection: &DetectionResult, id: MarkerId) -> Self {
        Self::collect(
            views,
            detection
                .detections
                .iter()
                .enumerate()
                .filter_map(|(i, d)| d.observation(id).map(|m| (i, &m.corners))),
        )
    }

    fn collect<'a>(views: &[View], observed: impl Iterator<Item = (usize, &'a Corners)>) -> Self {
        let mut bundles = Self::default();
        for (idx, corners) in observed {
            let Some(view) = views.get(idx) else {
                continue;
            };
            match cast_rays(view, corners) {
                Some(rays) => bundles.push(idx, rays),
                None => warn!("Skipping image {:?}: degenerate corner ray", view.image_path),
            }
        }
        bundles
    }

    pub fn push(&mut self, image_index: usize, rays: [Ray; 4]) {
        for (bundle, ray) in self.corners.iter_mut().zip(rays) {
            bundle.push(ray);
        }
        self.image_indices.push(image_index);
    }

    pub fn num_views(&self) -> usize {
        self.image_indices.len()
    }

    /// Bundles restricted to the first `k` contributing views.
    pub fn truncated(&self, k: usize) -> Self {
        let k = k.min(self.num_views());
        Self {
            corners: std::array::from_fn(|i| self.corners[i][..k].to_vec()),
            image_indices: self.image_indices[..k].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use crate::geometry::SE3;
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Rotation3, Vector3};
    use std::path::PathBuf;

    fn view_looking_at_origin(center: Vector3<f64>) -> View {
        // Camera z-axis points from center to origin
        let z = (-center).normalize();
        let x = Vector3::y().cross(&z).normalize();
        let y = z.cross(&x);
        let r_wc = nalgebra::Matrix3::from_columns(&[x, y, z]);
        let r_cw = r_wc.transpose();
        View {
            image_id: 1,
            image_path: PathBuf::from("a.png"),
            pose: SE3::from_rt(r_cw, -r_cw * center),
            intrinsics: Intrinsics::new(600.0, 600.0, 320.0, 240.0),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_rays_pass_through_projected_points() {
        let view = view_looking_at_origin(Vector3::new(1.0, -0.5, -4.0));
        let points = [
            Vector3::new(0.1, 0.1, 0.0),
            Vector3::new(-0.1, 0.1, 0.0),
            Vector3::new(-0.1, -0.1, 0.2),
            Vector3::new(0.1, -0.1, 0.0),
        ];
        let corners: Corners = points.map(|p| {
            let (u, v) = view.project(&p).unwrap();
            Point2::new(u, v)
        });

        let rays = cast_rays(&view, &corners).unwrap();

        for (ray, p) in rays.iter().zip(&points) {
            assert_relative_eq!(ray.origin, view.center(), epsilon = 1e-12);
            assert_relative_eq!(ray.direction.norm(), 1.0, epsilon = 1e-12);
            assert_relative_eq!(ray.distance_to(p), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_principal_point_ray_is_optical_axis() {
        let rot = Rotation3::from_euler_angles(0.2, -0.3, 0.5).into_inner();
        let view = View {
            pose: SE3::from_rt(rot, Vector3::new(0.3, 0.1, 2.0)),
            ..view_looking_at_origin(Vector3::new(0.0, 0.0, -3.0))
        };
        let c = Point2::new(view.intrinsics.cx, view.intrinsics.cy);

        let rays = cast_rays(&view, &[c; 4]).unwrap();

        // Optical axis in world frame is the third row of R_cw
        let axis = rot.transpose() * Vector3::z();
        assert_relative_eq!(rays[0].direction, axis, epsilon = 1e-12);
    }

    #[test]
    fn test_truncated_keeps_view_alignment() {
        let view = view_looking_at_origin(Vector3::new(0.0, 0.0, -3.0));
        let corners = [Point2::new(300.0, 200.0); 4];
        let rays = cast_rays(&view, &corners).unwrap();

        let mut bundles = RayBundles::default();
        for i in [4, 7, 9] {
            bundles.push(i, rays);
        }

        let first_two = bundles.truncated(2);
        assert_eq!(first_two.num_views(), 2);
        assert_eq!(first_two.image_indices, vec![4, 7]);
        assert!(first_two.corners.iter().all(|b| b.len() == 2));
        assert_eq!(bundles.truncated(10).num_views(), 3);
    }
}
