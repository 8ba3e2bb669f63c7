//! In-memory reconstruction and the transform applier.
//!
//! A [`Reconstruction`] is a sparse COLMAP model plus an optional dense point
//! cloud. Transforms never modify it in place: [`Reconstruction::transformed`]
//! and friends return a new copy and leave the input untouched.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use nalgebra::{Matrix3, Matrix4, Point2, Vector3};

use crate::camera::{CameraModel, View};
use crate::error::{LocalizerError, Result};
use crate::geometry::{SE3, Sim3, transform_point_homogeneous};

/// |det| of the linear block below which a matrix counts as singular.
const MIN_DETERMINANT: f64 = 1e-12;
/// |w| at or below this cannot be divided out of a matrix.
const MIN_HOMOGENEOUS_W: f64 = 1e-12;
/// Relative tolerance for the similarity check on a 4x4 matrix.
const SIMILARITY_TOLERANCE: f64 = 1e-6;

/// One 2D keypoint of a registered image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub xy: Point2<f64>,
    /// Triangulated point this keypoint observes, if any.
    pub point3d_id: Option<u64>,
}

/// A registered image of the sparse model.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: u32,
    /// World-to-camera transform T_cw.
    pub pose: SE3,
    pub camera_id: u32,
    pub name: String,
    pub keypoints: Vec<Keypoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackElement {
    pub image_id: u32,
    pub keypoint_idx: u32,
}

/// A triangulated sparse point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3D {
    pub id: u64,
    pub xyz: Vector3<f64>,
    pub rgb: [u8; 3],
    /// Mean reprojection error in pixels, unaffected by world transforms.
    pub error: f64,
    pub track: Vec<TrackElement>,
}

/// Dense point cloud, optionally colored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub points: Vec<Vector3<f64>>,
    /// Same length as `points` when present.
    pub colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconstruction {
    pub cameras: BTreeMap<u32, CameraModel>,
    pub images: BTreeMap<u32, ImageRecord>,
    pub points3d: BTreeMap<u64, Point3D>,
    pub dense: Option<PointCloud>,
}

impl Reconstruction {
    /// Views of every registered image, ordered by image id.
    ///
    /// Image paths are `images_dir/name`.
    pub fn views(&self, images_dir: &Path) -> anyhow::Result<Vec<View>> {
        self.images
            .values()
            .map(|image| {
                let camera = self.cameras.get(&image.camera_id).with_context(|| {
                    format!(
                        "Image {} references missing camera {}",
                        image.id, image.camera_id
                    )
                })?;
                Ok(View {
                    image_id: image.id,
                    image_path: images_dir.join(&image.name),
                    pose: image.pose,
                    intrinsics: camera.intrinsics()?,
                    width: camera.width,
                    height: camera.height,
                })
            })
            .collect()
    }

    /// Uniformly rescale the world about the origin.
    ///
    /// Camera translations and all points scale by `s`; rotations and
    /// intrinsics are unchanged.
    pub fn scaled(&self, s: f64) -> Result<Self> {
        self.transformed(&Sim3::scaling(s))
    }

    /// Move the world by a rigid normalization transform.
    pub fn normalized(&self, transform: &Sim3) -> Result<Self> {
        self.transformed(transform)
    }

    /// Apply a similarity transform to every pose and point.
    ///
    /// Points go through the homogeneous formula with a w check; poses become
    /// T_cw' = s * (T_cw ∘ S^-1) so the cameras stay rigid and keep seeing
    /// the same points.
    pub fn transformed(&self, transform: &Sim3) -> Result<Self> {
        if !transform.scale.is_finite() || transform.scale.abs() <= MIN_DETERMINANT {
            return Err(LocalizerError::NonInvertibleTransform);
        }
        self.apply(transform, &transform.to_matrix())
    }

    /// Apply a 4x4 matrix `[A | t; 0 0 0 w]` with `A / w = s*R`.
    ///
    /// Points are mapped with the raw matrix, dividing by the resulting w.
    /// Poses use the equivalent similarity `mat / w`. Projective bottom rows
    /// and linear blocks with shear or anisotropic scale are rejected.
    pub fn transformed_by_matrix(&self, mat: &Matrix4<f64>) -> Result<Self> {
        let sim3 = similarity_from_matrix(mat)?;
        self.apply(&sim3, mat)
    }

    fn apply(&self, transform: &Sim3, mat: &Matrix4<f64>) -> Result<Self> {
        let images = self
            .images
            .iter()
            .map(|(&id, image)| {
                let moved = ImageRecord {
                    pose: transform.transform_pose(&image.pose),
                    ..image.clone()
                };
                (id, moved)
            })
            .collect();

        let points3d = self
            .points3d
            .iter()
            .map(|(&id, point)| {
                let xyz = transform_point_homogeneous(mat, &point.xyz)?;
                Ok((id, Point3D { xyz, ..point.clone() }))
            })
            .collect::<Result<_>>()?;

        let dense = self
            .dense
            .as_ref()
            .map(|cloud| transform_cloud(cloud, mat))
            .transpose()?;

        Ok(Self {
            cameras: self.cameras.clone(),
            images,
            points3d,
            dense,
        })
    }

    pub fn camera_centers(&self) -> impl Iterator<Item = (u32, Vector3<f64>)> + '_ {
        self.images.values().map(|image| (image.id, image.pose.center()))
    }
}

/// The similarity a `[A | t; 0 0 0 w]` matrix represents.
fn similarity_from_matrix(mat: &Matrix4<f64>) -> Result<Sim3> {
    if mat.iter().any(|v| !v.is_finite()) {
        return Err(LocalizerError::NonInvertibleTransform);
    }
    let w = mat[(3, 3)];
    if w.abs() <= MIN_HOMOGENEOUS_W {
        return Err(LocalizerError::ZeroHomogeneousW);
    }
    if (0..3).any(|c| mat[(3, c)].abs() > SIMILARITY_TOLERANCE * w.abs()) {
        return Err(LocalizerError::NotASimilarity("bottom row must be [0 0 0 w]"));
    }

    let normalized = mat / w;
    let linear = normalized.fixed_view::<3, 3>(0, 0).into_owned();
    let det = linear.determinant();
    if det.abs() <= MIN_DETERMINANT {
        return Err(LocalizerError::NonInvertibleTransform);
    }
    if det < 0.0 {
        return Err(LocalizerError::NotASimilarity("linear block is a reflection"));
    }
    let s2 = det.powf(2.0 / 3.0);
    let gram = linear.transpose() * linear;
    if (gram - Matrix3::identity() * s2).abs().max() > SIMILARITY_TOLERANCE * s2 {
        return Err(LocalizerError::NotASimilarity("linear block is not s*R"));
    }

    Ok(Sim3::from_matrix(normalized))
}

fn transform_cloud(cloud: &PointCloud, mat: &Matrix4<f64>) -> Result<PointCloud> {
    let points = cloud
        .points
        .iter()
        .map(|p| transform_point_homogeneous(mat, p))
        .collect::<Result<_>>()?;
    Ok(PointCloud {
        points,
        colors: cloud.colors.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit};

    fn sample() -> Reconstruction {
        let camera = CameraModel {
            id: 1,
            model: "PINHOLE".to_string(),
            width: 640,
            height: 480,
            params: vec![500.0, 500.0, 320.0, 240.0],
        };
        let image = |id: u32, t: Vector3<f64>| ImageRecord {
            id,
            pose: SE3::from_rt(
                Rotation3::from_euler_angles(0.1 * id as f64, -0.2, 0.05).into_inner(),
                t,
            ),
            camera_id: 1,
            name: format!("{id:04}.jpg"),
            keypoints: vec![Keypoint {
                xy: Point2::new(10.0, 20.0),
                point3d_id: Some(7),
            }],
        };
        let point = Point3D {
            id: 7,
            xyz: Vector3::new(0.2, -0.1, 4.0),
            rgb: [200, 100, 50],
            error: 0.4,
            track: vec![TrackElement {
                image_id: 1,
                keypoint_idx: 0,
            }],
        };

        Reconstruction {
            cameras: BTreeMap::from([(1, camera)]),
            images: BTreeMap::from([
                (1, image(1, Vector3::new(0.0, 0.0, 1.0))),
                (2, image(2, Vector3::new(0.5, -0.3, 2.0))),
            ]),
            points3d: BTreeMap::from([(7, point)]),
            dense: Some(PointCloud {
                points: vec![Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.0, 2.0)],
                colors: None,
            }),
        }
    }

    fn distance(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        (a - b).norm()
    }

    #[test]
    fn test_scaled_multiplies_distances() {
        let rec = sample();
        let before = rec.clone();

        let scaled = rec.scaled(2.5).unwrap();

        // Input unchanged
        assert_eq!(rec, before);

        let c_before: Vec<_> = rec.camera_centers().map(|(_, c)| c).collect();
        let c_after: Vec<_> = scaled.camera_centers().map(|(_, c)| c).collect();
        assert_relative_eq!(
            distance(&c_after[0], &c_after[1]),
            2.5 * distance(&c_before[0], &c_before[1]),
            epsilon = 1e-10
        );

        let d_before = rec.dense.as_ref().unwrap();
        let d_after = scaled.dense.as_ref().unwrap();
        assert_relative_eq!(
            distance(&d_after.points[0], &d_after.points[1]),
            2.5 * distance(&d_before.points[0], &d_before.points[1]),
            epsilon = 1e-10
        );

        // Rotations and intrinsics untouched
        for (id, image) in &scaled.images {
            assert_relative_eq!(
                image.pose.rotation_matrix(),
                rec.images[id].pose.rotation_matrix(),
                epsilon = 1e-12
            );
        }
        assert_eq!(scaled.cameras, rec.cameras);
    }

    #[test]
    fn test_transform_keeps_projections() {
        let rec = sample();
        let sim3 = Sim3::from_rts(
            Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(1.0, 1.0, 0.0)), 0.8)
                .into_inner(),
            Vector3::new(3.0, -2.0, 1.0),
            0.7,
        );

        let moved = rec.transformed(&sim3).unwrap();

        let views_before = rec.views(Path::new("images")).unwrap();
        let views_after = moved.views(Path::new("images")).unwrap();
        let p_before = rec.points3d[&7].xyz;
        let p_after = moved.points3d[&7].xyz;
        for (vb, va) in views_before.iter().zip(&views_after) {
            let (ub, wb) = vb.project(&p_before).unwrap();
            let (ua, wa) = va.project(&p_after).unwrap();
            assert_relative_eq!(ub, ua, epsilon = 1e-8);
            assert_relative_eq!(wb, wa, epsilon = 1e-8);
        }
        assert_eq!(moved.points3d[&7].track, rec.points3d[&7].track);
    }

    #[test]
    fn test_matrix_and_sim3_agree() {
        let rec = sample();
        let sim3 = Sim3::from_rts(
            Rotation3::from_euler_angles(0.3, 0.2, 0.1).into_inner(),
            Vector3::new(1.0, 2.0, 3.0),
            1.5,
        );

        let a = rec.transformed(&sim3).unwrap();
        let b = rec.transformed_by_matrix(&sim3.to_matrix()).unwrap();

        assert_relative_eq!(a.points3d[&7].xyz, b.points3d[&7].xyz, epsilon = 1e-10);
        assert_relative_eq!(
            a.images[&2].pose.translation,
            b.images[&2].pose.translation,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_singular_transform_rejected() {
        let rec = sample();

        assert!(matches!(
            rec.scaled(0.0),
            Err(LocalizerError::NonInvertibleTransform)
        ));
        assert!(matches!(
            rec.transformed_by_matrix(&Matrix4::from_diagonal(&nalgebra::Vector4::new(
                0.0, 0.0, 0.0, 1.0
            ))),
            Err(LocalizerError::NonInvertibleTransform)
        ));
        assert!(matches!(
            rec.transformed_by_matrix(&Matrix4::zeros()),
            Err(LocalizerError::ZeroHomogeneousW)
        ));
    }

    #[test]
    fn test_matrix_w_divides_points() {
        let rec = sample();
        let mut mat = Matrix4::identity();
        mat[(3, 3)] = 2.0;

        let moved = rec.transformed_by_matrix(&mat).unwrap();

        assert_relative_eq!(
            moved.points3d[&7].xyz,
            rec.points3d[&7].xyz / 2.0,
            epsilon = 1e-12
        );
        let dense = moved.dense.as_ref().unwrap();
        assert_relative_eq!(dense.points[0], Vector3::new(0.5, 1.0, 1.5), epsilon = 1e-12);
        // Poses follow the same halving as the points
        let expected = rec.scaled(0.5).unwrap();
        for (id, image) in &moved.images {
            assert_relative_eq!(
                image.pose.translation,
                expected.images[id].pose.translation,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_non_similarity_matrix_rejected() {
        let rec = sample();

        let mut projective = Matrix4::identity();
        projective[(3, 0)] = 0.5;
        assert!(matches!(
            rec.transformed_by_matrix(&projective),
            Err(LocalizerError::NotASimilarity(_))
        ));

        let mut sheared = Matrix4::identity();
        sheared[(0, 1)] = 0.3;
        assert!(matches!(
            rec.transformed_by_matrix(&sheared),
            Err(LocalizerError::NotASimilarity(_))
        ));

        let anisotropic = Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, 2.0, 1.0, 1.0));
        assert!(matches!(
            rec.transformed_by_matrix(&anisotropic),
            Err(LocalizerError::NotASimilarity(_))
        ));
    }

    #[test]
    fn test_views_require_known_camera() {
        let mut rec = sample();
        rec.cameras.clear();

        assert!(rec.views(Path::new("images")).is_err());
    }
}
