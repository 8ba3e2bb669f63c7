//! COLMAP text model reader/writer and project layout.
//!
//! The sparse model is three files: `cameras.txt`, `images.txt` (two lines per
//! image, the second possibly empty) and `points3D.txt`. Lines starting with
//! `#` are comments.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use nalgebra::{Point2, Vector3};
use tracing::{info, warn};

use super::ply;
use crate::camera::{CameraModel, View};
use crate::config::LocalizerConfig;
use crate::geometry::SE3;
use crate::reconstruction::{ImageRecord, Keypoint, Point3D, Reconstruction, TrackElement};

const CAMERAS_FILE: &str = "cameras.txt";
const IMAGES_FILE: &str = "images.txt";
const POINTS3D_FILE: &str = "points3D.txt";

/// A COLMAP project on disk: images, sparse model, optional dense cloud.
#[derive(Debug, Clone)]
pub struct ColmapProject {
    pub root: PathBuf,
    pub images_dir: PathBuf,
    pub sparse_dir: PathBuf,
    pub reconstruction: Reconstruction,
}

impl ColmapProject {
    /// Load the sparse model and, if present, the dense cloud.
    ///
    /// Falls back to `sparse/0` when the configured sparse directory holds
    /// no model itself, which is how COLMAP's mapper lays out its output.
    pub fn open<P: AsRef<Path>>(root: P, config: &LocalizerConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut sparse_dir = root.join(&config.sparse_dir);
        if !sparse_dir.join(CAMERAS_FILE).exists()
            && sparse_dir.join("0").join(CAMERAS_FILE).exists()
        {
            sparse_dir = sparse_dir.join("0");
        }

        let mut reconstruction = read_model(&sparse_dir)?;

        let dense_path = root.join(&config.dense_path);
        if dense_path.exists() {
            let cloud = ply::read_ply(&dense_path)?;
            info!("Loaded dense cloud with {} points", cloud.len());
            reconstruction.dense = Some(cloud);
        } else {
            warn!("No dense cloud at {:?}; only the sparse model is used", dense_path);
        }

        info!(
            "Loaded COLMAP model: {} cameras, {} images, {} points",
            reconstruction.cameras.len(),
            reconstruction.images.len(),
            reconstruction.points3d.len()
        );

        Ok(Self {
            images_dir: root.join(&config.images_dir),
            root,
            sparse_dir,
            reconstruction,
        })
    }

    pub fn views(&self) -> Result<Vec<View>> {
        self.reconstruction.views(&self.images_dir)
    }
}

/// Read `cameras.txt`, `images.txt` and `points3D.txt` from `dir`.
pub fn read_model(dir: &Path) -> Result<Reconstruction> {
    let cameras = read_cameras_text(&dir.join(CAMERAS_FILE))?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let images = read_images_text(&dir.join(IMAGES_FILE))?
        .into_iter()
        .map(|i| (i.id, i))
        .collect();
    let points3d = read_points3d_text(&dir.join(POINTS3D_FILE))?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    Ok(Reconstruction {
        cameras,
        images,
        points3d,
        dense: None,
    })
}

/// Write the sparse part of `reconstruction` to `dir`, creating it if needed.
pub fn write_model(reconstruction: &Reconstruction, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    write_cameras_text(reconstruction, &dir.join(CAMERAS_FILE))?;
    write_images_text(reconstruction, &dir.join(IMAGES_FILE))?;
    write_points3d_text(reconstruction, &dir.join(POINTS3D_FILE))?;
    Ok(())
}

fn open_lines(path: &Path) -> Result<impl Iterator<Item = (usize, std::io::Result<String>)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    Ok(BufReader::new(file)
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line)))
}

fn parse<T: FromStr>(token: Option<&str>, what: &str, path: &Path, line_no: usize) -> Result<T> {
    let token = token.with_context(|| format!("{:?}:{}: missing {}", path, line_no, what))?;
    token
        .parse()
        .ok()
        .with_context(|| format!("{:?}:{}: invalid {} '{}'", path, line_no, what, token))
}

pub fn read_cameras_text(path: &Path) -> Result<Vec<CameraModel>> {
    let mut cameras = Vec::new();
    for (line_no, line) in open_lines(path)? {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let id = parse(tokens.next(), "camera id", path, line_no)?;
        let model: String = parse(tokens.next(), "camera model", path, line_no)?;
        let width = parse(tokens.next(), "width", path, line_no)?;
        let height = parse(tokens.next(), "height", path, line_no)?;
        let params = tokens
            .map(|t| parse(Some(t), "camera parameter", path, line_no))
            .collect::<Result<Vec<f64>>>()?;
        cameras.push(CameraModel {
            id,
            model,
            width,
            height,
            params,
        });
    }
    Ok(cameras)
}

pub fn read_images_text(path: &Path) -> Result<Vec<ImageRecord>> {
    let mut lines = open_lines(path)?.filter(|(_, line)| {
        !matches!(line, Ok(l) if l.trim_start().starts_with('#'))
    });

    let mut images = Vec::new();
    while let Some((line_no, header)) = lines.next() {
        let header = header?;
        let header = header.trim();
        if header.is_empty() {
            continue;
        }

        let mut tokens = header.split_whitespace();
        let id = parse(tokens.next(), "image id", path, line_no)?;
        let mut q = [0.0; 4];
        for (k, slot) in q.iter_mut().enumerate() {
            *slot = parse(tokens.next(), &format!("quaternion[{k}]"), path, line_no)?;
        }
        let mut t = Vector3::<f64>::zeros();
        for k in 0..3 {
            t[k] = parse(tokens.next(), &format!("translation[{k}]"), path, line_no)?;
        }
        let camera_id = parse(tokens.next(), "camera id", path, line_no)?;
        let name = tokens.collect::<Vec<_>>().join(" ");
        if name.is_empty() {
            bail!("{:?}:{}: missing image name", path, line_no);
        }

        let keypoints = match lines.next() {
            Some((points_line_no, points)) => parse_keypoints(&points?, path, points_line_no)?,
            None => Vec::new(),
        };

        images.push(ImageRecord {
            id,
            pose: SE3::from_quaternion(q[0], q[1], q[2], q[3], t),
            camera_id,
            name,
            keypoints,
        });
    }
    images.sort_by_key(|i| i.id);
    Ok(images)
}

fn parse_keypoints(line: &str, path: &Path, line_no: usize) -> Result<Vec<Keypoint>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() % 3 != 0 {
        bail!(
            "{:?}:{}: keypoint list has {} values, expected triples",
            path,
            line_no,
            tokens.len()
        );
    }
    tokens
        .chunks_exact(3)
        .map(|chunk| {
            let x = parse(Some(chunk[0]), "keypoint x", path, line_no)?;
            let y = parse(Some(chunk[1]), "keypoint y", path, line_no)?;
            let id: i64 = parse(Some(chunk[2]), "point3D id", path, line_no)?;
            Ok(Keypoint {
                xy: Point2::new(x, y),
                point3d_id: u64::try_from(id).ok(),
            })
        })
        .collect()
}

pub fn read_points3d_text(path: &Path) -> Result<Vec<Point3D>> {
    let mut points = Vec::new();
    for (line_no, line) in open_lines(path)? {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let id = parse(tokens.next(), "point3D id", path, line_no)?;
        let mut xyz = Vector3::<f64>::zeros();
        for k in 0..3 {
            xyz[k] = parse(tokens.next(), "coordinate", path, line_no)?;
        }
        let mut rgb = [0u8; 3];
        for channel in &mut rgb {
            *channel = parse(tokens.next(), "color", path, line_no)?;
        }
        let error = parse(tokens.next(), "error", path, line_no)?;

        let rest: Vec<&str> = tokens.collect();
        if rest.len() % 2 != 0 {
            bail!("{:?}:{}: track has an odd number of values", path, line_no);
        }
        let track = rest
            .chunks_exact(2)
            .map(|pair| {
                Ok(TrackElement {
                    image_id: parse(Some(pair[0]), "track image id", path, line_no)?,
                    keypoint_idx: parse(Some(pair[1]), "track keypoint index", path, line_no)?,
                })
            })
            .collect::<Result<_>>()?;

        points.push(Point3D {
            id,
            xyz,
            rgb,
            error,
            track,
        });
    }
    Ok(points)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(
        File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
    ))
}

pub fn write_cameras_text(reconstruction: &Reconstruction, path: &Path) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "# Camera list with one line of data per camera:")?;
    writeln!(w, "#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]")?;
    writeln!(w, "# Number of cameras: {}", reconstruction.cameras.len())?;
    for camera in reconstruction.cameras.values() {
        write!(
            w,
            "{} {} {} {}",
            camera.id, camera.model, camera.width, camera.height
        )?;
        for p in &camera.params {
            write!(w, " {}", p)?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_images_text(reconstruction: &Reconstruction, path: &Path) -> Result<()> {
    let images = &reconstruction.images;
    let mean_observations = if images.is_empty() {
        0.0
    } else {
        images
            .values()
            .map(|i| i.keypoints.iter().filter(|k| k.point3d_id.is_some()).count())
            .sum::<usize>() as f64
            / images.len() as f64
    };

    let mut w = create(path)?;
    writeln!(w, "# Image list with two lines of data per image:")?;
    writeln!(w, "#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME")?;
    writeln!(w, "#   POINTS2D[] as (X, Y, POINT3D_ID)")?;
    writeln!(
        w,
        "# Number of images: {}, mean observations per image: {}",
        images.len(),
        mean_observations
    )?;
    for image in images.values() {
        let [qw, qx, qy, qz] = image.pose.quaternion_wxyz();
        let t = &image.pose.translation;
        writeln!(
            w,
            "{} {} {} {} {} {} {} {} {} {}",
            image.id, qw, qx, qy, qz, t.x, t.y, t.z, image.camera_id, image.name
        )?;
        let mut first = true;
        for kp in &image.keypoints {
            if !first {
                write!(w, " ")?;
            }
            first = false;
            let id = kp.point3d_id.map_or(-1, |id| id as i64);
            write!(w, "{} {} {}", kp.xy.x, kp.xy.y, id)?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_points3d_text(reconstruction: &Reconstruction, path: &Path) -> Result<()> {
    let points = &reconstruction.points3d;
    let mean_track = if points.is_empty() {
        0.0
    } else {
        points.values().map(|p| p.track.len()).sum::<usize>() as f64 / points.len() as f64
    };

    let mut w = create(path)?;
    writeln!(w, "# 3D point list with one line of data per point:")?;
    writeln!(
        w,
        "#   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)"
    )?;
    writeln!(
        w,
        "# Number of points: {}, mean track length: {}",
        points.len(),
        mean_track
    )?;
    for p in points.values() {
        write!(
            w,
            "{} {} {} {} {} {} {} {}",
            p.id, p.xyz.x, p.xyz.y, p.xyz.z, p.rgb[0], p.rgb[1], p.rgb[2], p.error
        )?;
        for el in &p.track {
            write!(w, " {} {}", el.image_id, el.keypoint_idx)?;
        }
        writeln!(w)?;
    }
    w.flush()?;
    Ok(())
}
