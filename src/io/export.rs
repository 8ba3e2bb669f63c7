//! Result files: scale factor, tag positions, convergence table.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::detection::MarkerId;
use crate::geometry::transform_point_homogeneous;
use crate::localizer::ConvergenceSample;

/// Format like `%.18e`: mantissa with 18 decimals, signed exponent of at
/// least two digits (`5.000000000000000000e-01`).
pub fn format_scientific(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let formatted = format!("{:.18e}", value);
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Write the scale factor as a single line in scientific notation.
pub fn write_scale_factor(path: &Path, scale_factor: f64) -> Result<()> {
    fs::write(path, format!("{}\n", format_scientific(scale_factor)))
        .with_context(|| format!("Failed to write {:?}", path))
}

pub fn read_scale_factor(path: &Path) -> Result<f64> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("Invalid scale factor in {:?}", path))
}

/// Positions of every localized marker, as written to `aruco_tags.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagExport {
    pub aruco_tags: BTreeMap<MarkerId, [[f64; 3]; 4]>,
    pub aruco_size: f64,
    pub target_id: MarkerId,
}

impl TagExport {
    pub fn new(aruco_size: f64, target_id: MarkerId) -> Self {
        Self {
            aruco_tags: BTreeMap::new(),
            aruco_size,
            target_id,
        }
    }

    pub fn insert(&mut self, id: MarkerId, corners: &[Vector3<f64>; 4]) {
        self.aruco_tags.insert(id, corners.map(|c| [c.x, c.y, c.z]));
    }

    /// Insert corners after moving them by the homogeneous world transform `mat`.
    pub fn insert_transformed(
        &mut self,
        id: MarkerId,
        corners: &[Vector3<f64>; 4],
        mat: &Matrix4<f64>,
    ) -> Result<()> {
        let mut moved = *corners;
        for c in &mut moved {
            *c = transform_point_homogeneous(mat, c)
                .with_context(|| format!("Failed to transform corners of marker {}", id))?;
        }
        self.insert(id, &moved);
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write {:?}", path))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_json::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
    }
}

#[derive(Debug, Serialize)]
struct ConvergenceRow {
    num_images: usize,
    scale_factor: f64,
}

/// Write `num_images,scale_factor` rows, one per sample.
pub fn write_convergence_csv(path: &Path, samples: &[ConvergenceSample]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for sample in samples {
        writer.serialize(ConvergenceRow {
            num_images: sample.num_views,
            scale_factor: sample.scale_factor,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scientific_format() {
        assert_eq!(format_scientific(0.5), "5.000000000000000000e-01");
        assert_eq!(format_scientific(1234.0), "1.234000000000000000e+03");
        // 2.5e-120 has no exact binary form; the full digits of the nearest double are printed
        assert_eq!(format_scientific(2.5e-120), "2.500000000000000033e-120");
        assert_eq!(format_scientific(2f64.powi(-10)), "9.765625000000000000e-04");
        assert_eq!(format_scientific(-3.0), "-3.000000000000000000e+00");
    }

    #[test]
    fn test_scale_factor_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale_factor.txt");

        write_scale_factor(&path, 0.123456789).unwrap();

        assert_relative_eq!(read_scale_factor(&path).unwrap(), 0.123456789, epsilon = 1e-15);
    }

    #[test]
    fn test_tag_export_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aruco_tags.json");
        let mut export = TagExport::new(0.2, 3);
        export.insert(
            3,
            &[
                Vector3::new(0.1, 0.1, 0.0),
                Vector3::new(-0.1, 0.1, 0.0),
                Vector3::new(-0.1, -0.1, 0.0),
                Vector3::new(0.1, -0.1, 0.0),
            ],
        );

        export.write(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(json["target_id"], 3);
        assert_eq!(json["aruco_tags"]["3"][1][0], -0.1);
        assert_eq!(TagExport::read(&path).unwrap(), export);
    }

    #[test]
    fn test_tag_export_transformed_corners() {
        let corners = [
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(-2.0, 0.0, 0.0),
            Vector3::new(0.0, -2.0, 4.0),
        ];
        let mut mat = Matrix4::identity();
        mat[(0, 3)] = 1.0;
        mat[(3, 3)] = 2.0;
        let mut export = TagExport::new(0.2, 1);

        export.insert_transformed(1, &corners, &mat).unwrap();

        assert_eq!(export.aruco_tags[&1][0], [1.5, 0.0, 0.0]);
        assert_eq!(export.aruco_tags[&1][3], [0.5, -1.0, 2.0]);

        mat[(3, 3)] = 0.0;
        assert!(export.insert_transformed(2, &corners, &mat).is_err());
        assert!(!export.aruco_tags.contains_key(&2));
    }

    #[test]
    fn test_convergence_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("convergence.csv");
        let samples = [
            ConvergenceSample {
                num_views: 2,
                measured_size: 0.3,
                scale_factor: 0.5,
            },
            ConvergenceSample {
                num_views: 3,
                measured_size: 0.25,
                scale_factor: 0.6,
            },
        ];

        write_convergence_csv(&path, &samples).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "num_images,scale_factor\n2,0.5\n3,0.6\n");
    }
}
