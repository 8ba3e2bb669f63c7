//! Localizer configuration.
//!
//! Every field has a default so a YAML file only needs the values it changes:
//!
//! ```yaml
//! marker_size: 0.15
//! dictionary: 4x4_50
//! max_workers: 8
//! target_id: 3
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::detection::{ArucoDictionary, MarkerId};
use crate::geometry::DEFAULT_MAX_CONDITION;
use crate::localizer::AxisConvention;

/// Upper bound on detection workers regardless of available cores.
pub const DEFAULT_MAX_WORKERS: usize = 12;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalizerConfig {
    /// Physical edge length of the marker, in the unit the output should use (usually meters).
    pub marker_size: f64,
    pub dictionary: ArucoDictionary,
    /// Cap on detection worker threads; the pool uses min(cores, cap).
    pub max_workers: usize,
    /// Use this marker id instead of the majority vote.
    pub target_id: Option<MarkerId>,
    /// Resize factor applied to images before detection (1.0 = full resolution).
    pub detection_scale: f64,
    /// Condition number above which a corner solve is flagged as ill-conditioned.
    pub max_condition: f64,
    /// Measured marker sizes at or below this are treated as collapsed geometry.
    pub min_marker_size: f64,
    pub axis_convention: AxisConvention,
    /// Project layout, relative to the project root.
    pub images_dir: PathBuf,
    pub sparse_dir: PathBuf,
    pub dense_path: PathBuf,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            marker_size: 0.15,
            dictionary: ArucoDictionary::Dict4x4_50,
            max_workers: DEFAULT_MAX_WORKERS,
            target_id: None,
            detection_scale: 1.0,
            max_condition: DEFAULT_MAX_CONDITION,
            min_marker_size: 1e-9,
            axis_convention: AxisConvention::default(),
            images_dir: PathBuf::from("images"),
            sparse_dir: PathBuf::from("sparse"),
            dense_path: PathBuf::from("fused.ply"),
        }
    }
}

impl LocalizerConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = serde_yaml::from_reader(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.marker_size > 0.0) {
            bail!("marker_size must be positive, got {}", self.marker_size);
        }
        if self.max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            bail!(
                "detection_scale must be in (0, 1], got {}",
                self.detection_scale
            );
        }
        if !(self.max_condition > 1.0) {
            bail!("max_condition must be > 1, got {}", self.max_condition);
        }
        Ok(())
    }

    /// Number of detection workers for `num_images` images on this machine.
    pub fn worker_count(&self, num_images: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(self.max_workers).min(num_images).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "marker_size: 0.2\ndictionary: 6x6_250\ntarget_id: 7").unwrap();

        let config = LocalizerConfig::from_yaml_file(file.path()).unwrap();

        assert_eq!(config.marker_size, 0.2);
        assert_eq!(config.dictionary, ArucoDictionary::Dict6x6_250);
        assert_eq!(config.target_id, Some(7));
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.images_dir, PathBuf::from("images"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "marker_sise: 0.2").unwrap();

        assert!(LocalizerConfig::from_yaml_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = LocalizerConfig {
            marker_size: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LocalizerConfig {
            detection_scale: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_count_bounds() {
        let config = LocalizerConfig {
            max_workers: 3,
            ..Default::default()
        };

        assert!(config.worker_count(100) <= 3);
        assert_eq!(config.worker_count(1), 1);
        assert_eq!(config.worker_count(0), 1);
    }
}
