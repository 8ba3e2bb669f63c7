//! Metric scale and origin recovery for posed multi-view reconstructions,
//! using a single ArUco marker of known size.

pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod io;
pub mod localizer;
pub mod reconstruction;

pub use camera::{CameraModel, Intrinsics, View};
pub use config::LocalizerConfig;
pub use detection::{ArucoDetector, ArucoDictionary, MarkerDetector, MarkerId, detect_markers};
pub use error::{LocalizerError, Result};
pub use localizer::{ArucoLocalizer, AxisConvention, Localization, MarkerEstimate};
pub use reconstruction::{PointCloud, Reconstruction};
