//! Error taxonomy for the marker localization pipeline.
//!
//! Integrity, detection-failure and precondition errors abort a run.
//! Ill-conditioned geometry is not an error: it is reported on the
//! solver result and logged, and the caller decides what to do with it.

use std::path::PathBuf;

use thiserror::Error;

use crate::detection::MarkerId;

/// Errors that can occur while localizing the marker or transforming a reconstruction.
#[derive(Debug, Error)]
pub enum LocalizerError {
    /// The detection pool returned a different number of results than images submitted.
    #[error("detection returned {got} results for {expected} images")]
    CardinalityMismatch { expected: usize, got: usize },

    /// No image produced a marker detection, so no dominant id exists.
    #[error("no marker was detected in any image")]
    NoMarkerDetected,

    /// A configured target marker was never observed.
    #[error("target marker {0} was not detected in any image")]
    TargetNotDetected(MarkerId),

    /// A corner is observed by fewer images than the solver needs.
    #[error("corner {corner} is observed by {observed} image(s), need at least 2")]
    InsufficientObservations { corner: usize, observed: usize },

    /// The line intersection solver was called with fewer than two rays.
    #[error("need at least 2 rays for a line intersection, got {0}")]
    TooFewRays(usize),

    /// The recovered marker collapsed to (almost) a point.
    #[error("measured marker size {measured_size:e} is too small to derive a scale")]
    DegenerateMarker { measured_size: f64 },

    /// A homogeneous transform produced w = 0.
    #[error("homogeneous coordinate w vanished while transforming a point")]
    ZeroHomogeneousW,

    #[error("transform matrix is not invertible")]
    NonInvertibleTransform,

    /// The matrix has a projective bottom row or a linear block that is not s*R.
    #[error("transform matrix is not a similarity: {0}")]
    NotASimilarity(&'static str),

    #[error("detection failed for {image}: {message}")]
    Detection { image: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, LocalizerError>;
