//! Metric scale and marker-centered normalization from the recovered corners.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LocalizerError, Result};
use crate::geometry::{Sim3, align_rotation};

/// Mean of the four consecutive edge lengths of the marker quadrilateral.
pub fn measured_size(corners: &[Vector3<f64>; 4]) -> f64 {
    (0..4)
        .map(|i| (corners[i] - corners[(i + 1) % 4]).norm())
        .sum::<f64>()
        / 4.0
}

/// Ratio that brings the reconstruction to metric units:
/// `marker_size / measured_size`.
///
/// A measured size at or below `min_size` means the corners collapsed and no
/// meaningful scale exists.
pub fn scale_factor(marker_size: f64, measured_size: f64, min_size: f64) -> Result<f64> {
    if !(measured_size > min_size) {
        return Err(LocalizerError::DegenerateMarker { measured_size });
    }
    Ok(marker_size / measured_size)
}

/// Where the marker axes end up after normalization.
///
/// The marker x axis points from corner 1 to corner 0, the y axis from corner 3
/// to corner 0, and the normal is x cross y. Both conventions are
/// right-handed so the rotation maps all three axes exactly for a square
/// marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisConvention {
    /// Marker x -> +X, y -> +Y, normal -> +Z.
    #[default]
    MarkerPlane,
    /// Marker x -> +X, y -> +Z, normal -> -Y (Nerfstudio-style up axis).
    Nerfstudio,
}

impl AxisConvention {
    /// Target directions for the marker x, y and normal axes.
    pub fn targets(self) -> [Vector3<f64>; 3] {
        match self {
            Self::MarkerPlane => [Vector3::x(), Vector3::y(), Vector3::z()],
            Self::Nerfstudio => [Vector3::x(), Vector3::z(), -Vector3::y()],
        }
    }
}

/// Orthonormal-ish frame attached to the recovered marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerFrame {
    pub center: Vector3<f64>,
    pub x_axis: Vector3<f64>,
    pub y_axis: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl MarkerFrame {
    pub fn from_corners(corners: &[Vector3<f64>; 4]) -> Result<Self> {
        let degenerate = || LocalizerError::DegenerateMarker {
            measured_size: measured_size(corners),
        };

        let center = corners.iter().sum::<Vector3<f64>>() / 4.0;
        let x_axis = (corners[0] - corners[1])
            .try_normalize(f64::EPSILON)
            .ok_or_else(degenerate)?;
        let y_axis = (corners[0] - corners[3])
            .try_normalize(f64::EPSILON)
            .ok_or_else(degenerate)?;
        let normal = x_axis
            .cross(&y_axis)
            .try_normalize(f64::EPSILON)
            .ok_or_else(degenerate)?;

        Ok(Self {
            center,
            x_axis,
            y_axis,
            normal,
        })
    }
}

/// Rigid transform placing the marker center at the origin with its axes
/// aligned to `convention`.
///
/// Built as T = [R | -R * center], with R the least-squares rotation taking
/// the marker axes onto the convention's targets.
pub fn normalization_transform(
    corners: &[Vector3<f64>; 4],
    convention: AxisConvention,
) -> Result<Sim3> {
    let frame = MarkerFrame::from_corners(corners)?;
    let source = [frame.x_axis, frame.y_axis, frame.normal];
    let rotation = align_rotation(&source, &convention.targets()).ok_or(
        LocalizerError::DegenerateMarker {
            measured_size: measured_size(corners),
        },
    )?;

    debug!(
        "Marker frame: center {:?}, normal {:?}",
        frame.center.as_slice(),
        frame.normal.as_slice()
    );

    Ok(Sim3::from_rts(rotation, -rotation * frame.center, 1.0))
}
