//! ArUco marker localization in a posed multi-view reconstruction.
//!
//! Pipeline:
//! 1. Detect markers in every view and pick one marker id
//!    ([`crate::detection::detect_markers`])
//! 2. Cast a world ray through each detected corner ([`RayBundles`])
//! 3. Intersect the rays of each corner in a least-squares sense ([`solve_corners`])
//! 4. Derive the marker size, the metric scale factor and the normalization
//!    transform from the four corners

pub mod ray_cast;
pub mod scale;
pub mod solve;

pub use ray_cast::{RayBundles, cast_rays};
pub use scale::{
    AxisConvention, MarkerFrame, measured_size, normalization_transform, scale_factor,
};
pub use solve::solve_corners;

use std::collections::BTreeMap;
use std::time::Instant;

use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::camera::View;
use crate::config::LocalizerConfig;
use crate::detection::{DetectionResult, MarkerDetector, MarkerId, detect_markers};
use crate::error::Result;
use crate::geometry::{LineIntersection, Sim3};

/// The marker as recovered in reconstruction coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerEstimate {
    pub marker_id: MarkerId,
    /// Corner positions, in detector corner order.
    pub corners: [Vector3<f64>; 4],
    /// Solver diagnostics per corner.
    pub intersections: [LineIntersection; 4],
    /// Mean edge length in reconstruction units.
    pub measured_size: f64,
    /// Views that contributed rays.
    pub num_views: usize,
}

impl MarkerEstimate {
    /// Solve the four corners from `bundles` and summarize the marker.
    pub fn from_bundles(
        marker_id: MarkerId,
        bundles: &RayBundles,
        max_condition: f64,
    ) -> Result<Self> {
        let intersections = solve_corners(bundles, max_condition)?;
        let corners = intersections.map(|i| i.point);
        Ok(Self {
            marker_id,
            corners,
            intersections,
            measured_size: measured_size(&corners),
            num_views: bundles.num_views(),
        })
    }

    pub fn scale_factor(&self, marker_size: f64, min_size: f64) -> Result<f64> {
        scale_factor(marker_size, self.measured_size, min_size)
    }

    pub fn normalization_transform(&self, convention: AxisConvention) -> Result<Sim3> {
        normalization_transform(&self.corners, convention)
    }

    pub fn center(&self) -> Vector3<f64> {
        self.corners.iter().sum::<Vector3<f64>>() / 4.0
    }

    /// True if any corner solve exceeded the condition threshold.
    pub fn is_ill_conditioned(&self) -> bool {
        self.intersections.iter().any(|i| i.ill_conditioned)
    }

    /// Largest RMS ray-to-corner distance over the four corners.
    pub fn max_rms_distance(&self) -> f64 {
        self.intersections
            .iter()
            .map(|i| i.rms_distance)
            .fold(0.0, f64::max)
    }
}

/// Everything one localization run produced.
#[derive(Debug, Clone)]
pub struct Localization {
    pub detection: DetectionResult,
    pub bundles: RayBundles,
    pub estimate: MarkerEstimate,
}

/// One sample of the scale estimate using only the first `num_views` views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceSample {
    pub num_views: usize,
    pub measured_size: f64,
    pub scale_factor: f64,
}

/// Runs detection and the geometric solve over a set of views.
pub struct ArucoLocalizer<'a, D: MarkerDetector + ?Sized> {
    detector: &'a D,
    views: &'a [View],
    config: &'a LocalizerConfig,
}

impl<'a, D: MarkerDetector + ?Sized> ArucoLocalizer<'a, D> {
    pub fn new(detector: &'a D, views: &'a [View], config: &'a LocalizerConfig) -> Self {
        Self {
            detector,
            views,
            config,
        }
    }

    /// Detect, cast rays and solve the corners of the selected marker.
    pub fn run(&self) -> Result<Localization> {
        let start = Instant::now();

        let detection = detect_markers(self.detector, self.views, self.config)?;
        let bundles = RayBundles::from_detections(self.views, &detection);
        info!(
            "Casting rays for marker {} from {} views",
            detection.marker_id,
            bundles.num_views()
        );

        let estimate =
            MarkerEstimate::from_bundles(detection.marker_id, &bundles, self.config.max_condition)?;

        if estimate.is_ill_conditioned() {
            warn!(
                "Marker {} corners are ill-conditioned; views may be too close to parallel",
                estimate.marker_id
            );
        }
        if estimate.measured_size <= self.config.min_marker_size {
            warn!(
                "Marker {} collapsed to size {:e}; no scale can be derived",
                estimate.marker_id, estimate.measured_size
            );
        }
        info!(
            "Marker {} localized: size {:.6} (reconstruction units), max RMS ray distance {:.3e}, {:.1} ms",
            estimate.marker_id,
            estimate.measured_size,
            estimate.max_rms_distance(),
            start.elapsed().as_secs_f64() * 1e3
        );

        Ok(Localization {
            detection,
            bundles,
            estimate,
        })
    }
}

/// Solve every marker id seen in at least two views.
///
/// Ids with too few views are skipped, not reported as errors.
pub fn localize_all_markers(
    views: &[View],
    detection: &DetectionResult,
    max_condition: f64,
) -> BTreeMap<MarkerId, MarkerEstimate> {
    let ids: std::collections::BTreeSet<MarkerId> = detection
        .detections
        .iter()
        .flat_map(|d| d.markers.iter().map(|m| m.id))
        .collect();

    let mut estimates = BTreeMap::new();
    for id in ids {
        let bundles = RayBundles::for_marker(views, detection, id);
        match MarkerEstimate::from_bundles(id, &bundles, max_condition) {
            Ok(estimate) => {
                estimates.insert(id, estimate);
            }
            Err(e) => debug!("Skipping marker {}: {}", id, e),
        }
    }
    estimates
}

/// Scale estimate as views are added one at a time, from 2 up to all of them.
///
/// Sample sizes whose marker collapses are left out.
pub fn scale_convergence(
    bundles: &RayBundles,
    marker_size: f64,
    max_condition: f64,
    min_size: f64,
) -> Result<Vec<ConvergenceSample>> {
    let mut samples = Vec::with_capacity(bundles.num_views().saturating_sub(1));
    for k in 2..=bundles.num_views() {
        let corners = solve_corners(&bundles.truncated(k), max_condition)?.map(|i| i.point);
        let size = measured_size(&corners);
        match scale_factor(marker_size, size, min_size) {
            Ok(scale) => samples.push(ConvergenceSample {
                num_views: k,
                measured_size: size,
                scale_factor: scale,
            }),
            Err(e) => warn!("Skipping convergence sample with {} views: {}", k, e),
        }
    }
    Ok(samples)
}
