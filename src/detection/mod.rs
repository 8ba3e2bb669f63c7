//! Marker detection stage.
//!
//! Runs a [`MarkerDetector`] over every view on a bounded worker pool, maps the
//! detected corners back to the calibrated image resolution, and settles on a
//! single marker id for the rest of the pipeline.

pub mod aruco;
mod pool;

pub use aruco::{ArucoDetector, ArucoDictionary};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nalgebra::Point2;
use tracing::{debug, info};

use crate::camera::View;
use crate::config::LocalizerConfig;
use crate::error::{LocalizerError, Result};

/// Marker identifier as reported by the detector dictionary.
pub type MarkerId = i32;

/// The four marker corners in pixel coordinates, in detector order.
pub type Corners = [Point2<f64>; 4];

/// One marker found in one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerObservation {
    pub id: MarkerId,
    pub corners: Corners,
}

/// Raw detector output for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub markers: Vec<MarkerObservation>,
    /// Resolution of the image the corners refer to.
    pub processed_width: u32,
    pub processed_height: u32,
}

/// Image-to-corners capability consumed by the detection stage.
///
/// Implementations are shared across the worker threads, hence `Sync`.
pub trait MarkerDetector: Sync {
    fn detect(&self, image_path: &Path) -> Result<DetectorOutput>;
}

/// Detection state of one view after the stage ran.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageDetection {
    /// Corners of the selected marker, or `None` if it was not seen here.
    pub corners: Option<Corners>,
    /// Every marker seen in this image, in calibrated pixel coordinates.
    pub markers: Vec<MarkerObservation>,
}

impl ImageDetection {
    /// Id of the first detected marker, the one this image votes for.
    pub fn primary_id(&self) -> Option<MarkerId> {
        self.markers.first().map(|m| m.id)
    }

    pub fn observation(&self, id: MarkerId) -> Option<&MarkerObservation> {
        self.markers.iter().find(|m| m.id == id)
    }
}

/// Output of the detection stage, aligned with the input views.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<ImageDetection>,
    /// The marker id the pipeline localizes.
    pub marker_id: MarkerId,
    /// Votes per marker id (images whose first detection had that id).
    pub votes: BTreeMap<MarkerId, usize>,
}

impl DetectionResult {
    /// Number of views that retained corners for `marker_id`.
    pub fn num_observing(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| d.corners.is_some())
            .count()
    }
}

/// Run detection over all views.
///
/// Fails with [`LocalizerError::CardinalityMismatch`] if the pool does not
/// return exactly one result per view, with [`LocalizerError::NoMarkerDetected`]
/// if no image contains a marker, and with the first detector error if any
/// image could not be processed.
pub fn detect_markers<D: MarkerDetector + ?Sized>(
    detector: &D,
    views: &[View],
    config: &LocalizerConfig,
) -> Result<DetectionResult> {
    let paths: Vec<PathBuf> = views.iter().map(|v| v.image_path.clone()).collect();
    let workers = config.worker_count(views.len());
    info!(
        "Detecting markers in {} images with {} workers",
        views.len(),
        workers
    );

    let start = Instant::now();
    let raw = pool::run_detection_pool(detector, &paths, workers);
    debug!(
        "Detection pool finished in {:.1} ms",
        start.elapsed().as_secs_f64() * 1e3
    );

    let outputs = align_results(raw, views.len())?;

    let mut detections = Vec::with_capacity(views.len());
    for (view, output) in views.iter().zip(outputs) {
        let output = output?;
        let markers = rescale_to_view(&output, view)?;
        if !markers.is_empty() {
            debug!(
                "Image {:?}: {} marker(s), first id {}",
                view.image_path,
                markers.len(),
                markers[0].id
            );
        }
        detections.push(ImageDetection {
            corners: None,
            markers,
        });
    }

    let votes = count_votes(&detections);
    let marker_id = match config.target_id {
        Some(target) => {
            if !detections.iter().any(|d| d.observation(target).is_some()) {
                return Err(LocalizerError::TargetNotDetected(target));
            }
            target
        }
        None => dominant_id(&votes).ok_or(LocalizerError::NoMarkerDetected)?,
    };

    for detection in &mut detections {
        detection.corners = detection.observation(marker_id).map(|m| m.corners);
    }

    let result = DetectionResult {
        detections,
        marker_id,
        votes,
    };
    info!(
        "Marker {} retained in {}/{} images",
        result.marker_id,
        result.num_observing(),
        views.len()
    );
    Ok(result)
}

/// Place pool results back in input order, checking that every index came
/// back exactly once.
fn align_results<T>(raw: Vec<(usize, T)>, expected: usize) -> Result<Vec<T>> {
    if raw.len() != expected {
        return Err(LocalizerError::CardinalityMismatch {
            expected,
            got: raw.len(),
        });
    }

    let mut slots: Vec<Option<T>> = (0..expected).map(|_| None).collect();
    for (idx, item) in raw {
        match slots.get_mut(idx) {
            Some(slot @ None) => *slot = Some(item),
            // Out-of-range or duplicated index
            _ => {
                return Err(LocalizerError::CardinalityMismatch {
                    expected,
                    got: expected + 1,
                });
            }
        }
    }

    let got = slots.iter().filter(|s| s.is_some()).count();
    if got != expected {
        return Err(LocalizerError::CardinalityMismatch { expected, got });
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Map detector pixel coordinates to the view's calibrated resolution, per axis.
fn rescale_to_view(output: &DetectorOutput, view: &View) -> Result<Vec<MarkerObservation>> {
    if output.markers.is_empty() {
        return Ok(Vec::new());
    }
    if output.processed_width == 0 || output.processed_height == 0 {
        return Err(LocalizerError::Detection {
            image: view.image_path.clone(),
            message: "detector reported an empty processed resolution".to_string(),
        });
    }

    let ratio_x = view.width as f64 / output.processed_width as f64;
    let ratio_y = view.height as f64 / output.processed_height as f64;

    Ok(output
        .markers
        .iter()
        .map(|m| MarkerObservation {
            id: m.id,
            corners: m
                .corners
                .map(|p| Point2::new(p.x * ratio_x, p.y * ratio_y)),
        })
        .collect())
}

fn count_votes(detections: &[ImageDetection]) -> BTreeMap<MarkerId, usize> {
    let mut votes = BTreeMap::new();
    for id in detections.iter().filter_map(ImageDetection::primary_id) {
        *votes.entry(id).or_insert(0) += 1;
    }
    votes
}

/// Most voted id; ties go to the smallest id.
fn dominant_id(votes: &BTreeMap<MarkerId, usize>) -> Option<MarkerId> {
    let mut best: Option<(MarkerId, usize)> = None;
    for (&id, &count) in votes {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((id, count));
        }
    }
    best.map(|(id, _)| id)
}
