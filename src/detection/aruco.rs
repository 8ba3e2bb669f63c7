//! OpenCV-backed ArUco detector.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, bail};
use nalgebra::Point2;
use opencv::core::{Mat, Point2f, Size, Vector};
use opencv::objdetect::{self, DetectorParameters, PredefinedDictionaryType, RefineParameters};
use opencv::prelude::*;
use opencv::{imgcodecs, imgcodecs::IMREAD_GRAYSCALE, imgproc};
use serde::{Deserialize, Serialize};

use super::{DetectorOutput, MarkerDetector, MarkerObservation};
use crate::error::{LocalizerError, Result};

/// Predefined ArUco dictionaries, named `<bits>x<bits>_<count>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArucoDictionary {
    #[serde(rename = "4x4_50")]
    Dict4x4_50,
    #[serde(rename = "4x4_100")]
    Dict4x4_100,
    #[serde(rename = "4x4_250")]
    Dict4x4_250,
    #[serde(rename = "4x4_1000")]
    Dict4x4_1000,
    #[serde(rename = "5x5_50")]
    Dict5x5_50,
    #[serde(rename = "5x5_100")]
    Dict5x5_100,
    #[serde(rename = "5x5_250")]
    Dict5x5_250,
    #[serde(rename = "5x5_1000")]
    Dict5x5_1000,
    #[serde(rename = "6x6_50")]
    Dict6x6_50,
    #[serde(rename = "6x6_100")]
    Dict6x6_100,
    #[serde(rename = "6x6_250")]
    Dict6x6_250,
    #[serde(rename = "6x6_1000")]
    Dict6x6_1000,
    #[serde(rename = "7x7_50")]
    Dict7x7_50,
    #[serde(rename = "7x7_100")]
    Dict7x7_100,
    #[serde(rename = "7x7_250")]
    Dict7x7_250,
    #[serde(rename = "7x7_1000")]
    Dict7x7_1000,
    #[serde(rename = "original")]
    Original,
}

impl ArucoDictionary {
    pub const ALL: [ArucoDictionary; 17] = [
        Self::Dict4x4_50,
        Self::Dict4x4_100,
        Self::Dict4x4_250,
        Self::Dict4x4_1000,
        Self::Dict5x5_50,
        Self::Dict5x5_100,
        Self::Dict5x5_250,
        Self::Dict5x5_1000,
        Self::Dict6x6_50,
        Self::Dict6x6_100,
        Self::Dict6x6_250,
        Self::Dict6x6_1000,
        Self::Dict7x7_50,
        Self::Dict7x7_100,
        Self::Dict7x7_250,
        Self::Dict7x7_1000,
        Self::Original,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Dict4x4_50 => "4x4_50",
            Self::Dict4x4_100 => "4x4_100",
            Self::Dict4x4_250 => "4x4_250",
            Self::Dict4x4_1000 => "4x4_1000",
            Self::Dict5x5_50 => "5x5_50",
            Self::Dict5x5_100 => "5x5_100",
            Self::Dict5x5_250 => "5x5_250",
            Self::Dict5x5_1000 => "5x5_1000",
            Self::Dict6x6_50 => "6x6_50",
            Self::Dict6x6_100 => "6x6_100",
            Self::Dict6x6_250 => "6x6_250",
            Self::Dict6x6_1000 => "6x6_1000",
            Self::Dict7x7_50 => "7x7_50",
            Self::Dict7x7_100 => "7x7_100",
            Self::Dict7x7_250 => "7x7_250",
            Self::Dict7x7_1000 => "7x7_1000",
            Self::Original => "original",
        }
    }

    fn to_opencv(self) -> PredefinedDictionaryType {
        use PredefinedDictionaryType as P;
        match self {
            Self::Dict4x4_50 => P::DICT_4X4_50,
            Self::Dict4x4_100 => P::DICT_4X4_100,
            Self::Dict4x4_250 => P::DICT_4X4_250,
            Self::Dict4x4_1000 => P::DICT_4X4_1000,
            Self::Dict5x5_50 => P::DICT_5X5_50,
            Self::Dict5x5_100 => P::DICT_5X5_100,
            Self::Dict5x5_250 => P::DICT_5X5_250,
            Self::Dict5x5_1000 => P::DICT_5X5_1000,
            Self::Dict6x6_50 => P::DICT_6X6_50,
            Self::Dict6x6_100 => P::DICT_6X6_100,
            Self::Dict6x6_250 => P::DICT_6X6_250,
            Self::Dict6x6_1000 => P::DICT_6X6_1000,
            Self::Dict7x7_50 => P::DICT_7X7_50,
            Self::Dict7x7_100 => P::DICT_7X7_100,
            Self::Dict7x7_250 => P::DICT_7X7_250,
            Self::Dict7x7_1000 => P::DICT_7X7_1000,
            Self::Original => P::DICT_ARUCO_ORIGINAL,
        }
    }
}

impl fmt::Display for ArucoDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArucoDictionary {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let key = key.strip_prefix("dict_").unwrap_or(&key);
        Self::ALL
            .into_iter()
            .find(|d| d.name() == key)
            .ok_or_else(|| format!("unknown ArUco dictionary '{s}'"))
    }
}

/// ArUco marker detector on grayscale images.
///
/// Holds only plain settings; the OpenCV detector is built per image so a
/// single instance can be shared by all detection workers.
#[derive(Debug, Clone)]
pub struct ArucoDetector {
    dictionary: ArucoDictionary,
    /// Images are downscaled by this factor before detection when below 1.
    scale: f64,
}

impl ArucoDetector {
    pub fn new(dictionary: ArucoDictionary, scale: f64) -> Self {
        Self { dictionary, scale }
    }

    pub fn dictionary(&self) -> ArucoDictionary {
        self.dictionary
    }

    fn detect_opencv(&self, image_path: &Path) -> anyhow::Result<DetectorOutput> {
        let path_str = image_path
            .to_str()
            .with_context(|| format!("Non UTF-8 image path {:?}", image_path))?;
        let image = imgcodecs::imread(path_str, IMREAD_GRAYSCALE)
            .with_context(|| format!("Failed to read {:?}", image_path))?;
        if image.empty() {
            bail!("Could not decode image {:?}", image_path);
        }

        let image = if self.scale < 1.0 {
            let mut resized = Mat::default();
            imgproc::resize(
                &image,
                &mut resized,
                Size::default(),
                self.scale,
                self.scale,
                imgproc::INTER_AREA,
            )?;
            resized
        } else {
            image
        };

        let dictionary = objdetect::get_predefined_dictionary(self.dictionary.to_opencv())?;
        let detector = objdetect::ArucoDetector::new(
            &dictionary,
            &DetectorParameters::default()?,
            RefineParameters::new(10.0, 3.0, true)?,
        )?;

        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        detector.detect_markers(&image, &mut corners, &mut ids, &mut rejected)?;

        let mut markers = Vec::with_capacity(ids.len());
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if quad.len() != 4 {
                continue;
            }
            let mut pts = [Point2::origin(); 4];
            for (dst, p) in pts.iter_mut().zip(quad.iter()) {
                *dst = Point2::new(p.x as f64, p.y as f64);
            }
            markers.push(MarkerObservation { id, corners: pts });
        }

        Ok(DetectorOutput {
            markers,
            processed_width: image.cols() as u32,
            processed_height: image.rows() as u32,
        })
    }
}

impl MarkerDetector for ArucoDetector {
    fn detect(&self, image_path: &Path) -> Result<DetectorOutput> {
        self.detect_opencv(image_path)
            .map_err(|e| LocalizerError::Detection {
                image: image_path.to_path_buf(),
                message: format!("{e:#}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_names_roundtrip() {
        for dict in ArucoDictionary::ALL {
            assert_eq!(dict.name().parse::<ArucoDictionary>().unwrap(), dict);
        }
        assert_eq!(
            "DICT_6X6_250".parse::<ArucoDictionary>().unwrap(),
            ArucoDictionary::Dict6x6_250
        );
        assert!("8x8_50".parse::<ArucoDictionary>().is_err());
    }

    #[test]
    fn test_missing_image_is_detection_error() {
        let detector = ArucoDetector::new(ArucoDictionary::Dict4x4_50, 1.0);

        let err = detector
            .detect(Path::new("/nonexistent/image.png"))
            .unwrap_err();
        assert!(matches!(err, LocalizerError::Detection { .. }));
    }
}
