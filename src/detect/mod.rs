//!
//! Marker detection
//!

use image::GrayImage;
use nalgebra::Point2;

use snafu::OptionExt;

use crate::config::{DetectionCfg, DetectorKind, MarkerCfg};
use crate::error::*;

pub mod dictionary;
pub mod native;
#[cfg(feature = "opencv")]
pub mod cv;
pub mod quad;
pub mod threshold;

pub use dictionary::Dictionary;
pub use native::NativeDetector;

/// Markers found in one frame
///
/// `corners[i]` belongs to `ids[i]`. Corners are top-left, top-right, bottom-right, bottom-left
/// of the marker, which is clockwise in the image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detections {
    pub corners: Vec<[Point2<f64>; 4]>,
    pub ids: Vec<u32>,
}
impl Detections {
    pub fn push(&mut self, corners: [Point2<f64>; 4], id: u32) {
        self.corners.push(corners);
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(id, corners)` pairs in detection order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[Point2<f64>; 4])> {
        self.ids.iter().copied().zip(self.corners.iter())
    }
}

/// Something that finds markers in a grayscale frame
pub trait MarkerDetector: Send {
    fn detect(&mut self, gray: &GrayImage) -> Result<Detections>;
}
impl<D: MarkerDetector + ?Sized> MarkerDetector for Box<D> {
    fn detect(&mut self, gray: &GrayImage) -> Result<Detections> {
        (**self).detect(gray)
    }
}

/// Which detector [DetectorKind::Auto] resolves to
///
/// OpenCV when it's compiled in and no dictionary file is given, the native detector with a
/// dictionary file or the embedded tables otherwise.
pub fn resolve_kind(marker: &MarkerCfg) -> DetectorKind {
    match marker.detector {
        DetectorKind::Auto if marker.dictionary_path.is_none() && cfg!(feature = "opencv") => {
            DetectorKind::Opencv
        }
        DetectorKind::Auto => DetectorKind::Native,
        kind => kind,
    }
}

/// Build the configured detector
pub fn build_detector(marker: &MarkerCfg, detection: &DetectionCfg) -> Result<Box<dyn MarkerDetector>> {
    match resolve_kind(marker) {
        DetectorKind::Opencv => {
            #[cfg(feature = "opencv")]
            {
                let detector = cv::OpenCvDetector::new(&marker.dictionary, detection)?;
                info!("using the OpenCV detector with {}", marker.dictionary);
                Ok(Box::new(detector))
            }
            #[cfg(not(feature = "opencv"))]
            {
                BackendUnavailableSnafu { backend: "opencv" }.fail()
            }
        }
        _ => {
            let dictionary = match &marker.dictionary_path {
                Some(path) => {
                    let dictionary = Dictionary::load(path)?;
                    if dictionary.name != marker.dictionary {
                        warn!(
                            "dictionary file {} contains {}, not {}",
                            path.display(),
                            dictionary.name,
                            marker.dictionary
                        );
                    }
                    dictionary
                }
                None => Dictionary::builtin(&marker.dictionary).context(DictionaryUnavailableSnafu {
                    name: marker.dictionary.clone(),
                    detector: "native",
                })?,
            };
            info!("using the native detector with {}", dictionary.name);
            Ok(Box::new(NativeDetector::new(dictionary, detection.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn native_uses_the_embedded_tables() {
        let marker = MarkerCfg {
            detector: DetectorKind::Native,
            ..Default::default()
        };
        assert!(build_detector(&marker, &DetectionCfg::default()).is_ok());
    }

    #[test]
    fn unknown_dictionary_without_a_file() {
        let marker = MarkerCfg {
            detector: DetectorKind::Native,
            dictionary: "DICT_9X9_3".to_owned(),
            ..Default::default()
        };
        let err = build_detector(&marker, &DetectionCfg::default()).err().unwrap();
        assert!(matches!(err, Error::DictionaryUnavailable { .. }), "{err}");
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn default_config_detects_without_features() {
        let marker = MarkerCfg::default();
        assert_eq!(resolve_kind(&marker), DetectorKind::Native);
        assert!(build_detector(&marker, &DetectionCfg::default()).is_ok());
    }

    #[test]
    fn auto_prefers_native_with_a_dictionary_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"name":"DICT_6X6_100","marker_size":3,"max_correction_bits":0,"codes":[5]}}"#).unwrap();

        let marker = MarkerCfg {
            dictionary_path: Some(f.path().to_owned()),
            ..Default::default()
        };
        assert_eq!(resolve_kind(&marker), DetectorKind::Native);
        assert!(build_detector(&marker, &DetectionCfg::default()).is_ok());
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn opencv_without_the_feature() {
        let marker = MarkerCfg {
            detector: DetectorKind::Opencv,
            ..Default::default()
        };
        let err = build_detector(&marker, &DetectionCfg::default()).err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
    }

    #[test]
    fn detections_pair_ids_with_corners() {
        let mut d = Detections::default();
        assert!(d.is_empty());
        let c = [Point2::origin(); 4];
        d.push(c, 7);
        d.push(c, 3);
        assert_eq!(d.len(), 2);
        assert_eq!(d.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![7, 3]);
    }
}
