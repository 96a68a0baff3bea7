//! OpenCV `objdetect` marker detector.

use image::GrayImage;
use nalgebra::Point2;
use opencv::{
    core::{Mat, Point2f, Scalar, Vector, CV_8UC1},
    objdetect::{
        get_predefined_dictionary, ArucoDetector, CornerRefineMethod, DetectorParameters,
        PredefinedDictionaryType, RefineParameters,
    },
    prelude::*,
};

use super::{Detections, MarkerDetector};
use crate::config::DetectionCfg;
use crate::error::*;

fn cv_err(err: opencv::Error) -> Error {
    Error::DetectionFailed {
        reason: err.to_string(),
    }
}

/// Map an OpenCV dictionary name to its predefined dictionary
pub fn predefined_dictionary(name: &str) -> Option<PredefinedDictionaryType> {
    use PredefinedDictionaryType::*;

    Some(match name {
        "DICT_4X4_50" => DICT_4X4_50,
        "DICT_4X4_100" => DICT_4X4_100,
        "DICT_4X4_250" => DICT_4X4_250,
        "DICT_4X4_1000" => DICT_4X4_1000,
        "DICT_5X5_50" => DICT_5X5_50,
        "DICT_5X5_100" => DICT_5X5_100,
        "DICT_5X5_250" => DICT_5X5_250,
        "DICT_5X5_1000" => DICT_5X5_1000,
        "DICT_6X6_50" => DICT_6X6_50,
        "DICT_6X6_100" => DICT_6X6_100,
        "DICT_6X6_250" => DICT_6X6_250,
        "DICT_6X6_1000" => DICT_6X6_1000,
        "DICT_7X7_50" => DICT_7X7_50,
        "DICT_7X7_100" => DICT_7X7_100,
        "DICT_7X7_250" => DICT_7X7_250,
        "DICT_7X7_1000" => DICT_7X7_1000,
        "DICT_ARUCO_ORIGINAL" => DICT_ARUCO_ORIGINAL,
        "DICT_APRILTAG_16h5" => DICT_APRILTAG_16h5,
        "DICT_APRILTAG_25h9" => DICT_APRILTAG_25h9,
        "DICT_APRILTAG_36h10" => DICT_APRILTAG_36h10,
        "DICT_APRILTAG_36h11" => DICT_APRILTAG_36h11,
        _ => return None,
    })
}

/// Copy a grayscale image into a single channel [Mat]
pub fn gray_to_mat(gray: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        gray.height() as i32,
        gray.width() as i32,
        CV_8UC1,
        Scalar::all(0.0),
    )?;
    let width = gray.width() as usize;
    for (y, row) in gray.as_raw().chunks_exact(width).enumerate() {
        mat.at_row_mut::<u8>(y as i32)?.copy_from_slice(row);
    }
    Ok(mat)
}

pub struct OpenCvDetector {
    detector: ArucoDetector,
}
impl OpenCvDetector {
    pub fn new(dictionary: &str, cfg: &DetectionCfg) -> Result<Self> {
        let Some(kind) = predefined_dictionary(dictionary) else {
            return DictionaryUnavailableSnafu {
                name: dictionary,
                detector: "opencv",
            }
            .fail();
        };
        let dict = get_predefined_dictionary(kind).map_err(cv_err)?;

        let mut params = DetectorParameters::default().map_err(cv_err)?;
        // OpenCV wants an odd window of at least 3
        let window = (cfg.adaptive_window.max(3) | 1) as i32;
        params.set_adaptive_thresh_win_size_min(window);
        params.set_adaptive_thresh_win_size_max(window);
        params.set_adaptive_thresh_constant(cfg.adaptive_offset as f64);
        params.set_min_marker_perimeter_rate(cfg.min_marker_perimeter_rate);
        params.set_max_marker_perimeter_rate(cfg.max_marker_perimeter_rate);
        params.set_error_correction_rate(cfg.error_correction_rate);
        params.set_max_erroneous_bits_in_border_rate(cfg.max_border_error_rate);
        if cfg.refine_corners {
            params.set_corner_refinement_method(CornerRefineMethod::CORNER_REFINE_SUBPIX as i32);
        }

        let refine = RefineParameters::new(10.0, 3.0, true).map_err(cv_err)?;
        let detector = ArucoDetector::new(&dict, &params, refine).map_err(cv_err)?;

        Ok(Self { detector })
    }
}
impl MarkerDetector for OpenCvDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Detections> {
        let mat = gray_to_mat(gray).map_err(cv_err)?;

        let mut corners: Vector<Vector<Point2f>> = Vector::new();
        let mut ids: Vector<i32> = Vector::new();
        let mut rejected: Vector<Vector<Point2f>> = Vector::new();
        self.detector
            .detect_markers(&mat, &mut corners, &mut ids, &mut rejected)
            .map_err(cv_err)?;

        let mut found = Detections::default();
        for (quad, id) in corners.iter().zip(ids.iter()) {
            if quad.len() != 4 || id < 0 {
                continue;
            }
            let mut out = [Point2::origin(); 4];
            for (dst, p) in out.iter_mut().zip(quad.iter()) {
                *dst = Point2::new(p.x as f64, p.y as f64);
            }
            found.push(out, id as u32);
        }

        Ok(found)
    }
}
