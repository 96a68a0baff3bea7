//! Pure Rust marker detector.

use image::GrayImage;
use nalgebra::Point2;

use super::dictionary::{Dictionary, Match, Matcher};
use super::quad::{components, fit_quad, refine_edges, sample_bilinear, QuadLimits};
use super::threshold::{binarize_adaptive, binarize_otsu, otsu_threshold};
use super::{Detections, MarkerDetector};
use crate::config::{DetectionCfg, ThresholdMethod};
use crate::error::Result;
use crate::geometry::{signed_area2, Homography};

/// Blobs smaller than this are noise
const MIN_COMPONENT_PIXELS: usize = 16;
/// Cells whose means span less than this are considered uniform
const MIN_CELL_CONTRAST: u8 = 20;
/// Sample offsets within a cell, in cell units
const CELL_SAMPLES: [f64; 3] = [0.3, 0.5, 0.7];

/// Detects square markers of one dictionary in grayscale frames
pub struct NativeDetector {
    dictionary: Dictionary,
    matcher: Matcher,
    cfg: DetectionCfg,
}
impl NativeDetector {
    pub fn new(dictionary: Dictionary, cfg: DetectionCfg) -> Self {
        let max_hamming = (dictionary.max_correction_bits as f64 * cfg.error_correction_rate.clamp(0.0, 1.0))
            .floor() as u8;
        let matcher = Matcher::new(&dictionary, max_hamming);

        debug!(
            "native detector: {} ({} markers, {}x{} bits, up to {max_hamming} corrected)",
            dictionary.name,
            dictionary.len(),
            dictionary.marker_size,
            dictionary.marker_size,
        );

        Self {
            dictionary,
            matcher,
            cfg,
        }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Candidate quads in component discovery order
    pub fn candidates(&self, gray: &GrayImage) -> Vec<[Point2<f64>; 4]> {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let mask = match self.cfg.threshold {
            ThresholdMethod::Adaptive => {
                binarize_adaptive(gray, self.cfg.adaptive_window, self.cfg.adaptive_offset)
            }
            ThresholdMethod::Otsu => binarize_otsu(gray),
        };

        let max_dim = w.max(h) as f64;
        let limits = QuadLimits {
            min_perimeter: self.cfg.min_marker_perimeter_rate * max_dim,
            max_perimeter: self.cfg.max_marker_perimeter_rate * max_dim,
            width: w as f64,
            height: h as f64,
        };

        components(&mask, w, h, MIN_COMPONENT_PIXELS)
            .iter()
            .filter_map(|comp| fit_quad(comp, &limits))
            .map(|mut quad| {
                if self.cfg.refine_corners {
                    refine_edges(gray, &mut quad);
                }
                quad
            })
            .collect()
    }

    /// Read the bits inside a quad and look them up in the dictionary
    fn decode(&self, gray: &GrayImage, quad: &[Point2<f64>; 4]) -> Option<Match> {
        let n = self.matcher.marker_size();
        let cells = n + 2;
        let side = cells as f64;

        let grid = [
            Point2::new(0.0, 0.0),
            Point2::new(side, 0.0),
            Point2::new(side, side),
            Point2::new(0.0, side),
        ];
        let h = Homography::from_4pt(&grid, quad)?;

        let mut means = Vec::with_capacity(cells * cells);
        for cy in 0..cells {
            for cx in 0..cells {
                let mut sum = 0.0;
                for oy in CELL_SAMPLES {
                    for ox in CELL_SAMPLES {
                        let p = h.apply(Point2::new(cx as f64 + ox, cy as f64 + oy));
                        sum += sample_bilinear(gray, p.x, p.y)?;
                    }
                }
                means.push((sum / 9.0).round().clamp(0.0, 255.0) as u8);
            }
        }

        let (lo, hi) = means
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &m| (lo.min(m), hi.max(m)));
        if hi - lo < MIN_CELL_CONTRAST {
            return None;
        }
        let threshold = otsu_threshold(&means);
        let black = |cx: usize, cy: usize| means[cy * cells + cx] <= threshold;

        let on_border = |cx: usize, cy: usize| cx == 0 || cy == 0 || cx == cells - 1 || cy == cells - 1;
        let border_white = (0..cells * cells)
            .map(|i| (i % cells, i / cells))
            .filter(|&(cx, cy)| on_border(cx, cy) && !black(cx, cy))
            .count();
        let border_cells = 4 * (cells - 1);
        if border_white as f64 > self.cfg.max_border_error_rate * border_cells as f64 {
            return None;
        }

        let mut code = 0u64;
        for y in 0..n {
            for x in 0..n {
                if black(x + 1, y + 1) {
                    code |= 1 << (y * n + x);
                }
            }
        }

        self.matcher.match_code(code)
    }
}
impl MarkerDetector for NativeDetector {
    fn detect(&mut self, gray: &GrayImage) -> Result<Detections> {
        let mut found = Detections::default();

        for quad in self.candidates(gray) {
            // Nested blobs (inner bits) of an already accepted marker
            let center = quad.iter().fold(Point2::origin(), |acc, p| acc + p.coords / 4.0);
            if found.corners.iter().any(|outer| contains(outer, &center)) {
                continue;
            }

            let Some(m) = self.decode(gray, &quad) else {
                continue;
            };
            trace!("marker {} (rotation {}, {} bits corrected)", m.id, m.rotation, m.hamming);

            // Corner 0 is wherever the dictionary's top-left ended up
            let r = m.rotation as usize;
            let corners = [quad[r % 4], quad[(r + 1) % 4], quad[(r + 2) % 4], quad[(r + 3) % 4]];
            found.push(corners, m.id);
        }

        Ok(found)
    }
}

/// Whether `p` lies inside a clockwise convex quad
fn contains(quad: &[Point2<f64>; 4], p: &Point2<f64>) -> bool {
    (0..4).all(|i| signed_area2(&[quad[i], quad[(i + 1) % 4], *p]) >= 0.0)
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::detect::dictionary::pack_rows;

    fn dict() -> Dictionary {
        Dictionary::new(
            "TEST_4X4",
            4,
            2,
            vec![
                pack_rows(&["1011", "0010", "1100", "0111"]).unwrap(),
                pack_rows(&["0101", "1001", "0110", "1110"]).unwrap(),
            ],
        )
        .unwrap()
    }

    /// Axis-aligned marker with `cell` pixels per bit, top-left corner at `(ox, oy)`
    fn draw(img: &mut GrayImage, dict: &Dictionary, id: usize, ox: u32, oy: u32, cell: u32) {
        let cells = dict.marker_size as u32 + 2;
        for y in 0..cells * cell {
            for x in 0..cells * cell {
                let (cx, cy) = ((x / cell) as usize, (y / cell) as usize);
                let border = cx == 0 || cy == 0 || cx == cells as usize - 1 || cy == cells as usize - 1;
                let dark = border || dict.bit(id, cx - 1, cy - 1);
                img.put_pixel(ox + x, oy + y, Luma([if dark { 20 } else { 235 }]));
            }
        }
    }

    fn detector() -> NativeDetector {
        NativeDetector::new(dict(), DetectionCfg::default())
    }

    #[test]
    fn detects_upright_markers_top_first() {
        let dict = dict();
        let mut img = GrayImage::from_pixel(200, 160, Luma([235]));
        draw(&mut img, &dict, 1, 110, 20, 8);
        draw(&mut img, &dict, 0, 20, 90, 8);

        let found = detector().detect(&img).unwrap();
        assert_eq!(found.ids, vec![1, 0]);

        // Top-left corner of marker 1 is at the pixel edge (109.5, 19.5)
        let tl = found.corners[0][0];
        assert!((tl.x - 109.5).abs() < 0.5 && (tl.y - 19.5).abs() < 0.5, "{tl:?}");
        let br = found.corners[0][2];
        assert!((br.x - 157.5).abs() < 0.5 && (br.y - 67.5).abs() < 0.5, "{br:?}");
    }

    #[test]
    fn corners_follow_marker_rotation() {
        let dict = dict();
        let mut img = GrayImage::from_pixel(120, 120, Luma([235]));
        draw(&mut img, &dict, 0, 30, 30, 8);
        // Rotate the whole frame a quarter turn clockwise
        let img = image::imageops::rotate90(&img);

        let found = detector().detect(&img).unwrap();
        assert_eq!(found.ids, vec![0]);

        // The marker's top-left is now the image top-right corner of the square
        let tl = found.corners[0][0];
        let tr = found.corners[0][1];
        assert!(tl.x > tr.x - 1.0 && tl.y < tr.y, "tl {tl:?} tr {tr:?}");
        assert!(signed_area2(&found.corners[0]) > 0.0);
    }

    #[test]
    fn empty_frame_has_no_markers() {
        let img = GrayImage::from_pixel(64, 48, Luma([128]));
        assert!(detector().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn plain_black_square_is_rejected() {
        let mut img = GrayImage::from_pixel(100, 100, Luma([235]));
        for y in 30..70 {
            for x in 30..70 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        assert!(detector().detect(&img).unwrap().is_empty());
    }

    #[test]
    fn otsu_threshold_mode() {
        let dict = dict();
        let mut img = GrayImage::from_pixel(100, 100, Luma([235]));
        draw(&mut img, &dict, 1, 25, 25, 8);

        let cfg = DetectionCfg {
            threshold: ThresholdMethod::Otsu,
            ..Default::default()
        };
        let found = NativeDetector::new(dict, cfg).detect(&img).unwrap();
        assert_eq!(found.ids, vec![1]);
    }

    #[test]
    fn quad_containment() {
        let quad = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        assert!(contains(&quad, &Point2::new(5.0, 5.0)));
        assert!(!contains(&quad, &Point2::new(15.0, 5.0)));
    }
}
