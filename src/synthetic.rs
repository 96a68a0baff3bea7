//!
//! Synthetic marker frames
//!
//! Renders markers seen through a calibrated camera, for tests and for replaying known poses
//! without hardware.
//!

use image::{GrayImage, Luma};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};

use crate::calibration::Calibration;
use crate::detect::Dictionary;
use crate::pose::marker_object_points;

pub const WHITE: u8 = 225;
pub const BLACK: u8 = 30;
/// Sub-samples per pixel side
const SUPERSAMPLE: usize = 4;

/// One marker placed in front of the camera
#[derive(Debug, Clone)]
pub struct SyntheticMarker<'a> {
    pub dictionary: &'a Dictionary,
    pub id: usize,
    /// Side length of the black square
    pub length: f64,
    /// Marker frame to camera frame
    pub pose: Isometry3<f64>,
}
impl SyntheticMarker<'_> {
    /// Intensity of the marker at a point of its `z = 0` plane, `None` outside the marker
    fn shade(&self, x: f64, y: f64) -> Option<u8> {
        let half = self.length / 2.0;
        if x < -half || x >= half || y <= -half || y > half {
            return None;
        }

        let cells = self.dictionary.marker_size + 2;
        let col = (((x + half) / self.length) * cells as f64) as usize;
        let row = (((half - y) / self.length) * cells as f64) as usize;
        let (col, row) = (col.min(cells - 1), row.min(cells - 1));

        let border = col == 0 || row == 0 || col == cells - 1 || row == cells - 1;
        let black = border || self.dictionary.bit(self.id, col - 1, row - 1);
        Some(if black { BLACK } else { WHITE })
    }

    /// Where the marker's corners land in the image
    pub fn project_corners(&self, calibration: &Calibration) -> Option<[Point2<f64>; 4]> {
        let obj = marker_object_points(self.length);
        Some([
            calibration.project(&(self.pose * obj[0]))?,
            calibration.project(&(self.pose * obj[1]))?,
            calibration.project(&(self.pose * obj[2]))?,
            calibration.project(&(self.pose * obj[3]))?,
        ])
    }
}

/// A marker pose facing the camera, upright, at `translation`, then rotated by `tilt`
///
/// `tilt` is a rotation vector in the marker's own frame.
pub fn facing_camera(translation: Vector3<f64>, tilt: Vector3<f64>) -> Isometry3<f64> {
    let facing = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI);
    Isometry3::from_parts(
        Translation3::from(translation),
        facing * UnitQuaternion::from_scaled_axis(tilt),
    )
}

/// A plain white frame
pub fn blank_frame(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([WHITE]))
}

/// Draw a marker into a frame, anti-aliased
pub fn draw_marker(img: &mut GrayImage, calibration: &Calibration, marker: &SyntheticMarker) {
    let (w, h) = (img.width() as i64, img.height() as i64);

    // Only visit pixels around the projected marker
    let (x0, y0, x1, y1) = match marker.project_corners(calibration) {
        Some(corners) => {
            let (mut lo, mut hi) = (corners[0], corners[0]);
            for c in &corners[1..] {
                lo = Point2::new(lo.x.min(c.x), lo.y.min(c.y));
                hi = Point2::new(hi.x.max(c.x), hi.y.max(c.y));
            }
            (
                (lo.x.floor() as i64 - 2).clamp(0, w),
                (lo.y.floor() as i64 - 2).clamp(0, h),
                (hi.x.ceil() as i64 + 3).clamp(0, w),
                (hi.y.ceil() as i64 + 3).clamp(0, h),
            )
        }
        None => (0, 0, w, h),
    };

    let inverse = marker.pose.inverse();
    // Camera center and the plane normal, in marker coordinates
    let origin = inverse * Point3::origin();

    for v in y0..y1 {
        for u in x0..x1 {
            let background = img.get_pixel(u as u32, v as u32).0[0] as f64;
            let (mut sum, mut hits) = (0.0, 0);

            for sy in 0..SUPERSAMPLE {
                for sx in 0..SUPERSAMPLE {
                    let px = Point2::new(
                        u as f64 + (sx as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5,
                        v as f64 + (sy as f64 + 0.5) / SUPERSAMPLE as f64 - 0.5,
                    );
                    let n = calibration.undistort(px);
                    let dir = inverse * Vector3::new(n.x, n.y, 1.0);
                    if dir.z.abs() < 1e-12 {
                        sum += background;
                        continue;
                    }

                    let s = -origin.z / dir.z;
                    if s <= 0.0 {
                        sum += background;
                        continue;
                    }
                    let hit = origin + dir * s;
                    match marker.shade(hit.x, hit.y) {
                        Some(shade) => {
                            sum += shade as f64;
                            hits += 1;
                        }
                        None => sum += background,
                    }
                }
            }

            if hits > 0 {
                let value = sum / (SUPERSAMPLE * SUPERSAMPLE) as f64;
                img.put_pixel(u as u32, v as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
            }
        }
    }
}

/// Render one marker on a white frame
pub fn render_marker(calibration: &Calibration, width: u32, height: u32, marker: &SyntheticMarker) -> GrayImage {
    let mut img = blank_frame(width, height);
    draw_marker(&mut img, calibration, marker);
    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::dictionary::pack_rows;

    fn dict() -> Dictionary {
        Dictionary::new("T", 3, 0, vec![pack_rows(&["100", "000", "000"]).unwrap()]).unwrap()
    }

    #[test]
    fn upright_marker_layout() {
        let dict = dict();
        let calib = Calibration::ideal(500.0, 500.0, 100.0, 100.0).unwrap();
        // 5 cells of 20 px each, centered
        let marker = SyntheticMarker {
            dictionary: &dict,
            id: 0,
            length: 0.2,
            pose: facing_camera(Vector3::new(0.0, 0.0, 1.0), Vector3::zeros()),
        };
        let img = render_marker(&calib, 200, 200, &marker);

        let at = |x: u32, y: u32| img.get_pixel(x, y).0[0];
        // Outside, border, the black top-left bit, a white bit
        assert_eq!(at(5, 5), WHITE);
        assert_eq!(at(60, 60), BLACK);
        assert_eq!(at(80, 80), BLACK);
        assert_eq!(at(100, 100), WHITE);
        assert_eq!(at(120, 80), WHITE);

        let corners = marker.project_corners(&calib).unwrap();
        assert!((corners[0] - Point2::new(50.0, 50.0)).norm() < 1e-9);
        assert!((corners[2] - Point2::new(150.0, 150.0)).norm() < 1e-9);
    }

    #[test]
    fn marker_behind_camera_is_invisible() {
        let dict = dict();
        let calib = Calibration::ideal(500.0, 500.0, 50.0, 50.0).unwrap();
        let marker = SyntheticMarker {
            dictionary: &dict,
            id: 0,
            length: 0.2,
            pose: facing_camera(Vector3::new(0.0, 0.0, -1.0), Vector3::zeros()),
        };
        let img = render_marker(&calib, 100, 100, &marker);
        assert!(img.pixels().all(|p| p.0[0] == WHITE));
    }
}
