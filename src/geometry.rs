//!
//! Plane-to-plane homographies
//!

use nalgebra::{Matrix3, Point2, SMatrix, SVector};

/// A projective map between two planes, `dst ~ H * src`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);
impl Homography {
    /// Solve for H from exactly four correspondences
    ///
    /// Corner order must be consistent between `src` and `dst`. Returns `None` if three of the
    /// points are collinear.
    pub fn from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Self> {
        // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
        let (src_n, t_src) = normalize(src)?;
        let (dst_n, t_dst) = normalize(dst)?;

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for k in 0..4 {
            let (x, y) = (src_n[k].x, src_n[k].y);
            let (u, v) = (dst_n[k].x, dst_n[k].y);

            let r0 = 2 * k;
            a[(r0, 0)] = x;
            a[(r0, 1)] = y;
            a[(r0, 2)] = 1.0;
            a[(r0, 6)] = -u * x;
            a[(r0, 7)] = -u * y;
            b[r0] = u;

            let r1 = 2 * k + 1;
            a[(r1, 3)] = x;
            a[(r1, 4)] = y;
            a[(r1, 5)] = 1.0;
            a[(r1, 6)] = -v * x;
            a[(r1, 7)] = -v * y;
            b[r1] = v;
        }

        let x = a.lu().solve(&b)?;
        let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);

        // H = T_dst^-1 * Hn * T_src
        let h = t_dst.try_inverse()? * hn * t_src;
        if h[(2, 2)].abs() < 1e-12 || h.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(Self(h / h[(2, 2)]))
    }

    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let q = self.0 * p.to_homogeneous();
        Point2::new(q.x / q.z, q.y / q.z)
    }
}

/// Hartley normalization: centroid at the origin, mean distance sqrt(2)
fn normalize(pts: &[Point2<f64>; 4]) -> Option<([Point2<f64>; 4], Matrix3<f64>)> {
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    if mean_dist < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts.map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)));

    // Any three collinear points make the system singular
    for skip in 0..4 {
        let tri: Vec<_> = (0..4).filter(|&i| i != skip).map(|i| out[i]).collect();
        if signed_area2(&tri).abs() < 1e-9 {
            return None;
        }
    }

    Some((out, t))
}

/// Twice the signed area of a polygon (positive for clockwise corners in y-down images)
pub fn signed_area2(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    (0..n)
        .map(|i| {
            let (a, b) = (pts[i], pts[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn square() -> [Point2<f64>; 4] {
        [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn maps_corners_exactly() {
        let dst = [
            Point2::new(102.0, 48.5),
            Point2::new(211.0, 60.0),
            Point2::new(199.5, 170.0),
            Point2::new(95.0, 155.0),
        ];
        let h = Homography::from_4pt(&square(), &dst).unwrap();
        for (s, d) in square().iter().zip(&dst) {
            let p = h.apply(*s);
            assert_relative_eq!(p.x, d.x, epsilon = 1e-9);
            assert_relative_eq!(p.y, d.y, epsilon = 1e-9);
        }

        let center = h.apply(Point2::new(0.5, 0.5));
        assert!(center.x > 95.0 && center.x < 211.0);
    }

    #[test]
    fn collinear_points_fail() {
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
            Point2::new(3.0, 3.0),
        ];
        assert!(Homography::from_4pt(&square(), &dst).is_none());
    }

    #[test]
    fn clockwise_is_positive_in_image_coordinates() {
        assert!(signed_area2(&square()) > 0.0);
        let mut ccw = square();
        ccw.reverse();
        assert!(signed_area2(&ccw) < 0.0);
    }
}
