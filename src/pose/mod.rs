//!
//! Single-marker pose estimation
//!

use nalgebra::{
    Isometry3, Matrix2x3, Matrix3, Matrix6, Point2, Point3, Rotation3, SMatrix, Translation3,
    UnitQuaternion, Vector3,
};

use crate::calibration::Calibration;
use crate::error::{Error, Result};
use crate::geometry::Homography;

pub mod rotation;

pub use rotation::rvec_to_quaternion;

const LM_MAX_ITERATIONS: usize = 50;

/// Pose of one marker in the camera frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    /// Rotation vector (axis * angle, radians)
    pub rvec: Vector3<f64>,
    /// Translation of the marker's center, in the units of the marker length
    pub tvec: Vector3<f64>,
    /// Mean distance between detected and reprojected corners, in pixels
    pub reprojection_error: f64,
}
impl PoseEstimate {
    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.tvec),
            UnitQuaternion::from_scaled_axis(self.rvec),
        )
    }
}

/// Marker corners in the marker's own frame
///
/// Top-left, top-right, bottom-right, bottom-left with the marker in the `z = 0` plane, x right
/// and y up. This is the same layout as OpenCV's `estimatePoseSingleMarkers`.
pub fn marker_object_points(length: f64) -> [Point3<f64>; 4] {
    let h = length / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

fn degenerate(reason: impl Into<String>) -> Error {
    Error::DegeneratePose {
        reason: reason.into(),
    }
}

/// Estimate the pose of a square marker from its four image corners
///
/// Corners are in pixels, ordered top-left, top-right, bottom-right, bottom-left.
pub fn estimate_single_marker(
    corners: &[Point2<f64>; 4],
    length: f64,
    calib: &Calibration,
) -> Result<PoseEstimate> {
    if !(length.is_finite() && length > 0.0) {
        return Err(degenerate(format!("marker length must be positive, got {length}")));
    }
    if corners.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(degenerate("non-finite corner"));
    }

    let object = marker_object_points(length);
    let normalized = corners.map(|c| calib.undistort(c));

    let (rot, t) = initial_pose(&object, &normalized)?;
    let (rot, t) = refine(&object, &normalized, rot, t);

    if object.iter().any(|p| (rot * p.coords + t).z <= 0.0) {
        return Err(degenerate("marker behind the camera"));
    }

    let mut reprojection_error = 0.0;
    for (p, c) in object.iter().zip(corners) {
        let px = calib
            .project(&Point3::from(rot * p.coords + t))
            .ok_or_else(|| degenerate("marker behind the camera"))?;
        reprojection_error += (px - c).norm() / 4.0;
    }

    let rvec = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rot)).scaled_axis();

    if !(rvec.iter().chain(t.iter()).all(|v| v.is_finite()) && reprojection_error.is_finite()) {
        return Err(degenerate("non-finite result"));
    }

    Ok(PoseEstimate {
        rvec,
        tvec: t,
        reprojection_error,
    })
}

/// Decompose the plane-to-image homography into a rotation and translation
///
/// Works in normalized coordinates, so `K` is the identity here.
fn initial_pose(
    object: &[Point3<f64>; 4],
    normalized: &[Point2<f64>; 4],
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let plane = object.map(|p| Point2::new(p.x, p.y));
    let h = Homography::from_4pt(&plane, normalized)
        .ok_or_else(|| degenerate("corners are collinear"))?
        .0;

    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let denom = (h1.norm() + h2.norm()) * 0.5;
    if denom <= 1e-12 {
        return Err(degenerate("degenerate homography"));
    }
    let lambda = 1.0 / denom;

    let mut r1 = h1 * lambda;
    let mut r2 = h2 * lambda;
    let mut t = h3 * lambda;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return Err(degenerate("degenerate homography"));
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);

    // Project onto SO(3)
    let svd = r.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(degenerate("svd failed")),
    };
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rot = u * v_t;
    }

    Ok((rot, t))
}

/// Normalized reprojection residuals, two per corner
fn residuals(
    object: &[Point3<f64>; 4],
    normalized: &[Point2<f64>; 4],
    rot: &Matrix3<f64>,
    t: &Vector3<f64>,
) -> Option<SMatrix<f64, 8, 1>> {
    let mut r = SMatrix::<f64, 8, 1>::zeros();
    for (i, (p, obs)) in object.iter().zip(normalized).enumerate() {
        let c = rot * p.coords + t;
        if c.z <= 1e-9 {
            return None;
        }
        r[2 * i] = c.x / c.z - obs.x;
        r[2 * i + 1] = c.y / c.z - obs.y;
    }
    Some(r)
}

/// Levenberg-Marquardt on the normalized reprojection error
///
/// Rotation updates are applied on the left, `R <- exp(dw) * R`.
fn refine(
    object: &[Point3<f64>; 4],
    normalized: &[Point2<f64>; 4],
    mut rot: Matrix3<f64>,
    mut t: Vector3<f64>,
) -> (Matrix3<f64>, Vector3<f64>) {
    let Some(mut r) = residuals(object, normalized, &rot, &t) else {
        return (rot, t);
    };
    let mut cost = r.norm_squared();
    let mut mu = 1e-3;

    for _ in 0..LM_MAX_ITERATIONS {
        let mut j = SMatrix::<f64, 8, 6>::zeros();
        for (i, p) in object.iter().enumerate() {
            let rp = rot * p.coords;
            let c = rp + t;
            let iz = 1.0 / c.z;
            let d_proj = Matrix2x3::new(iz, 0.0, -c.x * iz * iz, 0.0, iz, -c.y * iz * iz);
            // d(exp(w) * Rp) / dw at w = 0 is -[Rp]x
            let d_rot = d_proj * -rp.cross_matrix();
            j.fixed_view_mut::<2, 3>(2 * i, 0).copy_from(&d_rot);
            j.fixed_view_mut::<2, 3>(2 * i, 3).copy_from(&d_proj);
        }

        let jtj = j.transpose() * j;
        let jtr = j.transpose() * r;

        let mut improved = false;
        while mu < 1e10 {
            let damped: Matrix6<f64> = jtj + Matrix6::from_diagonal(&jtj.diagonal()) * mu;
            let Some(step) = damped.lu().solve(&-jtr) else {
                mu *= 10.0;
                continue;
            };

            let dw = Vector3::new(step[0], step[1], step[2]);
            let dt = Vector3::new(step[3], step[4], step[5]);
            let cand_rot = Rotation3::new(dw).into_inner() * rot;
            let cand_t = t + dt;

            match residuals(object, normalized, &cand_rot, &cand_t) {
                Some(cand_r) if cand_r.norm_squared() < cost => {
                    rot = cand_rot;
                    t = cand_t;
                    r = cand_r;
                    let prev = cost;
                    cost = r.norm_squared();
                    mu = (mu / 10.0).max(1e-12);
                    improved = prev - cost > 1e-18 * prev.max(1e-30) && step.norm() > 1e-14;
                    break;
                }
                _ => mu *= 10.0,
            }
        }

        if !improved {
            break;
        }
    }

    (rot, t)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn project_corners(iso: &Isometry3<f64>, length: f64, calib: &Calibration) -> [Point2<f64>; 4] {
        marker_object_points(length).map(|p| calib.project(&(iso * p)).unwrap())
    }

    fn assert_pose(est: &PoseEstimate, truth: &Isometry3<f64>, tol_t: f64, tol_r: f64) {
        assert!(
            (est.tvec - truth.translation.vector).norm() < tol_t,
            "translation {:?} vs {:?}",
            est.tvec,
            truth.translation.vector
        );
        let angle = est.isometry().rotation.angle_to(&truth.rotation);
        assert!(angle < tol_r, "rotation off by {angle} rad");
    }

    #[test]
    fn recovers_pose_with_identity_intrinsics() {
        let calib = Calibration::ideal(1.0, 1.0, 0.0, 0.0).unwrap();
        let truth = Isometry3::new(Vector3::new(0.02, -0.01, 0.4), Vector3::new(0.3, -0.2, 0.1));

        let corners = project_corners(&truth, 0.05, &calib);
        let est = estimate_single_marker(&corners, 0.05, &calib).unwrap();

        assert_pose(&est, &truth, 1e-9, 1e-9);
        assert!(est.reprojection_error < 1e-9);
    }

    #[test]
    fn recovers_pose_with_distortion() {
        let k = Matrix3::new(600.0, 0.0, 320.0, 0.0, 600.0, 240.0, 0.0, 0.0, 1.0);
        let calib = Calibration::new(k, vec![-0.15, 0.04, 0.0005, -0.0003, 0.0]).unwrap();
        let truth = Isometry3::new(Vector3::new(-0.05, 0.03, 0.3), Vector3::new(-0.4, 0.25, 2.0));

        let corners = project_corners(&truth, 0.05, &calib);
        let est = estimate_single_marker(&corners, 0.05, &calib).unwrap();

        assert_pose(&est, &truth, 1e-7, 1e-6);
        assert!(est.reprojection_error < 1e-6);
    }

    #[test]
    fn refinement_reduces_noisy_error() {
        let calib = Calibration::ideal(800.0, 800.0, 400.0, 300.0).unwrap();
        let truth = Isometry3::new(Vector3::new(0.0, 0.0, 0.5), Vector3::new(0.5, 0.0, 0.0));
        let mut corners = project_corners(&truth, 0.1, &calib);
        corners[0].x += 0.4;
        corners[2].y -= 0.3;

        let est = estimate_single_marker(&corners, 0.1, &calib).unwrap();
        assert_pose(&est, &truth, 2e-3, 0.05);
        assert!(est.reprojection_error < 0.5);
    }

    #[test]
    fn translation_scales_with_marker_length() {
        let calib = Calibration::ideal(600.0, 600.0, 320.0, 240.0).unwrap();
        let truth = Isometry3::new(Vector3::new(0.0, 0.0, 0.25), Vector3::zeros());
        let corners = project_corners(&truth, 0.05, &calib);

        let est = estimate_single_marker(&corners, 0.1, &calib).unwrap();
        assert_relative_eq!(est.tvec.z, 0.5, epsilon = 1e-9);
        assert_relative_eq!(est.rvec.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rejects_bad_input() {
        let calib = Calibration::ideal(600.0, 600.0, 320.0, 240.0).unwrap();
        let corners = [
            Point2::new(300.0, 200.0),
            Point2::new(340.0, 200.0),
            Point2::new(340.0, 240.0),
            Point2::new(300.0, 240.0),
        ];
        assert!(matches!(
            estimate_single_marker(&corners, 0.0, &calib),
            Err(Error::DegeneratePose { .. })
        ));

        let line = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(2.0, 2.0),
            Point2::new(3.0, 3.0),
        ];
        assert!(estimate_single_marker(&line, 0.05, &calib).is_err());
    }
}
