use nalgebra::{UnitQuaternion, Vector3};

use crate::config::RotationConvention;

/// Convert a rotation vector to a unit quaternion
///
/// [RotationConvention::EulerRpy] reads the three components as static-axis roll, pitch and
/// yaw (`Rz(yaw) * Ry(pitch) * Rx(roll)`). That is not what a rotation vector means, but
/// consumers calibrated against older publishers expect it.
pub fn rvec_to_quaternion(rvec: &Vector3<f64>, convention: RotationConvention) -> UnitQuaternion<f64> {
    match convention {
        RotationConvention::AxisAngle => UnitQuaternion::from_scaled_axis(*rvec),
        RotationConvention::EulerRpy => UnitQuaternion::from_euler_angles(rvec.x, rvec.y, rvec.z),
    }
}

/// Quaternion components in `x, y, z, w` order
pub fn xyzw(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.i, q.j, q.k, q.w]
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn quarter_turn_about_z() {
        let q = rvec_to_quaternion(&Vector3::new(0.0, 0.0, FRAC_PI_2), RotationConvention::AxisAngle);
        let [x, y, z, w] = xyzw(&q);
        assert_relative_eq!(x, 0.0);
        assert_relative_eq!(y, 0.0);
        assert_relative_eq!(z, FRAC_PI_4.sin(), epsilon = 1e-12);
        assert_relative_eq!(w, FRAC_PI_4.cos(), epsilon = 1e-12);
    }

    #[test]
    fn zero_vector_is_identity() {
        for convention in [RotationConvention::AxisAngle, RotationConvention::EulerRpy] {
            let q = rvec_to_quaternion(&Vector3::zeros(), convention);
            assert_eq!(xyzw(&q), [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn conventions_agree_on_single_axis() {
        for rvec in [Vector3::new(0.7, 0.0, 0.0), Vector3::new(0.0, -0.4, 0.0), Vector3::new(0.0, 0.0, 1.2)] {
            let a = rvec_to_quaternion(&rvec, RotationConvention::AxisAngle);
            let e = rvec_to_quaternion(&rvec, RotationConvention::EulerRpy);
            assert!(a.angle_to(&e) < 1e-12);
        }
    }

    #[test]
    fn conventions_differ_on_compound_rotation() {
        let rvec = Vector3::new(0.6, -0.5, 0.4);
        let a = rvec_to_quaternion(&rvec, RotationConvention::AxisAngle);
        let e = rvec_to_quaternion(&rvec, RotationConvention::EulerRpy);
        assert!(a.angle_to(&e) > 0.05);
        assert_relative_eq!(a.angle(), rvec.norm(), epsilon = 1e-12);
    }

    #[test]
    fn euler_matches_fixed_axis_composition() {
        let (r, p, y) = (0.3, -0.2, 1.1);
        let q = rvec_to_quaternion(&Vector3::new(r, p, y), RotationConvention::EulerRpy);
        let composed = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), y)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), p)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), r);
        assert!(q.angle_to(&composed) < 1e-12);
    }
}
