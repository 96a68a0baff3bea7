//!
//! Pose messages
//!
//! Shaped after ROS `geometry_msgs/PoseStamped` so downstream consumers can map them one to one.
//!

use chrono::{DateTime, Utc};
use nalgebra::UnitQuaternion;

use crate::pose::{rotation::xyzw, PoseEstimate};

/// Seconds + nanoseconds since the Unix epoch
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub secs: i64,
    pub nsecs: u32,
}
impl Time {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nsecs as f64 * 1e-9
    }
}
impl From<DateTime<Utc>> for Time {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            secs: dt.timestamp(),
            nsecs: dt.timestamp_subsec_nanos(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}
impl From<&UnitQuaternion<f64>> for Quaternion {
    fn from(q: &UnitQuaternion<f64>) -> Self {
        let [x, y, z, w] = xyzw(q);
        Self { x, y, z, w }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

/// A pose with a timestamp and the frame it's expressed in
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PoseStamped {
    pub header: Header,
    pub pose: Pose,
}
impl PoseStamped {
    /// Build a message from an estimate and its converted orientation
    pub fn from_estimate(
        estimate: &PoseEstimate,
        orientation: &UnitQuaternion<f64>,
        frame_id: impl Into<String>,
        seq: u32,
        stamp: Time,
    ) -> Self {
        Self {
            header: Header {
                seq,
                stamp,
                frame_id: frame_id.into(),
            },
            pose: Pose {
                position: Point {
                    x: estimate.tvec.x,
                    y: estimate.tvec.y,
                    z: estimate.tvec.z,
                },
                orientation: orientation.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use nalgebra::Vector3;

    use super::*;

    #[test]
    fn copies_translation_and_orientation() {
        let est = PoseEstimate {
            rvec: Vector3::new(0.0, 0.0, 0.5),
            tvec: Vector3::new(0.01, -0.02, 0.3),
            reprojection_error: 0.1,
        };
        let q = UnitQuaternion::from_scaled_axis(est.rvec);
        let stamp = Time { secs: 10, nsecs: 5 };

        let msg = PoseStamped::from_estimate(&est, &q, "aruco_marker", 3, stamp);
        assert_eq!(msg.header.frame_id, "aruco_marker");
        assert_eq!(msg.header.seq, 3);
        assert_eq!(msg.header.stamp, stamp);
        assert_eq!(msg.pose.position, Point { x: 0.01, y: -0.02, z: 0.3 });
        assert_eq!(msg.pose.orientation.z, q.k);
        assert_eq!(msg.pose.orientation.w, q.w);
    }

    #[test]
    fn time_from_chrono() {
        let dt = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let t = Time::from(dt);
        assert_eq!(t, Time { secs: 1_700_000_000, nsecs: 250_000_000 });
        assert_eq!(t.as_secs_f64(), 1_700_000_000.25);
    }

    #[test]
    fn serializes_like_a_ros_message() {
        let msg = PoseStamped {
            header: Header {
                seq: 1,
                stamp: Time { secs: 2, nsecs: 3 },
                frame_id: "f".to_owned(),
            },
            pose: Pose {
                position: Point { x: 1.0, y: 2.0, z: 3.0 },
                orientation: Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 },
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["header"]["frame_id"], "f");
        assert_eq!(json["header"]["stamp"]["nsecs"], 3);
        assert_eq!(json["pose"]["orientation"]["w"], 1.0);
    }
}
