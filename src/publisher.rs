//!
//! Outbound pose transports
//!

use minint::{NtConn, NtTopic, PublishProps};

use crate::config::PublishCfg;
use crate::error::Result;
use crate::messages::PoseStamped;

/// Number of NT topics per pose message
pub const TOPICS_PER_MESSAGE: usize = 6;

/// Something that pose messages can be handed to
///
/// Publishing must never block the pose loop; implementations drop messages they can't queue.
pub trait PosePublisher: Send {
    fn publish(&mut self, msg: &PoseStamped, marker_id: u32) -> Result<()>;
}
impl<P: PosePublisher + ?Sized> PosePublisher for Box<P> {
    fn publish(&mut self, msg: &PoseStamped, marker_id: u32) -> Result<()> {
        (**self).publish(msg, marker_id)
    }
}

/// Topic prefix for a node and topic name, e.g. `/aruco_pose_publisher/marker_pose/`
pub fn topic_prefix(node_name: &str, topic: &str) -> String {
    format!(
        "/{}/{}/",
        node_name.trim_matches('/'),
        topic.trim_matches('/')
    )
}

/// Publishes each [PoseStamped] field to its own NetworkTables topic
pub struct NtPosePublisher {
    position: NtTopic<Vec<f64>>,
    orientation: NtTopic<Vec<f64>>,
    frame_id: NtTopic<String>,
    stamp: NtTopic<f64>,
    seq: NtTopic<i64>,
    marker_id: NtTopic<i64>,
}
impl NtPosePublisher {
    /// Announce all topics
    pub async fn new(nt: &NtConn, node_name: &str, cfg: &PublishCfg) -> Result<Self> {
        let prefix = topic_prefix(node_name, &cfg.topic);
        let props = PublishProps {
            retained: Some(cfg.retained),
            ..Default::default()
        };

        let this = Self {
            position: nt.publish(format!("{prefix}position"), props).await?,
            orientation: nt.publish(format!("{prefix}orientation"), props).await?,
            frame_id: nt.publish(format!("{prefix}frame_id"), props).await?,
            stamp: nt.publish(format!("{prefix}stamp"), props).await?,
            seq: nt.publish(format!("{prefix}seq"), props).await?,
            marker_id: nt.publish(format!("{prefix}marker_id"), props).await?,
        };
        info!("publishing poses under {prefix}");

        Ok(this)
    }
}
impl PosePublisher for NtPosePublisher {
    fn publish(&mut self, msg: &PoseStamped, marker_id: u32) -> Result<()> {
        let p = &msg.pose.position;
        let q = &msg.pose.orientation;

        // All six values go out together, or the whole message is dropped
        let mut batch = self.position.batch();
        batch
            .set(&self.position, vec![p.x, p.y, p.z])?
            .set(&self.orientation, vec![q.x, q.y, q.z, q.w])?
            .set(&self.frame_id, msg.header.frame_id.clone())?
            .set(&self.stamp, msg.header.stamp.as_secs_f64())?
            .set(&self.seq, msg.header.seq as i64)?
            .set(&self.marker_id, marker_id as i64)?;
        debug_assert_eq!(batch.len(), TOPICS_PER_MESSAGE);
        batch.send()?;

        Ok(())
    }
}

/// Logs every message as JSON
#[derive(Debug, Default)]
pub struct LogPublisher;
impl PosePublisher for LogPublisher {
    fn publish(&mut self, msg: &PoseStamped, marker_id: u32) -> Result<()> {
        match serde_json::to_string(msg) {
            Ok(json) => info!(marker_id, "{json}"),
            Err(err) => warn!("failed to serialize pose: {err}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Header, Point, Pose, Quaternion, Time};

    #[test]
    fn prefix_has_single_slashes() {
        assert_eq!(topic_prefix("aruco_pose_publisher", "marker_pose"), "/aruco_pose_publisher/marker_pose/");
        assert_eq!(topic_prefix("/node/", "/a/b/"), "/node/a/b/");
    }

    #[test]
    fn log_publisher_accepts_messages() {
        let msg = PoseStamped {
            header: Header {
                seq: 0,
                stamp: Time { secs: 0, nsecs: 0 },
                frame_id: "aruco_marker".to_owned(),
            },
            pose: Pose {
                position: Point { x: 0.0, y: 0.0, z: 1.0 },
                orientation: Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 },
            },
        };
        assert!(LogPublisher.publish(&msg, 3).is_ok());
    }
}
