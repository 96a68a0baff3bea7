use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use aruco_pose_publisher::{
    calibration::Calibration,
    cameras::{select_device, FrameSource},
    config::{DetectionCfg, MarkerSelection, RotationConvention},
    detect::{dictionary::pack_rows, Dictionary, MarkerDetector, NativeDetector},
    messages::PoseStamped,
    pose::{estimate_single_marker, rvec_to_quaternion},
    publisher::PosePublisher,
    synthetic::{blank_frame, draw_marker, facing_camera, render_marker, SyntheticMarker},
    tracker::{ExitReason, PoseTracker, TrackerSettings},
    view::Headless,
    Error, Result,
};
use image::GrayImage;
use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tokio_util::sync::CancellationToken;

const LENGTH: f64 = 0.1;

fn dictionary() -> Dictionary {
    Dictionary::new(
        "TEST_4X4",
        4,
        2,
        vec![
            pack_rows(&["1011", "0010", "1100", "0111"]).unwrap(),
            pack_rows(&["0101", "1001", "0110", "1110"]).unwrap(),
            pack_rows(&["1100", "1010", "0001", "0110"]).unwrap(),
        ],
    )
    .unwrap()
}

fn calibration() -> Calibration {
    let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
    Calibration::new(k, vec![0.0; 5]).unwrap()
}

/// Frames from memory, counting releases
struct Replay {
    frames: VecDeque<GrayImage>,
    released: Arc<AtomicUsize>,
}
impl Replay {
    fn new(frames: Vec<GrayImage>) -> (Self, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Self {
                frames: frames.into(),
                released: released.clone(),
            },
            released,
        )
    }
}
impl FrameSource for Replay {
    type Frame = GrayImage;

    fn name(&self) -> &str {
        "replay"
    }

    fn read(&mut self) -> Result<GrayImage> {
        self.frames.pop_front().ok_or(Error::FailedToReadFrame {
            reason: "unplugged".to_owned(),
        })
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorder(Vec<(u32, PoseStamped)>);
impl PosePublisher for Recorder {
    fn publish(&mut self, msg: &PoseStamped, marker_id: u32) -> Result<()> {
        self.0.push((marker_id, msg.clone()));
        Ok(())
    }
}

fn two_marker_frame(dict: &Dictionary) -> GrayImage {
    let calib = calibration();
    let mut img = blank_frame(640, 480);
    // The upper marker is first in detection order
    for (id, t) in [(2, Vector3::new(0.12, -0.1, 0.8)), (0, Vector3::new(-0.12, 0.08, 0.8))] {
        draw_marker(
            &mut img,
            &calib,
            &SyntheticMarker {
                dictionary: dict,
                id,
                length: LENGTH,
                pose: facing_camera(t, Vector3::zeros()),
            },
        );
    }
    img
}

fn tracker(
    frames: Vec<GrayImage>,
    selection: MarkerSelection,
) -> (PoseTracker<Replay, NativeDetector, Recorder, Headless>, Arc<AtomicUsize>) {
    let settings = TrackerSettings {
        marker_length: LENGTH,
        selection,
        ..Default::default()
    };
    let mut t = PoseTracker::new(
        calibration(),
        NativeDetector::new(dictionary(), DetectionCfg::default()),
        Recorder::default(),
        Headless,
        settings,
    );
    let (source, released) = Replay::new(frames);
    t.attach(source);
    (t, released)
}

#[test]
fn rendered_marker_pose_matches_ground_truth() {
    let dict = dictionary();
    let calib = calibration();

    let truth = facing_camera(Vector3::new(0.03, -0.02, 0.6), Vector3::new(0.25, -0.2, 0.3));
    let marker = SyntheticMarker {
        dictionary: &dict,
        id: 1,
        length: LENGTH,
        pose: truth,
    };
    let img = render_marker(&calib, 640, 480, &marker);

    let mut detector = NativeDetector::new(dict.clone(), DetectionCfg::default());
    let found = detector.detect(&img).unwrap();
    assert_eq!(found.ids, vec![1]);

    let expected = marker.project_corners(&calib).unwrap();
    for (got, want) in found.corners[0].iter().zip(&expected) {
        assert!((got - want).norm() < 1.0, "corner {got:?} vs {want:?}");
    }

    let est = estimate_single_marker(&found.corners[0], LENGTH, &calib).unwrap();
    let dt = (est.tvec - truth.translation.vector).norm();
    assert!(dt < 0.005, "translation off by {dt} m");

    let q = rvec_to_quaternion(&est.rvec, RotationConvention::AxisAngle);
    let angle = q.angle_to(&truth.rotation);
    assert!(angle < 4f64.to_radians(), "rotation off by {angle} rad");
}

#[test]
fn embedded_dictionary_markers_are_found() {
    let dict = Dictionary::builtin("DICT_4X4_50").unwrap();
    let calib = calibration();
    let marker = SyntheticMarker {
        dictionary: &dict,
        id: 17,
        length: LENGTH,
        pose: facing_camera(Vector3::new(0.0, 0.02, 0.7), Vector3::new(0.1, 0.2, 0.0)),
    };
    let img = render_marker(&calib, 640, 480, &marker);

    let mut detector = NativeDetector::new(dict.clone(), DetectionCfg::default());
    assert_eq!(detector.detect(&img).unwrap().ids, vec![17]);
}

#[test]
fn identity_camera_recovers_projected_pose() {
    let calib = Calibration::ideal(1.0, 1.0, 0.0, 0.0).unwrap();
    let dict = dictionary();
    let truth = facing_camera(Vector3::new(-0.05, 0.04, 0.9), Vector3::new(-0.3, 0.2, 0.5));
    let marker = SyntheticMarker {
        dictionary: &dict,
        id: 0,
        length: LENGTH,
        pose: truth,
    };
    let corners = marker.project_corners(&calib).unwrap();

    let est = estimate_single_marker(&corners, LENGTH, &calib).unwrap();
    assert!((est.tvec - truth.translation.vector).norm() < 1e-6);
    let q = UnitQuaternion::from_scaled_axis(est.rvec);
    assert!(q.angle_to(&truth.rotation) < 1e-6);
}

#[test]
fn only_the_first_marker_is_published() {
    let dict = dictionary();
    let (mut t, released) = tracker(vec![two_marker_frame(&dict)], MarkerSelection::First);

    let summary = t.run(&CancellationToken::new()).unwrap();
    assert_eq!(summary.frames, 1);
    assert_eq!(summary.published, 1);
    assert_eq!(summary.exit, ExitReason::ReadFailed);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    // The upper marker comes first in detection order, the lower one is never published
    let sent = &t.publisher().0;
    assert_eq!(sent.len(), 1);
    let (id, msg) = &sent[0];
    assert_eq!(*id, 2);
    assert_eq!(msg.header.seq, 0);
    assert!(msg.pose.position.y < 0.0, "{:?}", msg.pose.position);
}

#[test]
fn all_markers_when_asked() {
    let dict = dictionary();
    let (mut t, _) = tracker(vec![two_marker_frame(&dict)], MarkerSelection::All);

    let summary = t.run(&CancellationToken::new()).unwrap();
    assert_eq!(summary.published, 2);

    let sent = &t.publisher().0;
    assert_eq!(sent.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![2, 0]);
    assert_eq!(sent.iter().map(|(_, m)| m.header.seq).collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn empty_frames_publish_nothing() {
    let (mut t, released) = tracker(vec![blank_frame(640, 480), blank_frame(640, 480)], MarkerSelection::First);

    let summary = t.run(&CancellationToken::new()).unwrap();
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.published, 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn released_once_even_when_dropped_after_run() {
    let (mut t, released) = tracker(Vec::new(), MarkerSelection::First);
    let summary = t.run(&CancellationToken::new()).unwrap();
    assert_eq!(summary.frames, 0);
    assert_eq!(summary.exit, ExitReason::ReadFailed);

    drop(t);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn no_camera_means_no_loop() {
    let candidates = vec!["/dev/video2".to_owned(), "/dev/video1".to_owned()];
    let err = select_device(&candidates, |_| false).unwrap_err();
    assert!(matches!(err, Error::NoCameraFound { .. }));

    let dev = select_device(&candidates, |p| p.ends_with("video1")).unwrap();
    assert_eq!(dev.path, "/dev/video1");
}
