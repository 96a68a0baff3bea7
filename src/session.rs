//!
//! Startup wiring
//!
//! Turns a [Config] into a transport, a detector, a capture device and a view, then runs the
//! pose loop.
//!

use minint::{ConnOptions, NtConn};
use tokio_util::sync::CancellationToken;

use crate::calibration::Calibration;
use crate::cameras::{images::ImageSequence, FrameSource};
use crate::config::{CaptureBackend, Config, Transport};
use crate::detect::{build_detector, MarkerDetector};
use crate::error::*;
use crate::publisher::{LogPublisher, NtPosePublisher, PosePublisher, TOPICS_PER_MESSAGE};
use crate::tracker::{PoseTracker, RunSummary, TrackerSettings};
use crate::view::{DebugView, Headless};

/// Connect the configured transport
///
/// The returned [NtConn], if any, has to outlive the publisher.
pub async fn connect_publisher(cfg: &Config) -> Result<(Box<dyn PosePublisher>, Option<NtConn>)> {
    match cfg.publish.transport {
        Transport::Log => {
            info!("logging poses instead of publishing them");
            Ok((Box::new(LogPublisher), None))
        }
        Transport::Networktables => {
            let server = cfg.publish.server_addr()?;
            let mut opts = ConnOptions::new(server, cfg.node_name.clone());
            opts.port = cfg.publish.port;
            opts.outgoing_capacity = cfg.publish.queue_size.max(1) * TOPICS_PER_MESSAGE;

            info!("connecting to NetworkTables at {}", opts.url());
            let nt = NtConn::connect(opts).await?;
            let publisher = NtPosePublisher::new(&nt, &cfg.node_name, &cfg.publish).await?;

            Ok((Box::new(publisher), Some(nt)))
        }
    }
}

/// Attach `source` to a new loop and run it
pub fn drive<S, D, P, V>(
    cfg: &Config,
    calibration: Calibration,
    detector: D,
    publisher: P,
    view: V,
    source: S,
    cancel: &CancellationToken,
) -> Result<RunSummary>
where
    S: FrameSource,
    D: MarkerDetector,
    P: PosePublisher,
    V: DebugView<S::Frame>,
{
    let mut tracker = PoseTracker::new(calibration, detector, publisher, view, TrackerSettings::from_config(cfg));
    tracker.attach(source);
    tracker.run(cancel)
}

/// Pick the capture device and run the pose loop on it
///
/// Blocks until the loop ends. Fails before the loop starts if no capture device exists or the
/// configured backend isn't compiled in.
pub fn run(
    cfg: &Config,
    calibration: Calibration,
    publisher: Box<dyn PosePublisher>,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let detector = build_detector(&cfg.marker, &cfg.detection)?;

    match cfg.camera.backend {
        CaptureBackend::Images => {
            if cfg.display.enabled {
                debug!("no debug window for image replay");
            }
            let source = ImageSequence::new(cfg.camera.images.iter().cloned())?;
            drive(cfg, calibration, detector, publisher, Headless, source, cancel)
        }
        CaptureBackend::Opencv => {
            let device = crate::cameras::probe_devices(&cfg.camera.candidates)?;

            #[cfg(feature = "opencv")]
            {
                use crate::cameras::cv::{BgrFrame, OpenCvCapture};
                use crate::view::highgui::HighGuiView;

                let source = OpenCvCapture::open(&device.path, cfg.camera.width, cfg.camera.height)?;
                let view: Box<dyn DebugView<BgrFrame>> = if cfg.display.enabled {
                    Box::new(HighGuiView::new(cfg.display.window.clone(), cfg.display.exit_key))
                } else {
                    Box::new(Headless)
                };
                drive(cfg, calibration, detector, publisher, view, source, cancel)
            }
            #[cfg(not(feature = "opencv"))]
            {
                let _ = device;
                BackendUnavailableSnafu { backend: "opencv" }.fail()
            }
        }
        CaptureBackend::Gstreamer => {
            let device = crate::cameras::probe_devices(&cfg.camera.candidates)?;

            #[cfg(feature = "gstreamer")]
            {
                use crate::cameras::gst::GstCapture;

                if cfg.display.enabled {
                    debug!("no debug window for the GStreamer backend");
                }
                let source = GstCapture::open(&device.path, cfg.camera.width, cfg.camera.height)?;
                drive(cfg, calibration, detector, publisher, Headless, source, cancel)
            }
            #[cfg(not(feature = "gstreamer"))]
            {
                let _ = device;
                BackendUnavailableSnafu { backend: "gstreamer" }.fail()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::DetectorKind;
    use crate::tracker::ExitReason;

    fn calib() -> Calibration {
        Calibration::ideal(600.0, 600.0, 320.0, 240.0).unwrap()
    }

    fn dictionary_file(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("dict.json");
        std::fs::write(
            &path,
            r#"{"name":"TEST","marker_size":3,"max_correction_bits":0,"codes":[341]}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn missing_camera_never_starts_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.camera.candidates = vec![dir.path().join("video9").display().to_string()];
        cfg.marker.detector = DetectorKind::Native;
        cfg.marker.dictionary_path = Some(dictionary_file(dir.path()));

        let err = run(&cfg, calib(), Box::new(LogPublisher), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::NoCameraFound { .. }), "{err}");
    }

    #[test]
    fn replays_images_until_they_run_out() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("blank.png");
        image::GrayImage::new(64, 48).save(&frame).unwrap();

        let mut cfg = Config::default();
        cfg.camera.backend = CaptureBackend::Images;
        cfg.camera.images = vec![frame.clone(), frame];
        cfg.marker.detector = DetectorKind::Native;
        cfg.marker.dictionary_path = Some(dictionary_file(dir.path()));

        let summary = run(&cfg, calib(), Box::new(LogPublisher), &CancellationToken::new()).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.published, 0);
        assert_eq!(summary.exit, ExitReason::ReadFailed);
    }

    #[test]
    fn default_marker_settings_need_no_dictionary_file() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("blank.png");
        image::GrayImage::new(64, 48).save(&frame).unwrap();

        let mut cfg = Config::default();
        cfg.camera.backend = CaptureBackend::Images;
        cfg.camera.images = vec![frame];

        let summary = run(&cfg, calib(), Box::new(LogPublisher), &CancellationToken::new()).unwrap();
        assert_eq!(summary.frames, 1);
    }

    #[tokio::test]
    async fn log_transport_needs_no_server() {
        let mut cfg = Config::default();
        cfg.publish.transport = Transport::Log;
        let (_, nt) = connect_publisher(&cfg).await.unwrap();
        assert!(nt.is_none());
    }
}
