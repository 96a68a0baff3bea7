//!
//! The pose publisher loop
//!
//! Read a frame, find markers, estimate a pose, publish it, show it. Repeat until the camera
//! dies, the user presses the exit key, or we get interrupted.
//!

use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::calibration::Calibration;
use crate::cameras::{CaptureGuard, FrameSource, IntoGray};
use crate::config::{Config, MarkerSelection, RotationConvention};
use crate::detect::MarkerDetector;
use crate::error::*;
use crate::messages::{PoseStamped, Time};
use crate::pose::{estimate_single_marker, rvec_to_quaternion};
use crate::publisher::PosePublisher;
use crate::view::{DebugView, Overlay, ViewEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No capture device attached yet
    AwaitingCamera,
    Streaming,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Ctrl-C or some other cancellation
    Interrupted,
    /// The capture device stopped giving us frames
    ReadFailed,
    /// The exit key was pressed in the debug window
    ExitKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Exit(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub published: u64,
    pub exit: ExitReason,
}

/// The parts of [Config] the loop needs
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub marker_length: f64,
    pub selection: MarkerSelection,
    pub rotation: RotationConvention,
    pub frame_id: String,
    pub axis_length: f64,
}
impl TrackerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            marker_length: cfg.marker.length,
            selection: cfg.marker.selection,
            rotation: cfg.marker.rotation,
            frame_id: cfg.publish.frame_id.clone(),
            axis_length: cfg.display.axis_length,
        }
    }
}
impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct PoseTracker<S, D, P, V>
where
    S: FrameSource,
{
    calibration: Calibration,
    detector: D,
    publisher: P,
    view: V,
    settings: TrackerSettings,
    capture: Option<CaptureGuard<S>>,

    seq: u32,
    frames: u64,
    published: u64,
}
impl<S, D, P, V> PoseTracker<S, D, P, V>
where
    S: FrameSource,
    D: MarkerDetector,
    P: PosePublisher,
    V: DebugView<S::Frame>,
{
    pub fn new(calibration: Calibration, detector: D, publisher: P, view: V, settings: TrackerSettings) -> Self {
        Self {
            calibration,
            detector,
            publisher,
            view,
            settings,
            capture: None,

            seq: 0,
            frames: 0,
            published: 0,
        }
    }

    pub fn state(&self) -> TrackerState {
        match self.capture {
            Some(_) => TrackerState::Streaming,
            None => TrackerState::AwaitingCamera,
        }
    }

    /// Hand the loop its capture device
    pub fn attach(&mut self, source: S) {
        info!("streaming from {}", source.name());
        self.capture = Some(CaptureGuard::new(source));
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run one iteration of the loop
    pub fn step(&mut self, cancel: &CancellationToken) -> Result<StepOutcome> {
        if cancel.is_cancelled() {
            return Ok(StepOutcome::Exit(ExitReason::Interrupted));
        }

        let Some(capture) = self.capture.as_mut() else {
            return NotAttachedSnafu.fail();
        };

        let frame = match capture.read() {
            Ok(frame) => frame,
            Err(err) => {
                error!("{err}");
                return Ok(StepOutcome::Exit(ExitReason::ReadFailed));
            }
        };
        self.frames += 1;

        let gray = frame.to_gray()?;
        let detections = self.detector.detect(&gray)?;
        trace!("frame {}: {} markers", self.frames, detections.len());

        let mut overlay = Overlay::new(&detections);

        let limit = match self.settings.selection {
            MarkerSelection::First => 1,
            MarkerSelection::All => usize::MAX,
        };
        for (id, corners) in detections.iter().take(limit) {
            let estimate = match estimate_single_marker(corners, self.settings.marker_length, &self.calibration) {
                Ok(estimate) => estimate,
                Err(err) => {
                    warn!("skipping marker {id}: {err}");
                    continue;
                }
            };

            let orientation = rvec_to_quaternion(&estimate.rvec, self.settings.rotation);
            let msg = PoseStamped::from_estimate(
                &estimate,
                &orientation,
                self.settings.frame_id.as_str(),
                self.seq,
                Time::now(),
            );
            self.seq = self.seq.wrapping_add(1);

            match self.publisher.publish(&msg, id) {
                Ok(()) => self.published += 1,
                Err(err) => warn!("dropped pose of marker {id}: {err}"),
            }

            overlay.add_axes(&estimate, &self.calibration, self.settings.axis_length);
        }

        match self.view.show(&frame, &overlay)? {
            ViewEvent::Continue => Ok(StepOutcome::Continue),
            ViewEvent::Exit => Ok(StepOutcome::Exit(ExitReason::ExitKey)),
        }
    }

    /// Loop until something tells us to stop
    ///
    /// The capture device is released before this returns, whatever the outcome.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        let Some(capture) = self.capture.as_ref() else {
            return NotAttachedSnafu.fail();
        };
        let span = span!(Level::INFO, "tracker", camera = capture.name());
        let _enter = span.enter();

        let result = loop {
            match self.step(cancel) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Exit(reason)) => break Ok(reason),
                Err(err) => break Err(err),
            }
        };

        if let Some(capture) = self.capture.as_mut() {
            capture.release();
        }
        self.view.close();

        let exit = result?;
        match exit {
            ExitReason::Interrupted => info!("interrupted, closed the capture device"),
            ExitReason::ReadFailed => error!("stopped after a frame read failure"),
            ExitReason::ExitKey => info!("exit key pressed"),
        }

        Ok(RunSummary {
            frames: self.frames,
            published: self.published,
            exit,
        })
    }
}
