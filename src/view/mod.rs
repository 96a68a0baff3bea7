//!
//! Local debug display
//!

#[cfg(feature = "opencv")]
pub mod highgui;

use nalgebra::{Point2, Point3};

use crate::calibration::Calibration;
use crate::detect::Detections;
use crate::error::Result;
use crate::pose::PoseEstimate;

/// A marker's frame axes projected into the image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedAxes {
    pub origin: Point2<f64>,
    pub x: Point2<f64>,
    pub y: Point2<f64>,
    pub z: Point2<f64>,
}

/// What to draw on top of a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    pub markers: Vec<(u32, [Point2<f64>; 4])>,
    pub axes: Vec<ProjectedAxes>,
    pub caption: Option<String>,
}
impl Overlay {
    /// Outlines and an `Id: [..]` caption for every detected marker
    pub fn new(detections: &Detections) -> Self {
        let caption = if detections.is_empty() {
            None
        } else {
            Some(format!("Id: {:?}", detections.ids))
        };

        Self {
            markers: detections.iter().map(|(id, corners)| (id, *corners)).collect(),
            axes: Vec::new(),
            caption,
        }
    }

    /// Add the axes of an estimated pose, `length` long
    ///
    /// Axes that don't project in front of the camera are skipped.
    pub fn add_axes(&mut self, estimate: &PoseEstimate, calibration: &Calibration, length: f64) {
        let iso = estimate.isometry();
        let project = |p: Point3<f64>| calibration.project(&(iso * p));

        let axes = (|| {
            Some(ProjectedAxes {
                origin: project(Point3::origin())?,
                x: project(Point3::new(length, 0.0, 0.0))?,
                y: project(Point3::new(0.0, length, 0.0))?,
                z: project(Point3::new(0.0, 0.0, length))?,
            })
        })();

        match axes {
            Some(axes) => self.axes.push(axes),
            None => trace!("pose axes are behind the camera, not drawing them"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEvent {
    Continue,
    /// The user asked us to stop
    Exit,
}

/// Shows frames of type `F` with an [Overlay]
pub trait DebugView<F> {
    fn show(&mut self, frame: &F, overlay: &Overlay) -> Result<ViewEvent>;

    /// Tear down any windows
    fn close(&mut self) {}
}
impl<F, V: DebugView<F> + ?Sized> DebugView<F> for Box<V> {
    fn show(&mut self, frame: &F, overlay: &Overlay) -> Result<ViewEvent> {
        (**self).show(frame, overlay)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// No display at all
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;
impl<F> DebugView<F> for Headless {
    fn show(&mut self, _frame: &F, _overlay: &Overlay) -> Result<ViewEvent> {
        Ok(ViewEvent::Continue)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;

    #[test]
    fn caption_lists_all_ids() {
        let mut d = Detections::default();
        assert_eq!(Overlay::new(&d).caption, None);

        d.push([Point2::origin(); 4], 4);
        d.push([Point2::origin(); 4], 12);
        let overlay = Overlay::new(&d);
        assert_eq!(overlay.caption.as_deref(), Some("Id: [4, 12]"));
        assert_eq!(overlay.markers.len(), 2);
    }

    #[test]
    fn axes_project_from_marker_center() {
        let calib = Calibration::ideal(500.0, 500.0, 320.0, 240.0).unwrap();
        let est = PoseEstimate {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 1.0),
            reprojection_error: 0.0,
        };

        let mut overlay = Overlay::default();
        overlay.add_axes(&est, &calib, 0.1);
        let axes = overlay.axes[0];
        assert!((axes.origin - Point2::new(320.0, 240.0)).norm() < 1e-9);
        assert!((axes.x - Point2::new(370.0, 240.0)).norm() < 1e-9);
        assert!((axes.y - Point2::new(320.0, 290.0)).norm() < 1e-9);
    }

    #[test]
    fn headless_never_exits() {
        let mut view = Headless;
        let event = DebugView::<()>::show(&mut view, &(), &Overlay::default()).unwrap();
        assert_eq!(event, ViewEvent::Continue);
    }
}
