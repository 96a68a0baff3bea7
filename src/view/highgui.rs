//! OpenCV highgui window.

use nalgebra::Point2;
use opencv::{
    core::{Point, Scalar},
    highgui::{destroy_window, imshow, wait_key},
    imgproc::{line, put_text, LineTypes, FONT_HERSHEY_SIMPLEX},
    prelude::*,
};

use super::{DebugView, Overlay, ViewEvent};
use crate::cameras::cv::BgrFrame;
use crate::error::*;

fn display_err(err: opencv::Error) -> Error {
    Error::DisplayFailed {
        reason: err.to_string(),
    }
}

fn pt(p: &Point2<f64>) -> Point {
    Point {
        x: p.x.round() as i32,
        y: p.y.round() as i32,
    }
}

// BGR
fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}
fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}
fn blue() -> Scalar {
    Scalar::new(255.0, 0.0, 0.0, 0.0)
}

pub struct HighGuiView {
    window: String,
    exit_key: char,
}
impl HighGuiView {
    pub fn new(window: impl Into<String>, exit_key: char) -> Self {
        Self {
            window: window.into(),
            exit_key,
        }
    }
}
impl DebugView<BgrFrame> for HighGuiView {
    fn show(&mut self, frame: &BgrFrame, overlay: &Overlay) -> Result<ViewEvent> {
        let mut canvas = frame.0.try_clone().map_err(display_err)?;
        let mut draw = |a: &Point2<f64>, b: &Point2<f64>, color: Scalar| {
            line(&mut canvas, pt(a), pt(b), color, 2, LineTypes::LINE_AA as i32, 0)
        };

        for (_, corners) in &overlay.markers {
            for i in 0..4 {
                draw(&corners[i], &corners[(i + 1) % 4], green()).map_err(display_err)?;
            }
        }
        for axes in &overlay.axes {
            draw(&axes.origin, &axes.x, red()).map_err(display_err)?;
            draw(&axes.origin, &axes.y, green()).map_err(display_err)?;
            draw(&axes.origin, &axes.z, blue()).map_err(display_err)?;
        }
        if let Some(caption) = &overlay.caption {
            put_text(
                &mut canvas,
                caption,
                Point { x: 0, y: 64 },
                FONT_HERSHEY_SIMPLEX,
                1.0,
                green(),
                2,
                LineTypes::LINE_AA as i32,
                false,
            )
            .map_err(display_err)?;
        }

        imshow(&self.window, &canvas).map_err(display_err)?;

        let key = wait_key(1).map_err(display_err)?;
        if key >= 0 && (key & 0xff) as u32 == self.exit_key as u32 {
            return Ok(ViewEvent::Exit);
        }
        Ok(ViewEvent::Continue)
    }

    fn close(&mut self) {
        if let Err(err) = destroy_window(&self.window) {
            debug!("failed to close {}: {err}", self.window);
        }
    }
}
