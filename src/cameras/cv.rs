//! OpenCV `VideoCapture` frames.

use image::GrayImage;
use opencv::{
    core::Mat,
    imgproc::{cvt_color, ColorConversionCodes},
    prelude::*,
    videoio::{VideoCapture, VideoCaptureAPIs, VideoCaptureProperties},
};

use super::{FrameSource, IntoGray};
use crate::error::*;
use crate::utils::video_index;

/// A BGR frame straight from OpenCV
pub struct BgrFrame(pub Mat);
impl IntoGray for BgrFrame {
    fn to_gray(&self) -> Result<GrayImage> {
        let read_err = |err: opencv::Error| Error::FailedToReadFrame {
            reason: err.to_string(),
        };

        let mut gray = Mat::default();
        cvt_color(&self.0, &mut gray, ColorConversionCodes::COLOR_BGR2GRAY as i32, 0).map_err(read_err)?;

        let mut out = GrayImage::new(gray.cols() as u32, gray.rows() as u32);
        let width = out.width() as usize;
        for (y, dst) in out.chunks_exact_mut(width).enumerate() {
            dst.copy_from_slice(gray.at_row::<u8>(y as i32).map_err(read_err)?);
        }
        Ok(out)
    }
}

pub struct OpenCvCapture {
    device: String,
    cap: VideoCapture,
}
impl OpenCvCapture {
    pub fn open(device: &str, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let open_err = |reason: String| Error::FailedToOpenCamera {
            device: device.to_owned(),
            reason,
        };

        // V4L2 devices are opened by index, anything else is handed to OpenCV as is
        let cap = match video_index(device) {
            Some(index) => VideoCapture::new(index, VideoCaptureAPIs::CAP_V4L2 as i32),
            None => VideoCapture::from_file(device, VideoCaptureAPIs::CAP_ANY as i32),
        }
        .map_err(|err| open_err(err.to_string()))?;

        if !cap.is_opened().map_err(|err| open_err(err.to_string()))? {
            return Err(open_err("couldn't open video capture device".to_owned()));
        }

        let mut this = Self {
            device: device.to_owned(),
            cap,
        };
        if let Some(width) = width {
            this.set(VideoCaptureProperties::CAP_PROP_FRAME_WIDTH, width as f64);
        }
        if let Some(height) = height {
            this.set(VideoCaptureProperties::CAP_PROP_FRAME_HEIGHT, height as f64);
        }

        info!(
            "opened {} at {}x{}",
            this.device,
            this.cap.get(VideoCaptureProperties::CAP_PROP_FRAME_WIDTH as i32).unwrap_or(0.0),
            this.cap.get(VideoCaptureProperties::CAP_PROP_FRAME_HEIGHT as i32).unwrap_or(0.0),
        );

        Ok(this)
    }

    fn set(&mut self, prop: VideoCaptureProperties, value: f64) {
        match self.cap.set(prop as i32, value) {
            Ok(true) => {}
            Ok(false) => warn!("{} ignored {prop:?} = {value}", self.device),
            Err(err) => warn!("failed to set {prop:?} on {}: {err}", self.device),
        }
    }
}
impl FrameSource for OpenCvCapture {
    type Frame = BgrFrame;

    fn name(&self) -> &str {
        &self.device
    }

    fn read(&mut self) -> Result<BgrFrame> {
        let mut frame = Mat::default();
        let ok = self.cap.read(&mut frame).map_err(|err| Error::FailedToReadFrame {
            reason: err.to_string(),
        })?;
        if !ok || frame.empty() {
            return FailedToReadFrameSnafu {
                reason: format!("{} returned no frame", self.device),
            }
            .fail();
        }
        Ok(BgrFrame(frame))
    }

    fn release(&mut self) {
        if let Err(err) = self.cap.release() {
            warn!("failed to release {}: {err}", self.device);
        }
    }
}
