//! GStreamer `v4l2src` frames.

use gstreamer::{prelude::*, Caps, ClockTime, Element, ElementFactory, Pipeline, State};
use gstreamer_app::AppSink;
use image::RgbImage;

use super::FrameSource;
use crate::error::*;

/// How long to wait for a frame before calling the camera dead
const PULL_TIMEOUT_SECS: u64 = 5;

/// `v4l2src ! videoconvertscale ! video/x-raw,format=RGB ! appsink`
pub struct GstCapture {
    device: String,
    pipeline: Pipeline,
    appsink: AppSink,
}
impl GstCapture {
    pub fn open(device: &str, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let open_err = |reason: String| Error::FailedToOpenCamera {
            device: device.to_owned(),
            reason,
        };

        gstreamer::init().map_err(|err| open_err(err.to_string()))?;

        let pipeline = Pipeline::new();

        let cam = ElementFactory::make("v4l2src")
            .property("device", device)
            .build()
            .map_err(|err| open_err(err.to_string()))?;
        let videoconvertscale = ElementFactory::make("videoconvertscale")
            .build()
            .map_err(|err| open_err(err.to_string()))?;

        let mut caps = Caps::builder("video/x-raw").field("format", "RGB");
        if let Some(width) = width {
            caps = caps.field("width", width as i32);
        }
        if let Some(height) = height {
            caps = caps.field("height", height as i32);
        }
        let filter = ElementFactory::make("capsfilter")
            .property("caps", &caps.build())
            .build()
            .map_err(|err| open_err(err.to_string()))?;

        let appsink = ElementFactory::make("appsink")
            .name("pose_appsink")
            .build()
            .map_err(|err| open_err(err.to_string()))?;

        pipeline
            .add_many([&cam, &videoconvertscale, &filter, &appsink])
            .map_err(|err| open_err(err.to_string()))?;
        Element::link_many([&cam, &videoconvertscale, &filter, &appsink])
            .map_err(|err| open_err(err.to_string()))?;

        let appsink = appsink
            .dynamic_cast::<AppSink>()
            .map_err(|_| open_err("appsink is not an AppSink".to_owned()))?;
        // Only ever hand out the newest frame
        appsink.set_drop(true);
        appsink.set_max_buffers(1);
        appsink.set_sync(false);

        pipeline
            .set_state(State::Playing)
            .map_err(|err| open_err(err.to_string()))?;
        info!("started GStreamer pipeline for {device}");

        Ok(Self {
            device: device.to_owned(),
            pipeline,
            appsink,
        })
    }
}
impl FrameSource for GstCapture {
    type Frame = RgbImage;

    fn name(&self) -> &str {
        &self.device
    }

    fn read(&mut self) -> Result<RgbImage> {
        let read_err = |reason: String| Error::FailedToReadFrame { reason };

        let sample = self
            .appsink
            .try_pull_sample(ClockTime::from_seconds(PULL_TIMEOUT_SECS))
            .ok_or_else(|| read_err(format!("no frame from {} (end of stream or timeout)", self.device)))?;

        let structure = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .ok_or_else(|| read_err("sample has no caps".to_owned()))?;
        let width = structure
            .get::<i32>("width")
            .map_err(|err| read_err(err.to_string()))? as u32;
        let height = structure
            .get::<i32>("height")
            .map_err(|err| read_err(err.to_string()))? as u32;

        let buf = sample
            .buffer()
            .ok_or_else(|| read_err("sample has no buffer".to_owned()))?;
        let map = buf.map_readable().map_err(|err| read_err(err.to_string()))?;

        // Rows may be padded to a 4 byte boundary
        let row = width as usize * 3;
        let stride = if height > 0 { map.len() / height as usize } else { 0 };
        if stride < row {
            return Err(read_err(format!(
                "buffer of {} bytes is too small for {width}x{height} RGB",
                map.len()
            )));
        }

        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&map[y * stride..y * stride + row]);
        }

        RgbImage::from_raw(width, height, data).ok_or_else(|| read_err("frame size mismatch".to_owned()))
    }

    fn release(&mut self) {
        if let Err(err) = self.pipeline.set_state(State::Null) {
            warn!("failed to stop pipeline for {}: {err:?}", self.device);
        }
    }
}
