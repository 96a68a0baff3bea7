//!
//! Capture devices
//!
//! A [FrameSource] hands out frames one at a time. The pose loop only ever holds one through a
//! [CaptureGuard], which makes sure the device is released exactly once no matter how the loop
//! ends.
//!

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod images;
#[cfg(feature = "opencv")]
pub mod cv;

use std::path::Path;

use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::*;

/// Frames that can be turned into a single channel intensity image
pub trait IntoGray {
    fn to_gray(&self) -> Result<GrayImage>;
}
impl IntoGray for GrayImage {
    fn to_gray(&self) -> Result<GrayImage> {
        Ok(self.clone())
    }
}
impl IntoGray for RgbImage {
    fn to_gray(&self) -> Result<GrayImage> {
        Ok(image::imageops::grayscale(self))
    }
}
impl IntoGray for DynamicImage {
    fn to_gray(&self) -> Result<GrayImage> {
        Ok(self.to_luma8())
    }
}

/// A source of frames, usually a camera
pub trait FrameSource: Send {
    type Frame: IntoGray + Send;

    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Block until the next frame is available
    fn read(&mut self) -> Result<Self::Frame>;

    /// Give the device back to the OS
    fn release(&mut self);
}

/// Owns a [FrameSource] and releases it exactly once
pub struct CaptureGuard<S: FrameSource> {
    source: S,
    released: bool,
}
impl<S: FrameSource> CaptureGuard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn read(&mut self) -> Result<S::Frame> {
        if self.released {
            return FailedToReadFrameSnafu {
                reason: "capture device was already released",
            }
            .fail();
        }
        self.source.read()
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!("releasing {}", self.source.name());
            self.source.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
impl<S: FrameSource> Drop for CaptureGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The device picked from the candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub path: String,
    /// Index into the candidate list, 0 is the most preferred
    pub priority: usize,
}

/// Pick the first candidate that exists
pub fn select_device(candidates: &[String], exists: impl Fn(&Path) -> bool) -> Result<SelectedDevice> {
    for (priority, path) in candidates.iter().enumerate() {
        if exists(Path::new(path)) {
            debug!("found capture device {path}");
            return Ok(SelectedDevice {
                path: path.clone(),
                priority,
            });
        }
        trace!("{path} doesn't exist");
    }

    NoCameraFoundSnafu {
        candidates: candidates.to_vec(),
    }
    .fail()
}

/// [select_device] against the real filesystem
pub fn probe_devices(candidates: &[String]) -> Result<SelectedDevice> {
    select_device(candidates, |path| path.exists())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn candidates() -> Vec<String> {
        ["/dev/video2", "/dev/video1", "/dev/video0"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn picks_highest_priority_present_device() {
        let dev = select_device(&candidates(), |p| p != Path::new("/dev/video2")).unwrap();
        assert_eq!(dev.path, "/dev/video1");
        assert_eq!(dev.priority, 1);

        let dev = select_device(&candidates(), |_| true).unwrap();
        assert_eq!(dev.path, "/dev/video2");
    }

    #[test]
    fn no_device_is_an_error() {
        let err = select_device(&candidates(), |_| false).unwrap_err();
        match err {
            Error::NoCameraFound { candidates: tried } => assert_eq!(tried, candidates()),
            other => panic!("unexpected error {other}"),
        }
    }

    struct Counting(Arc<AtomicUsize>);
    impl FrameSource for Counting {
        type Frame = GrayImage;
        fn name(&self) -> &str {
            "counting"
        }
        fn read(&mut self) -> Result<GrayImage> {
            Ok(GrayImage::new(1, 1))
        }
        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut guard = CaptureGuard::new(Counting(count.clone()));
            assert!(guard.read().is_ok());
            guard.release();
            guard.release();
            assert!(guard.is_released());
            assert!(guard.read().is_err());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(CaptureGuard::new(Counting(count.clone())));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rgb_to_gray() {
        let rgb = RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
        let gray = rgb.to_gray().unwrap();
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
    }
}
