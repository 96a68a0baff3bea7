//! Replay still images as if they came from a camera.

use std::{collections::VecDeque, path::PathBuf};

use image::DynamicImage;

use super::FrameSource;
use crate::error::*;

/// Reads image files in order, then fails like an unplugged camera
pub struct ImageSequence {
    name: String,
    remaining: VecDeque<PathBuf>,
}
impl ImageSequence {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        let remaining: VecDeque<_> = paths.into_iter().collect();
        if remaining.is_empty() {
            return FailedToOpenCameraSnafu {
                device: "images",
                reason: "no image files configured",
            }
            .fail();
        }

        Ok(Self {
            name: format!("image sequence ({} frames)", remaining.len()),
            remaining,
        })
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}
impl FrameSource for ImageSequence {
    type Frame = DynamicImage;

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> Result<DynamicImage> {
        let Some(path) = self.remaining.pop_front() else {
            return FailedToReadFrameSnafu {
                reason: "end of image sequence",
            }
            .fail();
        };

        trace!("reading {}", path.display());
        image::open(&path).map_err(|err| Error::FailedToReadFrame {
            reason: format!("{}: {err}", path.display()),
        })
    }

    fn release(&mut self) {
        self.remaining.clear();
    }
}
