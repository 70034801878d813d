//! A still image served as an endless stream of identical frames.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::FrameSource;
use std::path::Path;

pub struct StillSource {
    label: String,
    data: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u32,
}

impl StillSource {
    /// Decode any format the `image` crate understands into RGBA.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CameraError::DeviceNotFound(path.display().to_string()));
        }
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        tracing::info!(path = %path.display(), width, height, "loaded still image");
        Ok(Self::from_rgba(
            path.display().to_string(),
            rgba.into_raw(),
            width,
            height,
        ))
    }

    /// Wrap an RGBA buffer that is already in memory.
    pub fn from_rgba(label: impl Into<String>, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            data,
            width,
            height,
            sequence: 0,
        }
    }
}

impl FrameSource for StillSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let frame = Frame::from_rgba(self.data.clone(), self.width, self.height, self.sequence);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
