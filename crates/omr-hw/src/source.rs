//! The frame-source seam between hardware and the scanner session.

use crate::camera::CameraError;
use crate::frame::Frame;

/// Something that yields RGBA frames: a live camera or a still image.
pub trait FrameSource {
    /// Pull the next frame. [`CameraError::NotReady`] means "try next tick".
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Frame size, or `None` before the source has reported metadata.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Short label for logs.
    fn describe(&self) -> String;
}
