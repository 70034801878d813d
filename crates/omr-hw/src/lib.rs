//! omr-hw — Frame sources for the OMR scanner.
//!
//! Provides V4L2-based camera access, a still-image source, and the RGBA
//! [`Frame`] type the analysis pipeline consumes.

pub mod camera;
pub mod frame;
pub mod source;
pub mod still;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::FrameSource;
pub use still::StillSource;
