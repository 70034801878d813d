//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of near-black pixels above which a warm-up frame counts as dark.
const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Highest `/dev/videoN` index probed by [`Camera::list_devices`].
const MAX_DEVICE_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("no frame available yet")]
    NotReady,
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CameraError {
    /// User-facing hint for recovering from this error.
    pub fn remediation(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "no camera found; connect a camera or pick another device",
            Self::PermissionDenied(_) => {
                "camera access denied; add your user to the 'video' group or grant access"
            }
            Self::DeviceBusy => "camera is in use by another application; close it and retry",
            Self::FormatNegotiationFailed(_) => {
                "camera does not support the requested resolution; try a smaller frame size"
            }
            Self::StreamingNotSupported => "device cannot stream video; pick a capture device",
            Self::CaptureFailed(_) => "camera stopped delivering frames; reconnect it and retry",
            Self::NotReady => "camera is still starting; wait a moment",
            Self::Image(_) => "image could not be read; check the file format",
        }
    }

    /// Transient errors skip a tick instead of ending the session.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotReady)
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
    /// Motion-JPEG, one JPEG image per buffer (common on HD webcams).
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// V4L2 camera device handle. The device is released on drop.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera (e.g. "/dev/video0") and request `width`x`height`.
    ///
    /// The driver may settle on a different size; the negotiated one is
    /// reported through [`FrameSource::dimensions`].
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(device_path.to_string())
            } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; accept GREY or MJPG if that is what the driver settles on.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            if e.to_string().contains("busy") {
                CameraError::DeviceBusy
            } else {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            }
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or MJPG)"
            ))
        })?;
        if negotiated.width == 0 || negotiated.height == 0 {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "driver negotiated an empty frame size for {width}x{height}"
            )));
        }

        tracing::info!(
            requested_width = width,
            requested_height = height,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame as RGBA.
    ///
    /// Each call maps its own stream; buffers are released when it returns.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        if buf.is_empty() || meta.bytesused == 0 {
            return Err(CameraError::NotReady);
        }
        let used = (meta.bytesused as usize).min(buf.len());

        let (data, width, height) = self.buf_to_rgba(&buf[..used])?;
        Ok(Frame::from_rgba(data, width, height, meta.sequence))
    }

    /// Convert a raw buffer to RGBA based on the negotiated format.
    fn buf_to_rgba(&self, buf: &[u8]) -> Result<(Vec<u8>, u32, u32), CameraError> {
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgba(buf, self.width, self.height)
                .map(|rgba| (rgba, self.width, self.height))
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Grey => frame::grey_to_rgba(buf, self.width, self.height)
                .map(|rgba| (rgba, self.width, self.height))
                .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}"))),
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                    .to_rgba8();
                let (w, h) = decoded.dimensions();
                Ok((decoded.into_raw(), w, h))
            }
        }
    }

    /// Discard `count` frames while auto-exposure settles.
    ///
    /// Returns how many of them were dark. Transient errors are ignored;
    /// device errors are returned.
    pub fn warm_up(&self, count: usize) -> Result<usize, CameraError> {
        if count == 0 {
            return Ok(0);
        }
        tracing::info!(count, device = %self.device_path, "discarding warmup frames");
        let mut dark = 0usize;
        for _ in 0..count {
            match self.capture_frame() {
                Ok(f) if frame::is_dark_frame(&f.data, DARK_FRAME_THRESHOLD) => {
                    dark += 1;
                    tracing::debug!(seq = f.sequence, "dark warmup frame");
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(dark)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..MAX_DEVICE_INDEX {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/omr-no-such-camera", 640, 480)
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
        assert!(err.remediation().contains("connect a camera"));
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"MJPG")),
            Some(PixelFormat::Mjpeg)
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), None);
    }

    #[test]
    fn test_remediation_per_cause() {
        let errors = [
            CameraError::DeviceNotFound("x".into()),
            CameraError::PermissionDenied("x".into()),
            CameraError::DeviceBusy,
            CameraError::FormatNegotiationFailed("x".into()),
            CameraError::StreamingNotSupported,
            CameraError::CaptureFailed("x".into()),
            CameraError::NotReady,
        ];
        let mut hints: Vec<_> = errors.iter().map(|e| e.remediation()).collect();
        hints.sort_unstable();
        hints.dedup();
        assert_eq!(hints.len(), errors.len());
        assert!(CameraError::PermissionDenied("x".into())
            .remediation()
            .contains("denied"));
    }

    #[test]
    fn test_only_not_ready_is_transient() {
        assert!(CameraError::NotReady.is_transient());
        assert!(!CameraError::DeviceBusy.is_transient());
        assert!(!CameraError::CaptureFailed("gone".into()).is_transient());
    }
}
