//! Freezing a frame into a JPEG and handing it to a sink.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use omr_core::QualityMetrics;
use omr_hw::Frame;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame available to capture")]
    FrameUnavailable,
    #[error("frame is not ready for capture")]
    NotReady,
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A captured answer sheet plus the quality it was captured at.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedImage {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
    pub jpeg_bytes: usize,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub quality: QualityMetrics,
}

impl CapturedImage {
    pub fn from_frame(
        frame: &Frame,
        quality: QualityMetrics,
        jpeg_quality: u8,
    ) -> Result<Self, CaptureError> {
        let jpeg = encode_jpeg(frame, jpeg_quality)?;
        Ok(Self {
            id: Uuid::new_v4(),
            captured_at: Utc::now(),
            jpeg_bytes: jpeg.len(),
            jpeg,
            width: frame.width,
            height: frame.height,
            sequence: frame.sequence,
            quality,
        })
    }
}

/// Encode an RGBA frame as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    if frame.is_empty() {
        return Err(CaptureError::FrameUnavailable);
    }
    let len = frame.width as usize * frame.height as usize * Frame::CHANNELS;
    let pixels = frame.data.get(..len).ok_or_else(|| {
        CaptureError::Encode(format!(
            "frame buffer holds {} bytes, {}x{} needs {len}",
            frame.data.len(),
            frame.width,
            frame.height
        ))
    })?;
    let rgba = image::RgbaImage::from_raw(frame.width, frame.height, pixels.to_vec())
        .ok_or_else(|| CaptureError::Encode("frame size mismatch".into()))?;
    let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(out)
}

/// Receives captured images. Called at most once per capture.
pub trait CaptureSink {
    fn deliver(&mut self, image: CapturedImage) -> Result<(), CaptureError>;
}

/// Writes `<id>.jpg` and `<id>.json` into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn image_path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.jpg"))
    }

    pub fn metadata_path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl CaptureSink for DirectorySink {
    fn deliver(&mut self, image: CapturedImage) -> Result<(), CaptureError> {
        std::fs::create_dir_all(&self.dir)?;
        let image_path = self.image_path(&image.id);
        std::fs::write(&image_path, &image.jpeg)?;
        let metadata = serde_json::to_vec_pretty(&image)?;
        std::fs::write(self.metadata_path(&image.id), metadata)?;

        tracing::info!(
            id = %image.id,
            path = %image_path.display(),
            bytes = image.jpeg_bytes,
            overall = image.quality.overall,
            "capture delivered"
        );
        Ok(())
    }
}

/// Keeps captures in memory. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    captures: Arc<Mutex<Vec<CapturedImage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captures(&self) -> Vec<CapturedImage> {
        match self.captures.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.captures.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CaptureSink for MemorySink {
    fn deliver(&mut self, image: CapturedImage) -> Result<(), CaptureError> {
        tracing::info!(id = %image.id, bytes = image.jpeg_bytes, "capture delivered");
        match self.captures.lock() {
            Ok(mut guard) => guard.push(image),
            Err(poisoned) => poisoned.into_inner().push(image),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> QualityMetrics {
        QualityMetrics {
            focus: 0.9,
            brightness: 0.5,
            contrast: 1.0,
            skew: 0.0,
            overall: 0.81,
            issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn gradient(w: u32, h: u32) -> Frame {
        let mut data = Vec::with_capacity((w * h * 4) as usize);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128, 255]);
            }
        }
        Frame::from_rgba(data, w, h, 7)
    }

    #[test]
    fn test_encode_jpeg_decodes_back() {
        let frame = gradient(32, 16);
        let jpeg = encode_jpeg(&frame, 95).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn test_encode_rejects_empty_and_short() {
        let empty = Frame::from_rgba(Vec::new(), 0, 0, 0);
        assert!(matches!(
            encode_jpeg(&empty, 95),
            Err(CaptureError::FrameUnavailable)
        ));

        let short = Frame::from_rgba(vec![0u8; 10], 4, 4, 0);
        assert!(matches!(encode_jpeg(&short, 95), Err(CaptureError::Encode(_))));
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let frame = gradient(64, 64);
        let high = encode_jpeg(&frame, 95).unwrap();
        let low = encode_jpeg(&frame, 10).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_memory_sink_shares_store() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let image = CapturedImage::from_frame(&gradient(8, 8), metrics(), 90).unwrap();
        let id = image.id;
        writer.deliver(image).unwrap();

        assert_eq!(sink.len(), 1);
        let stored = sink.captures();
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].sequence, 7);
        assert_eq!(stored[0].jpeg_bytes, stored[0].jpeg.len());
    }

    #[test]
    fn test_directory_sink_writes_image_and_metadata() {
        let dir = std::env::temp_dir().join(format!("omr-captures-{}", Uuid::new_v4()));
        let mut sink = DirectorySink::new(&dir);
        let image = CapturedImage::from_frame(&gradient(8, 8), metrics(), 90).unwrap();
        let id = image.id;
        sink.deliver(image).unwrap();

        let jpeg = std::fs::read(sink.image_path(&id)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(sink.metadata_path(&id)).unwrap()).unwrap();
        assert_eq!(meta["id"], id.to_string());
        assert_eq!(meta["width"], 8);
        assert!(meta.get("jpeg").is_none());
        assert!((meta["quality"]["overall"].as_f64().unwrap() - 0.81).abs() < 1e-6);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
