use omr_core::{AnalysisConfig, FrameAnalyzer, LayoutKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid analysis config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Scanner configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerConfig {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub frame_width: u32,
    pub frame_height: u32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    /// Delay between session ticks.
    pub frame_interval_ms: u64,
    /// Whether a sustained high-quality view triggers capture by itself.
    pub auto_capture: bool,
    pub countdown_secs: u64,
    /// Overall score that starts the auto-capture countdown.
    pub auto_capture_overall: f32,
    /// JPEG quality for captured images, 1–100.
    pub jpeg_quality: u8,
    pub output_dir: PathBuf,
    /// Run analysis on a background thread instead of inline.
    pub use_worker: bool,
    pub marker_layout: LayoutKind,
    /// TOML file the analysis parameters were read from, if any.
    pub analysis_config_path: Option<PathBuf>,
    pub analysis: AnalysisConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ScannerConfig {
    /// Load configuration from `OMR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = get("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("omr-scanner");

        let output_dir = get("OMR_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("captures"));

        let marker_layout = match get("OMR_MARKER_LAYOUT") {
            Some(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "ignoring OMR_MARKER_LAYOUT");
                LayoutKind::FourCorner
            }),
            None => LayoutKind::FourCorner,
        };

        let analysis_config_path = get("OMR_ANALYSIS_CONFIG").map(PathBuf::from);
        let analysis = match &analysis_config_path {
            Some(path) => load_analysis_config(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "using default analysis parameters");
                AnalysisConfig::default()
            }),
            None => AnalysisConfig::default(),
        };

        Self {
            camera_device: get("OMR_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: parse_or(get("OMR_FRAME_WIDTH"), 1280),
            frame_height: parse_or(get("OMR_FRAME_HEIGHT"), 720),
            warmup_frames: parse_or(get("OMR_WARMUP_FRAMES"), 4),
            frame_interval_ms: parse_or(get("OMR_FRAME_INTERVAL_MS"), 33),
            auto_capture: flag_or(get("OMR_AUTO_CAPTURE"), true),
            countdown_secs: parse_or(get("OMR_COUNTDOWN_SECS"), 3),
            auto_capture_overall: parse_unit_or(get("OMR_AUTO_CAPTURE_OVERALL"), 0.9),
            jpeg_quality: parse_or(get("OMR_JPEG_QUALITY"), 95u8).clamp(1, 100),
            output_dir,
            use_worker: flag_or(get("OMR_USE_WORKER"), true),
            marker_layout,
            analysis_config_path,
            analysis,
        }
    }

    /// Analyzer built from the analysis parameters and marker layout.
    pub fn analyzer(&self) -> FrameAnalyzer {
        FrameAnalyzer::new(self.analysis.clone(), self.marker_layout.build())
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Read analysis parameters from a TOML file. Missing keys keep defaults.
pub fn load_analysis_config(path: &Path) -> Result<AnalysisConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AnalysisConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let (config, replaced) = config.sanitized();
    if !replaced.is_empty() {
        tracing::warn!(
            path = %path.display(),
            fields = ?replaced,
            "non-finite values replaced with defaults"
        );
    }
    tracing::info!(path = %path.display(), "loaded analysis config");
    Ok(config)
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// A finite number clamped to [0, 1]; NaN and infinities fall back.
fn parse_unit_or(value: Option<String>, default: f32) -> f32 {
    value
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(default)
}

/// Any value other than "0" enables the flag.
fn flag_or(value: Option<String>, default: bool) -> bool {
    value.map(|v| v.trim() != "0").unwrap_or(default)
}
