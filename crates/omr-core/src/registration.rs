//! Registration mark detection.
//!
//! Answer sheets carry dark square marks at known positions (the four corners,
//! optionally plus the edge midpoints). Each expected mark is searched for in a
//! square window around its nominal position; a window that is mostly dark
//! counts as a detected mark. Paper is considered present when a strict
//! majority of the expected marks is found.

use crate::types::{AlignmentStatus, Corner, GrayscaleBuffer};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_INSET: f32 = 0.06;
const DEFAULT_MARGIN_PX: f32 = 48.0;

/// Where a mark is expected, resolved against the source frame size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerPosition {
    /// Source pixel coordinates.
    Absolute { x: f32, y: f32 },
    /// Fractions of the frame width and height.
    Relative { fx: f32, fy: f32 },
    /// A frame-relative anchor plus a fixed pixel offset, for marks placed a
    /// fixed margin in from an edge regardless of resolution.
    Offset { fx: f32, fy: f32, dx: f32, dy: f32 },
}

impl MarkerPosition {
    /// Center in source pixels for a `width × height` frame.
    pub fn resolve(&self, width: f32, height: f32) -> (f32, f32) {
        match *self {
            MarkerPosition::Absolute { x, y } => (x, y),
            MarkerPosition::Relative { fx, fy } => (fx * width, fy * height),
            MarkerPosition::Offset { fx, fy, dx, dy } => (fx * width + dx, fy * height + dy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    pub name: String,
    pub position: MarkerPosition,
}

impl MarkerSpec {
    pub fn new(name: &str, position: MarkerPosition) -> Self {
        Self {
            name: name.to_string(),
            position,
        }
    }
}

/// Expected marks and how many of them must be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerLayout {
    markers: Vec<MarkerSpec>,
    required: usize,
}

impl MarkerLayout {
    /// Build a layout, raising `required` to a strict majority of `markers`
    /// and capping it at the marker count.
    pub fn new(markers: Vec<MarkerSpec>, required: usize) -> Self {
        let majority = markers.len() / 2 + 1;
        let required = required.clamp(majority, markers.len().max(majority));
        Self { markers, required }
    }

    /// Four corner marks at `inset` (fraction of frame size) from each edge; 3 required.
    pub fn four_corner(inset: f32) -> Self {
        let lo = inset;
        let hi = 1.0 - inset;
        Self::new(
            vec![
                MarkerSpec::new("top-left", MarkerPosition::Relative { fx: lo, fy: lo }),
                MarkerSpec::new("top-right", MarkerPosition::Relative { fx: hi, fy: lo }),
                MarkerSpec::new("bottom-left", MarkerPosition::Relative { fx: lo, fy: hi }),
                MarkerSpec::new("bottom-right", MarkerPosition::Relative { fx: hi, fy: hi }),
            ],
            3,
        )
    }

    /// Four corner marks a fixed `margin` in source pixels from each edge; 3 required.
    pub fn fixed_margin(margin: f32) -> Self {
        let m = margin;
        let at = |fx: f32, fy: f32, dx: f32, dy: f32| MarkerPosition::Offset { fx, fy, dx, dy };
        Self::new(
            vec![
                MarkerSpec::new("top-left", at(0.0, 0.0, m, m)),
                MarkerSpec::new("top-right", at(1.0, 0.0, -m, m)),
                MarkerSpec::new("bottom-left", at(0.0, 1.0, m, -m)),
                MarkerSpec::new("bottom-right", at(1.0, 1.0, -m, -m)),
            ],
            3,
        )
    }

    /// Corners plus edge midpoints at `inset`; 6 of 8 required.
    pub fn eight_point(inset: f32) -> Self {
        let lo = inset;
        let hi = 1.0 - inset;
        let rel = |fx: f32, fy: f32| MarkerPosition::Relative { fx, fy };
        Self::new(
            vec![
                MarkerSpec::new("top-left", rel(lo, lo)),
                MarkerSpec::new("top-center", rel(0.5, lo)),
                MarkerSpec::new("top-right", rel(hi, lo)),
                MarkerSpec::new("middle-right", rel(hi, 0.5)),
                MarkerSpec::new("bottom-right", rel(hi, hi)),
                MarkerSpec::new("bottom-center", rel(0.5, hi)),
                MarkerSpec::new("bottom-left", rel(lo, hi)),
                MarkerSpec::new("middle-left", rel(lo, 0.5)),
            ],
            6,
        )
    }

    pub fn markers(&self) -> &[MarkerSpec] {
        &self.markers
    }

    pub fn required(&self) -> usize {
        self.required
    }
}

impl Default for MarkerLayout {
    fn default() -> Self {
        Self::four_corner(DEFAULT_INSET)
    }
}

/// Named layout presets, as selected from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    FourCorner,
    FixedMargin,
    EightPoint,
}

impl LayoutKind {
    pub fn build(&self) -> MarkerLayout {
        match self {
            LayoutKind::FourCorner => MarkerLayout::four_corner(DEFAULT_INSET),
            LayoutKind::FixedMargin => MarkerLayout::fixed_margin(DEFAULT_MARGIN_PX),
            LayoutKind::EightPoint => MarkerLayout::eight_point(DEFAULT_INSET),
        }
    }
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "four-corner" | "four_corner" | "4" => Ok(LayoutKind::FourCorner),
            "fixed-margin" | "fixed_margin" => Ok(LayoutKind::FixedMargin),
            "eight-point" | "eight_point" | "8" => Ok(LayoutKind::EightPoint),
            other => Err(format!(
                "unknown marker layout '{other}' (expected four-corner, fixed-margin or eight-point)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Half the search window side, in source pixels.
    pub half_size: f32,
    /// Samples below this luminance count as dark.
    pub dark_threshold: u8,
    /// A window whose dark ratio exceeds this is a detected mark.
    pub detection_ratio: f32,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            half_size: 16.0,
            dark_threshold: 100,
            detection_ratio: 0.6,
        }
    }
}

struct WindowStats {
    dark_ratio: f32,
    clipped: bool,
}

/// Count dark samples in the square window around a sampled-grid center,
/// clipping the window to the buffer.
fn sample_window(gray: &GrayscaleBuffer, cx: i64, cy: i64, half: i64, dark: u8) -> WindowStats {
    let (w, h) = (gray.width as i64, gray.height as i64);
    let x0 = cx - half;
    let x1 = cx + half;
    let y0 = cy - half;
    let y1 = cy + half;
    let clipped = x0 < 0 || y0 < 0 || x1 >= w || y1 >= h;

    let mut dark_count = 0usize;
    let mut sampled = 0usize;
    for y in y0.max(0)..=y1.min(h - 1) {
        for x in x0.max(0)..=x1.min(w - 1) {
            if let Some(p) = gray.get(x, y) {
                sampled += 1;
                if p < dark {
                    dark_count += 1;
                }
            }
        }
    }

    let dark_ratio = if sampled > 0 {
        dark_count as f32 / sampled as f32
    } else {
        0.0
    };
    WindowStats {
        dark_ratio,
        clipped,
    }
}

/// Search for every mark of `layout` and score paper registration.
pub fn detect_registration(
    gray: &GrayscaleBuffer,
    layout: &MarkerLayout,
    params: &RegistrationParams,
) -> AlignmentStatus {
    let required = layout.required();
    if gray.is_empty() || layout.markers().is_empty() {
        return AlignmentStatus::not_found(required);
    }

    let stride = gray.stride.max(1) as f32;
    let src_w = gray.source_width as f32;
    let src_h = gray.source_height as f32;
    let half = ((params.half_size / stride).round() as i64).clamp(1, gray.max_extent().max(1));

    let mut corners = Vec::with_capacity(layout.markers().len());
    let mut any_detected_clipped = false;

    for marker in layout.markers() {
        let (x, y) = marker.position.resolve(src_w, src_h);
        let (cx, cy) = gray.to_sampled(x, y, half);
        let stats = sample_window(gray, cx, cy, half, params.dark_threshold);
        let detected = stats.dark_ratio > params.detection_ratio;
        if detected && stats.clipped {
            any_detected_clipped = true;
        }
        corners.push(Corner {
            x,
            y,
            detected,
            name: marker.name.clone(),
            dark_ratio: stats.dark_ratio,
        });
    }

    let detected_markers = corners.iter().filter(|c| c.detected).count();
    let paper_detected = detected_markers >= required;

    AlignmentStatus {
        paper_detected,
        within_frame: paper_detected && !any_detected_clipped,
        alignment: detected_markers as f32 / corners.len() as f32,
        detected_markers,
        required_markers: required,
        corners,
    }
}
