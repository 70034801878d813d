//! Synthetic answer-sheet frames.
//!
//! Renders RGBA frames with a textured paper background, registration marks
//! and optionally filled bubbles. Used by tests across the workspace and by
//! `omr analyze --synthetic` to check a configuration without a camera.

use crate::bubbles::BubbleLayout;
use crate::registration::MarkerLayout;

#[derive(Debug, Clone)]
pub struct SheetSpec {
    pub width: u32,
    pub height: u32,
    /// Mean paper luminance.
    pub paper_level: u8,
    /// Half the peak-to-peak amplitude of the checker texture.
    pub texture: u8,
    /// Checker cell side in pixels.
    pub cell: u32,
    /// Side of each square registration mark, in pixels. 0 draws no marks.
    pub marker_size: u32,
    /// Number of marks drawn, taken from the start of the layout.
    pub marker_count: usize,
    /// `(question, option)` pairs (0-based) to fill.
    pub filled: Vec<(usize, usize)>,
    /// Question count used to place filled bubbles.
    pub questions: usize,
}

impl Default for SheetSpec {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            paper_level: 140,
            texture: 12,
            cell: 4,
            marker_size: 40,
            marker_count: usize::MAX,
            filled: Vec::new(),
            questions: 0,
        }
    }
}

impl SheetSpec {
    /// Same sheet under dimmer or brighter light: every level scaled by `factor`.
    pub fn lit(mut self, factor: f32) -> Self {
        let scale = |v: u8| (v as f32 * factor).round().clamp(0.0, 255.0) as u8;
        self.paper_level = scale(self.paper_level);
        self.texture = scale(self.texture);
        self
    }
}

/// Render `spec` as RGBA, placing marks per `markers` and bubbles per `bubbles`.
pub fn render_sheet(spec: &SheetSpec, markers: &MarkerLayout, bubbles: &BubbleLayout) -> Vec<u8> {
    let (w, h) = (spec.width as usize, spec.height as usize);
    let cell = spec.cell.max(1) as usize;
    let lo = spec.paper_level.saturating_sub(spec.texture);
    let hi = spec.paper_level.saturating_add(spec.texture);

    let mut gray = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            gray[y * w + x] = if (x / cell + y / cell) % 2 == 0 { lo } else { hi };
        }
    }

    let mut paint = |cx: f32, cy: f32, inside: &dyn Fn(f32, f32) -> bool, reach: f32| {
        let x0 = (cx - reach).floor().max(0.0) as usize;
        let y0 = (cy - reach).floor().max(0.0) as usize;
        let x1 = ((cx + reach).ceil().max(0.0) as usize).min(w);
        let y1 = ((cy + reach).ceil().max(0.0) as usize).min(h);
        for y in y0..y1 {
            for x in x0..x1 {
                if inside(x as f32 - cx, y as f32 - cy) {
                    gray[y * w + x] = 0;
                }
            }
        }
    };

    if spec.marker_size > 0 {
        let half = spec.marker_size as f32 / 2.0;
        for marker in markers.markers().iter().take(spec.marker_count) {
            let (cx, cy) = marker.position.resolve(spec.width as f32, spec.height as f32);
            paint(cx, cy, &|dx, dy| dx.abs() <= half && dy.abs() <= half, half + 1.0);
        }
    }

    let r = bubbles.radius * spec.width as f32 + 1.5;
    let scanned = spec.questions.min(bubbles.max_questions);
    for &(q, o) in &spec.filled {
        let (cx, cy) =
            bubbles.bubble_center(q, o, scanned, spec.width as f32, spec.height as f32);
        paint(cx, cy, &|dx, dy| dx * dx + dy * dy <= r * r, r + 1.0);
    }

    gray.iter().flat_map(|&g| [g, g, g, 255]).collect()
}
