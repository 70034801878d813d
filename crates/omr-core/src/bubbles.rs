//! Advisory bubble fill scanning for the live overlay.
//!
//! Guesses where each answer bubble sits from a fixed column/row layout and
//! reports how dark each one looks. The result only drives on-screen
//! highlights; grading never reads it.

use crate::grading::{AnswerKey, Choice};
use crate::types::{AlignmentStatus, DetectedBubble, GrayscaleBuffer};
use serde::{Deserialize, Serialize};

/// Fewest options scanned per question, even if the key only uses A–C.
const MIN_OPTIONS: usize = 4;

/// Sheet geometry, as fractions of the source frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BubbleLayout {
    pub columns: usize,
    /// Questions beyond this are not scanned in a single frame.
    pub max_questions: usize,
    pub origin_x: f32,
    pub origin_y: f32,
    pub column_width: f32,
    pub row_height: f32,
    pub option_spacing: f32,
    /// Bubble radius as a fraction of frame width.
    pub radius: f32,
    pub dark_threshold: u8,
    pub fill_threshold: f32,
}

impl Default for BubbleLayout {
    fn default() -> Self {
        Self {
            columns: 3,
            max_questions: 30,
            origin_x: 0.12,
            origin_y: 0.22,
            column_width: 0.28,
            row_height: 0.065,
            option_spacing: 0.045,
            radius: 0.012,
            dark_threshold: 120,
            fill_threshold: 0.4,
        }
    }
}

impl BubbleLayout {
    /// Number of questions a frame will scan for `key`.
    pub fn scanned_questions(&self, key: &AnswerKey) -> usize {
        key.len().min(self.max_questions)
    }

    /// Options per question: up to the highest letter the key uses, at least
    /// [`MIN_OPTIONS`], at most E.
    pub fn option_count(&self, key: &AnswerKey) -> usize {
        let used = key.highest_choice().map(|c| c.index() + 1).unwrap_or(0);
        used.clamp(MIN_OPTIONS, Choice::ALL.len())
    }

    /// Center of a bubble in source pixels. `question` and `option` are 0-based.
    pub fn bubble_center(
        &self,
        question: usize,
        option: usize,
        scanned: usize,
        width: f32,
        height: f32,
    ) -> (f32, f32) {
        let columns = self.columns.max(1);
        let rows_per_column = scanned.div_ceil(columns).max(1);
        let column = question / rows_per_column;
        let row = question % rows_per_column;

        let x = self.origin_x
            + column as f32 * self.column_width
            + option as f32 * self.option_spacing;
        let y = self.origin_y + row as f32 * self.row_height;
        (x * width, y * height)
    }
}

/// Fraction of dark samples inside a disc, clipped to the buffer.
fn disc_fill_ratio(gray: &GrayscaleBuffer, cx: i64, cy: i64, r: i64, dark: u8) -> f32 {
    let (w, h) = (gray.width as i64, gray.height as i64);
    let r2 = r * r;
    let mut dark_count = 0usize;
    let mut sampled = 0usize;
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy > r2 {
                continue;
            }
            if let Some(p) = gray.get(x, y) {
                sampled += 1;
                if p < dark {
                    dark_count += 1;
                }
            }
        }
    }
    if sampled == 0 {
        return 0.0;
    }
    dark_count as f32 / sampled as f32
}

/// Estimate fill for every (question, option) of the scanned range.
///
/// Returns nothing unless paper was detected in this frame.
pub fn scan_bubbles(
    gray: &GrayscaleBuffer,
    key: &AnswerKey,
    alignment: &AlignmentStatus,
    layout: &BubbleLayout,
) -> Vec<DetectedBubble> {
    if !alignment.paper_detected || gray.is_empty() {
        return Vec::new();
    }

    let scanned = layout.scanned_questions(key);
    let options = layout.option_count(key);
    let stride = gray.stride.max(1) as f32;
    let src_w = gray.source_width as f32;
    let src_h = gray.source_height as f32;
    let r = ((layout.radius * src_w / stride).round() as i64).clamp(1, gray.max_extent().max(1));

    let mut bubbles = Vec::with_capacity(scanned * options);
    for q in 0..scanned {
        for (o, choice) in Choice::ALL.iter().take(options).enumerate() {
            let (x, y) = layout.bubble_center(q, o, scanned, src_w, src_h);
            let (cx, cy) = gray.to_sampled(x, y, r);
            let fill_ratio = disc_fill_ratio(gray, cx, cy, r, layout.dark_threshold);
            bubbles.push(DetectedBubble {
                x,
                y,
                option: choice.letter(),
                question_number: q + 1,
                is_filled: fill_ratio > layout.fill_threshold,
                fill_ratio,
                confidence: (fill_ratio * 2.0).min(1.0),
            });
        }
    }
    bubbles
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 600;
    const H: u32 = 800;

    fn paper() -> AlignmentStatus {
        AlignmentStatus {
            paper_detected: true,
            within_frame: true,
            alignment: 1.0,
            detected_markers: 4,
            required_markers: 3,
            corners: Vec::new(),
        }
    }

    fn fill_disc(gray: &mut [u8], cx: f32, cy: f32, r: f32) {
        for y in 0..H {
            for x in 0..W {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                if dx * dx + dy * dy <= r * r {
                    gray[(y * W + x) as usize] = 20;
                }
            }
        }
    }

    #[test]
    fn test_filled_bubble_detected() {
        let layout = BubbleLayout::default();
        let key = AnswerKey::parse_list("A,B,C,D,A,B").unwrap();
        let scanned = layout.scanned_questions(&key);

        // Student filled question 2, option C
        let mut data = vec![235u8; (W * H) as usize];
        let (cx, cy) = layout.bubble_center(1, 2, scanned, W as f32, H as f32);
        fill_disc(&mut data, cx, cy, layout.radius * W as f32 + 2.0);
        let gray = GrayscaleBuffer::full_resolution(data, W, H);

        let bubbles = scan_bubbles(&gray, &key, &paper(), &layout);
        assert_eq!(bubbles.len(), 6 * 4);

        let filled: Vec<_> = bubbles.iter().filter(|b| b.is_filled).collect();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].question_number, 2);
        assert_eq!(filled[0].option, 'C');
        assert_eq!(filled[0].confidence, 1.0);
        assert!(bubbles.iter().filter(|b| !b.is_filled).all(|b| b.confidence == 0.0));
    }

    #[test]
    fn test_no_scan_without_paper() {
        let gray = GrayscaleBuffer::full_resolution(vec![0u8; (W * H) as usize], W, H);
        let key = AnswerKey::parse_list("A,B").unwrap();
        let mut status = paper();
        status.paper_detected = false;
        assert!(scan_bubbles(&gray, &key, &status, &BubbleLayout::default()).is_empty());
    }

    #[test]
    fn test_question_cap() {
        let layout = BubbleLayout {
            max_questions: 15,
            ..BubbleLayout::default()
        };
        let key = AnswerKey::new(vec![crate::grading::Answer::Choice(Choice::E); 40]);
        let gray = GrayscaleBuffer::full_resolution(vec![255u8; (W * H) as usize], W, H);
        let bubbles = scan_bubbles(&gray, &key, &paper(), &layout);
        assert_eq!(bubbles.len(), 15 * 5);
        assert_eq!(bubbles.last().map(|b| b.question_number), Some(15));
    }

    #[test]
    fn test_column_layout() {
        let layout = BubbleLayout::default();
        // 30 questions in 3 columns → 10 rows each; question 10 starts column 1
        let (x0, y0) = layout.bubble_center(0, 0, 30, 1.0, 1.0);
        let (x10, y10) = layout.bubble_center(10, 0, 30, 1.0, 1.0);
        assert!((x10 - x0 - layout.column_width).abs() < 1e-6);
        assert!((y10 - y0).abs() < 1e-6);
        let (_, y9) = layout.bubble_center(9, 0, 30, 1.0, 1.0);
        assert!((y9 - (layout.origin_y + 9.0 * layout.row_height)).abs() < 1e-6);
    }

    #[test]
    fn test_option_count_bounds() {
        let layout = BubbleLayout::default();
        assert_eq!(layout.option_count(&AnswerKey::parse_list("A,B").unwrap()), 4);
        assert_eq!(layout.option_count(&AnswerKey::parse_list("A,E").unwrap()), 5);
        assert_eq!(layout.option_count(&AnswerKey::parse_list("BLANK").unwrap()), 4);
    }

    #[test]
    fn test_off_frame_bubble_is_empty() {
        let layout = BubbleLayout {
            origin_x: 5.0,
            ..BubbleLayout::default()
        };
        let key = AnswerKey::parse_list("A").unwrap();
        let gray = GrayscaleBuffer::full_resolution(vec![0u8; (W * H) as usize], W, H);
        let bubbles = scan_bubbles(&gray, &key, &paper(), &layout);
        assert!(bubbles.iter().all(|b| b.fill_ratio == 0.0 && !b.is_filled));
    }

    #[test]
    fn test_extreme_layout_values_do_not_overflow() {
        let key = AnswerKey::parse_list("A,B").unwrap();
        let gray = GrayscaleBuffer::full_resolution(vec![0u8; (W * H) as usize], W, H);

        let far = BubbleLayout {
            origin_x: f32::MAX,
            column_width: f32::MAX,
            ..BubbleLayout::default()
        };
        let bubbles = scan_bubbles(&gray, &key, &paper(), &far);
        assert_eq!(bubbles.len(), 2 * 4);
        assert!(bubbles.iter().all(|b| b.fill_ratio == 0.0));

        let nan = BubbleLayout {
            origin_y: f32::NAN,
            ..BubbleLayout::default()
        };
        let bubbles = scan_bubbles(&gray, &key, &paper(), &nan);
        assert!(bubbles.iter().all(|b| !b.is_filled));

        // A radius larger than the frame covers every sample.
        let huge = BubbleLayout {
            radius: f32::MAX,
            origin_x: 0.5,
            origin_y: 0.5,
            option_spacing: 0.0,
            ..BubbleLayout::default()
        };
        let bubbles = scan_bubbles(&gray, &key, &paper(), &huge);
        assert!(bubbles.iter().all(|b| b.is_filled && b.fill_ratio == 1.0));
    }
}
