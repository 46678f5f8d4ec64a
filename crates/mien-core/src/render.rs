//! Overlay rendering for the annotated live stream.
//!
//! Pure functions over an [`image::RgbImage`]: rectangles per detected
//! region (color encodes the verdict), a name + confidence band above
//! recognized faces, and a status line with face count and timestamp.
//! Text uses a built-in 5×7 glyph set; no font assets to ship.

use crate::types::{FaceRegion, MatchResult};
use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const NO_MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const DETECT_ONLY_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
pub const STATUS_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PLACEHOLDER_BG: Rgb<u8> = Rgb([24, 24, 24]);
const PLACEHOLDER_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// What the pipeline knows about one region this frame.
#[derive(Debug, Clone)]
pub enum RegionVerdict {
    /// Detection box only (recognition throttled this frame).
    DetectionOnly,
    /// Matched an enrolled identity.
    Recognized { label: String, result: MatchResult },
    /// Recognition ran and found nobody above threshold.
    Unknown,
}

/// One region plus its verdict, ready to draw.
#[derive(Debug, Clone)]
pub struct RegionOverlay {
    pub region: FaceRegion,
    pub verdict: RegionVerdict,
}

/// Draw detection/recognition overlays and the status line onto a frame.
///
/// Stateless and safe to call every frame; regions partially outside the
/// image are clipped by the drawing primitives.
pub fn annotate(frame: &mut RgbImage, overlays: &[RegionOverlay], now: DateTime<Local>) {
    for overlay in overlays {
        let r = &overlay.region;
        let rect = Rect::at(r.x as i32, r.y as i32).of_size(r.width.max(1), r.height.max(1));

        match &overlay.verdict {
            RegionVerdict::DetectionOnly => {
                draw_box(frame, rect, DETECT_ONLY_COLOR);
            }
            RegionVerdict::Recognized { label, result } => {
                draw_box(frame, rect, MATCH_COLOR);
                let text = format!("{} {}%", label, (result.score * 100.0).round() as i32);
                draw_label_band(frame, r, MATCH_COLOR, &text);
            }
            RegionVerdict::Unknown => {
                draw_box(frame, rect, NO_MATCH_COLOR);
                draw_label_band(frame, r, NO_MATCH_COLOR, "UNKNOWN");
            }
        }
    }

    let status = format!("FACES: {}  {}", overlays.len(), now.format("%H:%M:%S"));
    draw_text(frame, 10, 10, 2, STATUS_COLOR, &status);
}

/// Build the frame emitted while the camera is unavailable.
pub fn placeholder(width: u32, height: u32, message: &str, now: DateTime<Local>) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER_BG);

    let scale = 2u32;
    let text_w = text_width(message, scale);
    let x = (frame.width().saturating_sub(text_w) / 2) as i32;
    let y = (frame.height() / 2) as i32;
    draw_text(&mut frame, x, y, scale, PLACEHOLDER_TEXT, message);

    let clock = format!("{}", now.format("%H:%M:%S"));
    let cx = (frame.width().saturating_sub(text_width(&clock, 1)) / 2) as i32;
    draw_text(&mut frame, cx, y + 24, 1, Rgb([150, 150, 150]), &clock);

    frame
}

/// Two nested hollow rectangles for a 2-sample border.
fn draw_box(frame: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    draw_hollow_rect_mut(frame, rect, color);
    if rect.width() > 2 && rect.height() > 2 {
        let inner = Rect::at(rect.left() + 1, rect.top() + 1)
            .of_size(rect.width() - 2, rect.height() - 2);
        draw_hollow_rect_mut(frame, inner, color);
    }
}

/// Filled band above a region with dark label text inside it.
fn draw_label_band(frame: &mut RgbImage, region: &FaceRegion, color: Rgb<u8>, text: &str) {
    const BAND_H: u32 = 14;
    let y = region.y.saturating_sub(BAND_H);
    let band = Rect::at(region.x as i32, y as i32).of_size(region.width.max(1), BAND_H);
    draw_filled_rect_mut(frame, band, color);
    draw_text(frame, region.x as i32 + 3, y as i32 + 3, 1, LABEL_TEXT_COLOR, text);
}

// --- Minimal 5x7 glyph set ---------------------------------------------

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// Row bitmaps, MSB = leftmost of 5 columns. Lowercase input is rendered
/// with the uppercase glyph; anything else unknown becomes a blank cell.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x06, 0x08, 0x10, 0x1F],
        '3' => [0x0E, 0x11, 0x01, 0x06, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
        '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
        _ => [0; 7],
    }
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale
}

/// Blit text at (x, y) with integer scaling. Out-of-bounds pixels are
/// dropped.
pub fn draw_text(frame: &mut RgbImage, x: i32, y: i32, scale: u32, color: Rgb<u8>, text: &str) {
    let advance = ((GLYPH_W + 1) * scale) as i32;
    let mut pen_x = x;

    for c in text.chars() {
        let rows = glyph(c);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let px = pen_x + (col * scale + sx) as i32;
                        let py = y + (row as u32 * scale + sy) as i32;
                        if px >= 0
                            && py >= 0
                            && (px as u32) < frame.width()
                            && (py as u32) < frame.height()
                        {
                            frame.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        pen_x += advance;
    }
}
