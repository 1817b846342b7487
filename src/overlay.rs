//! Overlay drawing on RGB frames: detection boxes, captions, FPS readout.
//!
//! Text uses a built-in 5x7 bitmap font (upper-case letters, digits and a few
//! symbols); lower-case input is folded to upper case and unknown characters
//! advance the pen without drawing.

use image::{Rgb, RgbImage};

use crate::detect::DetectionResult;

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const ADVANCE: i32 = GLYPH_W + 1;

pub const FPS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CAPTION_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
const BACKING: Rgb<u8> = Rgb([0, 0, 0]);

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([207, 210, 49]),
    Rgb([72, 249, 10]),
    Rgb([26, 147, 52]),
    Rgb([0, 194, 255]),
];

/// Box colour for a class id.
pub fn class_color(class_id: u16) -> Rgb<u8> {
    PALETTE[class_id as usize % PALETTE.len()]
}

/// Text scale that keeps captions legible on large frames.
fn text_scale(image: &RgbImage) -> i32 {
    (image.width() as i32 / 640).max(1)
}

/// Draw every detection as a box with a `LABEL 87%` caption.
pub fn draw_detections(image: &mut RgbImage, result: &DetectionResult) {
    let width = image.width() as f32;
    let height = image.height() as f32;
    let scale = text_scale(image);

    for det in &result.detections {
        let left = (det.x * width).round() as i32;
        let top = (det.y * height).round() as i32;
        let right = ((det.x + det.w) * width).round() as i32 - 1;
        let bottom = ((det.y + det.h) * height).round() as i32 - 1;
        let color = class_color(det.class_id);
        draw_rect(image, left, top, right, bottom, 2, color);

        let caption = format!("{} {:.0}%", det.label, det.confidence * 100.0);
        let caption_h = GLYPH_H * scale + 4;
        let caption_y = if top - caption_h >= 0 {
            top - caption_h
        } else {
            top
        };
        fill_rect(
            image,
            left,
            caption_y,
            left + text_width(&caption, scale) + 3,
            caption_y + caption_h - 1,
            color,
        );
        draw_text(image, left + 2, caption_y + 2, &caption, scale, CAPTION_TEXT);
    }
}

/// Draw `FPS: N` in the top-left corner.
pub fn draw_fps(image: &mut RgbImage, fps: f64) {
    let scale = text_scale(image) * 2;
    let text = format!("FPS: {}", fps.max(0.0) as u64);
    let x = 10;
    let y = 10;
    fill_rect(
        image,
        x - 4,
        y - 4,
        x + text_width(&text, scale) + 3,
        y + GLYPH_H * scale + 3,
        BACKING,
    );
    draw_text(image, x, y, &text, scale, FPS_COLOR);
}

/// Width in pixels of `text` at `scale`.
pub fn text_width(text: &str, scale: i32) -> i32 {
    let chars = text.chars().count() as i32;
    if chars == 0 {
        return 0;
    }
    (chars * ADVANCE - 1) * scale
}

/// Rectangle outline with the given stroke, clipped to the image.
pub fn draw_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    stroke: i32,
    color: Rgb<u8>,
) {
    if right < left || bottom < top {
        return;
    }
    for s in 0..stroke.max(1) {
        fill_rect(image, left, top + s, right, top + s, color);
        fill_rect(image, left, bottom - s, right, bottom - s, color);
        fill_rect(image, left + s, top, left + s, bottom, color);
        fill_rect(image, right - s, top, right - s, bottom, color);
    }
}

/// Filled rectangle (inclusive corners), clipped to the image.
pub fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    if max_x < 0 || max_y < 0 {
        return;
    }
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(max_x);
    let bottom = bottom.min(max_y);
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Render `text` with its top-left corner at (`x`, `y`).
pub fn draw_text(image: &mut RgbImage, x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let mut pen = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (bits >> (GLYPH_W - 1 - col)) & 1 == 1 {
                        let px = pen + col * scale;
                        let py = y + row as i32 * scale;
                        fill_rect(image, px, py, px + scale - 1, py + scale - 1, color);
                    }
                }
            }
        }
        pen += ADVANCE * scale;
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'B' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
        'C' => Some([0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
        'D' => Some([0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110]),
        'E' => Some([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111]),
        'F' => Some([0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000]),
        'G' => Some([0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
        'H' => Some([0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
        'I' => Some([0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        'J' => Some([0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
        'K' => Some([0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
        'L' => Some([0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
        'M' => Some([0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
        'N' => Some([0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001]),
        'O' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'P' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
        'Q' => Some([0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
        'R' => Some([0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
        'S' => Some([0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110]),
        'T' => Some([0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
        'U' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
        'V' => Some([0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
        'W' => Some([0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
        'X' => Some([0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001]),
        'Y' => Some([0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100]),
        'Z' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
        '0' => Some([0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some([0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some([0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some([0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110]),
        '4' => Some([0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some([0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some([0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some([0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some([0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some([0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        ':' => Some([0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000]),
        '.' => Some([0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100]),
        '%' => Some([0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011]),
        '-' => Some([0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000]),
        '/' => Some([0b00000, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b00000]),
        ' ' => Some([0; 7]),
        _ => None,
    }
}
