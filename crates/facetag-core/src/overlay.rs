//! Overlay rendering: one labelled rectangle per match result, redrawn from
//! scratch on every call.

use crate::types::{BoundingBox, FrameSize, MatchResult};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::PathBuf;
use thiserror::Error;

const BOX_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const UNKNOWN_BOX_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LINE_WIDTH: u32 = 2;

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_SCALE: i32 = 2;
const LABEL_PADDING: i32 = 3;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to write snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to publish snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A drawing target for match results.
pub trait OverlaySurface {
    /// Size of the surface in pixels; boxes must already be in this space.
    fn size(&self) -> FrameSize;

    /// Erase everything drawn so far.
    fn clear(&mut self);

    fn draw_labeled_box(&mut self, bbox: &BoundingBox, caption: &str, matched: bool);

    /// Show the finished redraw. `frame` is the source frame the results came from.
    fn present(&mut self, _frame: &RgbImage) -> Result<(), RenderError> {
        Ok(())
    }
}

/// Clear `surface`, then draw every result in `results`.
pub fn render<S: OverlaySurface + ?Sized>(surface: &mut S, results: &[MatchResult]) {
    surface.clear();
    for result in results {
        surface.draw_labeled_box(&result.bbox, &result.caption(), result.matched);
    }
}

/// Transparent RGBA overlay held in memory.
pub struct ImageOverlay {
    canvas: RgbaImage,
}

impl ImageOverlay {
    pub fn new(size: FrameSize) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(size.width, size.height, TRANSPARENT),
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// The frame scaled to overlay size with the overlay blended on top.
    pub fn composite(&self, frame: &RgbImage) -> RgbImage {
        composite(frame, &self.canvas)
    }
}

impl OverlaySurface for ImageOverlay {
    fn size(&self) -> FrameSize {
        FrameSize::new(self.canvas.width(), self.canvas.height())
    }

    fn clear(&mut self) {
        self.canvas.pixels_mut().for_each(|p| *p = TRANSPARENT);
    }

    fn draw_labeled_box(&mut self, bbox: &BoundingBox, caption: &str, matched: bool) {
        let color = if matched { BOX_COLOR } else { UNKNOWN_BOX_COLOR };

        // Clamp to the canvas first; `max`/`min` also map NaN onto an edge.
        let (cw, ch) = (self.canvas.width() as f32, self.canvas.height() as f32);
        let x0 = bbox.x.max(0.0).min(cw);
        let y0 = bbox.y.max(0.0).min(ch);
        let x1 = (bbox.x + bbox.width).max(0.0).min(cw);
        let y1 = (bbox.y + bbox.height).max(0.0).min(ch);
        if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
            tracing::trace!(?bbox, "box outside the canvas; not drawn");
            return;
        }

        let x = x0.round() as i32;
        let y = y0.round() as i32;
        let w = (x1 - x0).round().max(1.0) as u32;
        let h = (y1 - y0).round().max(1.0) as u32;

        for i in 0..LINE_WIDTH {
            if w <= 2 * i || h <= 2 * i {
                break;
            }
            let rect = Rect::at(x + i as i32, y + i as i32).of_size(w - 2 * i, h - 2 * i);
            draw_hollow_rect_mut(&mut self.canvas, rect, color);
        }

        if caption.is_empty() {
            return;
        }

        // Caption tab hangs below the bottom-left corner.
        let text_w = text_width(caption);
        let tab = Rect::at(x, y + h as i32).of_size(
            (text_w + 2 * LABEL_PADDING) as u32,
            (GLYPH_H * GLYPH_SCALE + 2 * LABEL_PADDING) as u32,
        );
        draw_filled_rect_mut(&mut self.canvas, tab, color);
        draw_text(
            &mut self.canvas,
            x + LABEL_PADDING,
            y + h as i32 + LABEL_PADDING,
            caption,
            TEXT_COLOR,
        );
    }
}

/// Scale `frame` to the overlay's size and alpha-blend the overlay on top.
pub fn composite(frame: &RgbImage, overlay: &RgbaImage) -> RgbImage {
    let base = if frame.dimensions() == overlay.dimensions() {
        DynamicImage::ImageRgb8(frame.clone()).to_rgba8()
    } else {
        let scaled =
            imageops::resize(frame, overlay.width(), overlay.height(), FilterType::Triangle);
        DynamicImage::ImageRgb8(scaled).to_rgba8()
    };
    let mut base = base;
    imageops::overlay(&mut base, overlay, 0, 0);
    DynamicImage::ImageRgba8(base).to_rgb8()
}

fn text_width(text: &str) -> i32 {
    let n = text.chars().count() as i32;
    if n == 0 {
        0
    } else {
        n * (GLYPH_W + 1) * GLYPH_SCALE - GLYPH_SCALE
    }
}

fn draw_text(canvas: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
    let mut cursor = x;
    for ch in text.chars() {
        draw_glyph(canvas, cursor, y, glyph(ch), color);
        cursor += (GLYPH_W + 1) * GLYPH_SCALE;
    }
}

fn draw_glyph(canvas: &mut RgbaImage, x: i32, y: i32, rows: [u8; 7], color: Rgba<u8>) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_W {
            if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                continue;
            }
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    let px = x + col * GLYPH_SCALE + dx;
                    let py = y + row as i32 * GLYPH_SCALE + dy;
                    if px >= 0 && py >= 0 && px < cw && py < ch {
                        canvas.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
    }
}

/// 5x7 bitmap glyphs. Lowercase renders as uppercase; unsupported
/// characters render as a hollow box.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
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
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Op {
        Clear,
        Draw(String),
        Present,
    }

    /// Records every surface call in order.
    pub(crate) struct RecordingSurface {
        pub size: FrameSize,
        pub ops: Vec<Op>,
        pub boxes: Vec<BoundingBox>,
    }

    impl RecordingSurface {
        pub fn new(size: FrameSize) -> Self {
            Self {
                size,
                ops: Vec::new(),
                boxes: Vec::new(),
            }
        }

        /// Captions drawn since the most recent clear.
        pub fn visible(&self) -> Vec<String> {
            let start = self.ops.iter().rposition(|op| *op == Op::Clear).map_or(0, |i| i + 1);
            self.ops[start..]
                .iter()
                .filter_map(|op| match op {
                    Op::Draw(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl OverlaySurface for RecordingSurface {
        fn size(&self) -> FrameSize {
            self.size
        }

        fn clear(&mut self) {
            self.ops.push(Op::Clear);
        }

        fn draw_labeled_box(&mut self, bbox: &BoundingBox, caption: &str, _matched: bool) {
            self.boxes.push(bbox.clone());
            self.ops.push(Op::Draw(caption.to_string()));
        }

        fn present(&mut self, _frame: &RgbImage) -> Result<(), RenderError> {
            self.ops.push(Op::Present);
            Ok(())
        }
    }
}
