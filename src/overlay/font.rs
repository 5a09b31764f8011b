use std::fmt;
use std::path::Path;

use fontdue::{Font, FontSettings};
use image::RgbImage;

use crate::error::{ConfigError, Result};

/// Glyph cell edge of the built-in bitmap font, in pixels at scale 1
const BUILTIN_CELL: i64 = 8;

/// Pixel size of a TrueType font at scale 1
const TRUETYPE_BASE_PX: f32 = 16.0;

/// A face that text overlays are drawn with
pub enum FontFace {
    /// 8x8 bitmap glyphs, scaled by whole pixels
    Builtin,
    /// Rasterised outline font loaded from disk
    TrueType(Box<Font>),
}

impl fmt::Debug for FontFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("FontFace::Builtin"),
            Self::TrueType(_) => f.write_str("FontFace::TrueType"),
        }
    }
}

impl FontFace {
    pub const BUILTIN: &'static str = "builtin";

    /// Resolve a font setting: `"builtin"` or a TrueType/OpenType file path
    pub fn load(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case(Self::BUILTIN) {
            return Ok(Self::Builtin);
        }

        let path = Path::new(name);
        let bytes = std::fs::read(path).map_err(|e| ConfigError::FontLoadFailed {
            font: name.to_string(),
            reason: e.to_string(),
        })?;

        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|e| {
            ConfigError::FontLoadFailed {
                font: name.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self::TrueType(Box::new(font)))
    }

    fn builtin_scale(scale: f32) -> i64 {
        (scale.round() as i64).max(1)
    }

    /// Baseline-to-baseline distance used when a box leaves `lineheight` unset
    pub fn default_line_height(&self, scale: f32) -> u32 {
        match self {
            Self::Builtin => (BUILTIN_CELL * Self::builtin_scale(scale) * 3 / 2) as u32,
            Self::TrueType(font) => {
                let px = TRUETYPE_BASE_PX * scale;
                font.horizontal_line_metrics(px)
                    .map(|m| m.new_line_size.ceil() as u32)
                    .unwrap_or((px * 1.25).ceil() as u32)
                    .max(1)
            }
        }
    }

    /// Draw one line of text with its baseline at `baseline`.
    ///
    /// Only the image edges bound the drawing; callers that need a tighter
    /// region must clip afterwards.
    pub fn draw_text(
        &self,
        image: &mut RgbImage,
        x: i64,
        baseline: i64,
        text: &str,
        scale: f32,
        color: [u8; 3],
    ) {
        match self {
            Self::Builtin => draw_builtin(image, x, baseline, text, Self::builtin_scale(scale), color),
            Self::TrueType(font) => {
                draw_truetype(font, image, x, baseline, text, TRUETYPE_BASE_PX * scale, color)
            }
        }
    }
}

fn draw_builtin(image: &mut RgbImage, x: i64, baseline: i64, text: &str, scale: i64, color: [u8; 3]) {
    let cell = BUILTIN_CELL * scale;
    let top = baseline - cell;

    for (i, ch) in text.chars().enumerate() {
        let code = if ch.is_ascii() { ch as usize } else { '?' as usize };
        let glyph = font8x8::legacy::BASIC_LEGACY[code];
        let left = x + i as i64 * cell;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..8 {
                if bits & (1 << col) == 0 {
                    continue;
                }
                let px = left + col as i64 * scale;
                let py = top + row as i64 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        blend_pixel(image, px + dx, py + dy, color, 255);
                    }
                }
            }
        }
    }
}

fn draw_truetype(
    font: &Font,
    image: &mut RgbImage,
    x: i64,
    baseline: i64,
    text: &str,
    px: f32,
    color: [u8; 3],
) {
    let mut pen = x as f32;
    for ch in text.chars() {
        let (metrics, coverage) = font.rasterize(ch, px);
        let left = pen.round() as i64 + metrics.xmin as i64;
        let top = baseline - metrics.ymin as i64 - metrics.height as i64;

        for (i, &alpha) in coverage.iter().enumerate() {
            if alpha == 0 {
                continue;
            }
            let gx = (i % metrics.width) as i64;
            let gy = (i / metrics.width) as i64;
            blend_pixel(image, left + gx, top + gy, color, alpha);
        }

        pen += metrics.advance_width;
    }
}

fn blend_pixel(image: &mut RgbImage, x: i64, y: i64, color: [u8; 3], coverage: u8) {
    if x < 0 || y < 0 || x >= image.width() as i64 || y >= image.height() as i64 {
        return;
    }
    let pixel = image.get_pixel_mut(x as u32, y as u32);
    if coverage == 255 {
        pixel.0 = color;
        return;
    }
    let a = coverage as u16;
    for (dst, src) in pixel.0.iter_mut().zip(color) {
        *dst = ((src as u16 * a + *dst as u16 * (255 - a) + 127) / 255) as u8;
    }
}
