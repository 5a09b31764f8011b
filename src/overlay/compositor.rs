use std::sync::Arc;

use crate::{
    config::{BoxSection, Color},
    error::Result,
    overlay::FontFace,
    video::Frame,
};

/// A pixel rectangle: `[x, x + width) × [y, y + height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The part of this rectangle that lies on a `width × height` frame
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let right = self.x.saturating_add(self.width).min(width);
        let bottom = self.y.saturating_add(self.height).min(height);
        if self.x >= right || self.y >= bottom {
            return None;
        }
        Some(Rect::new(self.x, self.y, right - self.x, bottom - self.y))
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && (x - self.x) < self.width
            && (y - self.y) < self.height
    }
}

/// Resolved, validated layout of one overlay box
#[derive(Debug, Clone)]
pub struct OverlayBox {
    pub rect: Rect,
    pub padding: (u32, u32),
    pub foreground: Color,
    pub background: Color,
    pub alpha: f32,
    pub font: Arc<FontFace>,
    pub font_scale: f32,
    pub line_height: u32,
    pub max_lines: usize,
}

impl OverlayBox {
    /// Build a box from its configuration section, loading the font
    pub fn from_section(section: &BoxSection) -> Result<Self> {
        let font = FontFace::load(&section.font)?;
        let line_height = section
            .lineheight
            .unwrap_or_else(|| font.default_line_height(section.fontscale));

        Ok(Self {
            rect: Rect::new(section.x, section.y, section.width, section.height),
            padding: (section.padx, section.pady),
            foreground: section.fgcolor,
            background: section.bgcolor,
            alpha: section.alpha.clamp(0.0, 1.0),
            font: Arc::new(font),
            font_scale: section.fontscale,
            line_height,
            max_lines: section.max_lines(),
        })
    }

    /// Left end of the baseline for the given line
    pub fn text_origin(&self, line_index: usize) -> (i64, i64) {
        let x = self.rect.x as i64 + self.padding.0 as i64;
        let y = self.rect.y as i64
            + self.padding.1 as i64
            + line_index as i64 * self.line_height as i64;
        (x, y)
    }
}

/// One box and the text it shows on the current frame
#[derive(Debug, Clone)]
pub struct Overlay<'a> {
    pub layout: &'a OverlayBox,
    pub lines: Vec<&'a str>,
}

impl<'a> Overlay<'a> {
    pub fn new(layout: &'a OverlayBox, lines: Vec<&'a str>) -> Self {
        Self { layout, lines }
    }
}

/// Apply overlays in order; each one sees the previous one's result.
pub fn compose(frame: Frame, overlays: &[Overlay<'_>]) -> Frame {
    overlays
        .iter()
        .fold(frame, |output, overlay| apply_overlay(output, overlay))
}

/// Draw one overlay onto `output`.
///
/// Text is drawn onto a blended working copy without clipping and only the
/// box rectangle is copied back, so glyphs that run past the box edges never
/// reach the output.
pub fn apply_overlay(mut output: Frame, overlay: &Overlay<'_>) -> Frame {
    let layout = overlay.layout;
    let Some(rect) = layout.rect.clamp_to(output.width(), output.height()) else {
        return output;
    };

    let mut working = output.clone();
    fill_rect(&mut working, rect, layout.background.0);
    blend_onto(&mut working, &output, layout.alpha);

    for (index, text) in overlay.lines.iter().enumerate() {
        let (x, baseline) = layout.text_origin(index);
        layout.font.draw_text(
            working.as_image_mut(),
            x,
            baseline,
            text,
            layout.font_scale,
            layout.foreground.0,
        );
    }

    copy_rect(&working, &mut output, rect);
    output
}

fn fill_rect(frame: &mut Frame, rect: Rect, color: [u8; 3]) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            frame.set_pixel(x, y, color);
        }
    }
}

/// `target = target * alpha + original * (1 - alpha)` over the whole frame
fn blend_onto(target: &mut Frame, original: &Frame, alpha: f32) {
    let inv = 1.0 - alpha;
    let dst = target.as_image_mut().iter_mut();
    for (d, &o) in dst.zip(original.as_rgb_bytes()) {
        *d = (*d as f32 * alpha + o as f32 * inv).round().clamp(0.0, 255.0) as u8;
    }
}

fn copy_rect(src: &Frame, dst: &mut Frame, rect: Rect) {
    let stride = src.width() as usize * 3;
    let start = rect.x as usize * 3;
    let end = start + rect.width as usize * 3;
    let src_bytes = src.as_rgb_bytes();
    let dst_bytes: &mut [u8] = dst.as_image_mut();

    for y in rect.y as usize..(rect.y + rect.height) as usize {
        let row = y * stride;
        dst_bytes[row + start..row + end].copy_from_slice(&src_bytes[row + start..row + end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box(rect: Rect, alpha: f32) -> OverlayBox {
        OverlayBox {
            rect,
            padding: (2, 10),
            foreground: Color([255, 255, 255]),
            background: Color([0, 0, 255]),
            alpha,
            font: Arc::new(FontFace::Builtin),
            font_scale: 1.0,
            line_height: 10,
            max_lines: 3,
        }
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::new_black(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, [(x * 7 % 256) as u8, (y * 5 % 256) as u8, 90]);
            }
        }
        frame
    }

    #[test]
    fn test_pixels_outside_box_are_untouched() {
        let input = gradient_frame(64, 48);
        let layout = test_box(Rect::new(10, 8, 30, 20), 0.6);
        let lines = vec!["a long line that overflows", "second", "third", "fourth"];
        let output = compose(input.clone(), &[Overlay::new(&layout, lines)]);

        for y in 0..input.height() {
            for x in 0..input.width() {
                if !layout.rect.contains(x, y) {
                    assert_eq!(output.get_pixel(x, y), input.get_pixel(x, y), "({x},{y})");
                }
            }
        }
    }

    #[test]
    fn test_overflowing_text_is_cropped() {
        let input = Frame::new_black(80, 40);
        let layout = test_box(Rect::new(0, 0, 20, 12), 0.0);
        let text = "WWWWWWWWWW";
        let output = compose(input.clone(), &[Overlay::new(&layout, vec![text])]);

        // Drawing without the box shows glyphs well past x = 20
        let mut unclipped = input.clone();
        let (x, baseline) = layout.text_origin(0);
        layout
            .font
            .draw_text(unclipped.as_image_mut(), x, baseline, text, 1.0, [255, 255, 255]);
        assert!((20..80).any(|x| (0..40).any(|y| unclipped.get_pixel(x, y) != [0, 0, 0])));

        for y in 0..40 {
            for x in 0..80 {
                if !layout.rect.contains(x, y) {
                    assert_eq!(output.get_pixel(x, y), [0, 0, 0]);
                }
            }
        }
        assert!((0..20).any(|x| (0..12).any(|y| output.get_pixel(x, y) == [255, 255, 255])));
    }

    #[test]
    fn test_background_blend_weights() {
        let input = Frame::new_filled(16, 16, [100, 100, 100]);
        let layout = test_box(Rect::new(4, 4, 8, 8), 0.25);
        let output = compose(input, &[Overlay::new(&layout, vec![])]);

        // 0.25 * bg + 0.75 * original
        assert_eq!(output.get_pixel(5, 5), [75, 75, 139]);
        assert_eq!(output.get_pixel(0, 0), [100, 100, 100]);
    }

    #[test]
    fn test_opaque_box_shows_background() {
        let input = Frame::new_filled(16, 16, [100, 100, 100]);
        let layout = test_box(Rect::new(0, 0, 16, 4), 1.0);
        let output = compose(input, &[Overlay::new(&layout, vec![])]);
        assert_eq!(output.get_pixel(3, 3), [0, 0, 255]);
        assert_eq!(output.get_pixel(3, 4), [100, 100, 100]);
    }

    #[test]
    fn test_later_overlay_sees_earlier_result() {
        let input = Frame::new_filled(20, 20, [200, 200, 200]);
        let first = test_box(Rect::new(0, 0, 10, 10), 1.0);
        let mut second = test_box(Rect::new(5, 5, 10, 10), 0.5);
        second.background = Color([0, 0, 0]);

        let output = compose(
            input,
            &[Overlay::new(&first, vec![]), Overlay::new(&second, vec![])],
        );

        // Overlap blends against the first box's blue, not the original grey
        assert_eq!(output.get_pixel(6, 6), [0, 0, 128]);
        assert_eq!(output.get_pixel(12, 12), [100, 100, 100]);
        assert_eq!(output.get_pixel(2, 2), [0, 0, 255]);
    }

    #[test]
    fn test_box_partly_off_frame_is_clamped() {
        let input = gradient_frame(20, 20);
        let layout = test_box(Rect::new(15, 15, 50, 50), 1.0);
        let output = compose(input.clone(), &[Overlay::new(&layout, vec![])]);
        assert_eq!(output.get_pixel(19, 19), [0, 0, 255]);
        assert_eq!(output.get_pixel(14, 14), input.get_pixel(14, 14));
    }

    #[test]
    fn test_box_entirely_off_frame_is_noop() {
        let input = gradient_frame(20, 20);
        let layout = test_box(Rect::new(40, 40, 5, 5), 1.0);
        let output = compose(input.clone(), &[Overlay::new(&layout, vec!["x"])]);
        assert_eq!(output, input);
    }

    #[test]
    fn test_text_origin_steps_by_line_height() {
        let layout = test_box(Rect::new(20, 30, 100, 100), 0.5);
        assert_eq!(layout.text_origin(0), (22, 40));
        assert_eq!(layout.text_origin(3), (22, 70));
    }

    #[test]
    fn test_from_section_derives_line_height() {
        let section = BoxSection::timecode_defaults();
        let layout = OverlayBox::from_section(&section).unwrap();
        assert_eq!(layout.line_height, 12);
        assert_eq!(layout.max_lines, 1);
    }
}
