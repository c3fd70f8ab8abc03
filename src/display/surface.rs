//! Drawing surfaces for the overlay layer

use ab_glyph::{FontRef, InvalidFont, PxScale};
use flume::Sender;
use image::{Pixel, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use once_cell::sync::Lazy;
use tracing::error;

/// Pixel height of banner text
pub const DEFAULT_TEXT_SIZE: f32 = 16.0;

const FONT_BYTES: &[u8] = include_bytes!("../../resources/DejaVuSans.ttf");

static FONT: Lazy<Result<FontRef<'static>, InvalidFont>> =
    Lazy::new(|| FontRef::try_from_slice(FONT_BYTES));

fn font() -> Option<&'static FontRef<'static>> {
    match &*FONT {
        Ok(font) => Some(font),
        Err(e) => {
            error!("Overlay font unusable: {}", e);
            None
        }
    }
}

/// Minimal 2D drawing target the overlay renderer paints on
pub trait DrawSurface: Send {
    fn size(&self) -> (u32, u32);

    fn resize(&mut self, width: u32, height: u32);

    /// Reset every pixel to transparent
    fn clear(&mut self);

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>);

    fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>);

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>);

    /// Draw text with its top-left corner at (x, y)
    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: Rgba<u8>);

    /// Horizontal extent of `text` in pixels
    fn text_width(&self, text: &str) -> f32;

    /// Called once a render pass is complete
    fn present(&mut self) {}
}

/// CPU surface over an RGBA buffer
#[derive(Debug, Clone)]
pub struct ImageSurface {
    image: RgbaImage,
    text_scale: PxScale,
}

impl ImageSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image,
            text_scale: PxScale::from(DEFAULT_TEXT_SIZE),
        }
    }

    pub fn with_text_size(mut self, px: f32) -> Self {
        self.text_scale = PxScale::from(px.max(1.0));
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        (x < self.image.width() && y < self.image.height()).then(|| *self.image.get_pixel(x, y))
    }

    fn contains(&self, x: f32, y: f32) -> bool {
        let (width, height) = self.image.dimensions();
        x >= 0.0 && y >= 0.0 && x < width as f32 && y < height as f32
    }

    /// Alpha-blend this layer onto a video frame of the same size
    pub fn composite_onto(&self, frame: &mut RgbImage) {
        let (width, height) = frame.dimensions();
        for y in 0..height.min(self.image.height()) {
            for x in 0..width.min(self.image.width()) {
                let over = self.image.get_pixel(x, y);
                if over[3] == 0 {
                    continue;
                }
                let dst = frame.get_pixel_mut(x, y);
                let mut under = dst.to_rgba();
                under.blend(over);
                *dst = under.to_rgb();
            }
        }
    }
}

/// Clip a segment to `[0, max_x] x [0, max_y]`; `None` when nothing is left
fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    max_x: f32,
    max_y: f32,
) -> Option<((f32, f32), (f32, f32))> {
    if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    for (p, q) in [
        (-dx, from.0),
        (dx, max_x - from.0),
        (-dy, from.1),
        (dy, max_y - from.1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        (from.0 + t0 * dx, from.1 + t0 * dy),
        (from.0 + t1 * dx, from.1 + t1 * dy),
    ))
}

impl DrawSurface for ImageSurface {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
        let r = radius.max(0.5);
        let (width, height) = self.image.dimensions();
        let outside = !(cx + r >= 0.0
            && cy + r >= 0.0
            && cx - r < width as f32
            && cy - r < height as f32);
        if outside || !r.is_finite() {
            return;
        }
        draw_filled_circle_mut(
            &mut self.image,
            (cx.round() as i32, cy.round() as i32),
            r.round() as i32,
            color,
        );
    }

    fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        if let Some((start, end)) =
            clip_segment(from, to, (width - 1) as f32, (height - 1) as f32)
        {
            let round = |(x, y): (f32, f32)| (x.round(), y.round());
            draw_line_segment_mut(&mut self.image, round(start), round(end), color);
        }
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>) {
        let (w, h) = self.image.dimensions();
        let x0 = x.round().clamp(0.0, w as f32);
        let y0 = y.round().clamp(0.0, h as f32);
        let x1 = (x + width).round().clamp(0.0, w as f32);
        let y1 = (y + height).round().clamp(0.0, h as f32);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let rect = Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32);
        draw_filled_rect_mut(&mut self.image, rect, color);
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: Rgba<u8>) {
        if !self.contains(x, y) {
            return;
        }
        if let Some(font) = font() {
            draw_text_mut(
                &mut self.image,
                color,
                x.round() as i32,
                y.round() as i32,
                self.text_scale,
                font,
                text,
            );
        }
    }

    fn text_width(&self, text: &str) -> f32 {
        match font() {
            Some(font) => text_size(self.text_scale, font, text).0 as f32,
            None => 0.0,
        }
    }
}

/// Image surface that publishes each finished overlay on a channel.
///
/// Presenting never blocks; a full channel drops the overlay.
pub struct ChannelSurface {
    inner: ImageSurface,
    tx: Sender<RgbaImage>,
}

impl ChannelSurface {
    pub fn new(inner: ImageSurface, tx: Sender<RgbaImage>) -> Self {
        Self { inner, tx }
    }
}

impl DrawSurface for ChannelSurface {
    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.inner.resize(width, height)
    }

    fn clear(&mut self) {
        self.inner.clear()
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Rgba<u8>) {
        self.inner.fill_circle(cx, cy, radius, color)
    }

    fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), color: Rgba<u8>) {
        self.inner.draw_line(from, to, color)
    }

    fn fill_rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Rgba<u8>) {
        self.inner.fill_rect(x, y, width, height, color)
    }

    fn draw_text(&mut self, x: f32, y: f32, text: &str, color: Rgba<u8>) {
        self.inner.draw_text(x, y, text, color)
    }

    fn text_width(&self, text: &str) -> f32 {
        self.inner.text_width(text)
    }

    fn present(&mut self) {
        let _ = self.tx.try_send(self.inner.image().clone());
    }
}
