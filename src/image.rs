//! Canonical images and the geometry used to sample them.
//!
//! Every frame handed to the pipeline is first converted to a [`CanonicalImage`]: a densely
//! packed 8-bit RGBA buffer (`stride == width * 4`). Networks read from it through
//! [`CanonicalImage::sample`] using [`Rect`]/[`RotatedRect`] regions.

mod rect;
mod resolution;

use std::{fmt, ops::Index, path::Path};

use anyhow::Context;
use image::{ImageBuffer, Rgba, RgbaImage};

pub use rect::*;
pub use resolution::*;

/// An 8-bit sRGB image with alpha channel, stored as packed RGBA rows without padding.
#[derive(Clone, PartialEq)]
pub struct CanonicalImage {
    buf: RgbaImage,
}

impl CanonicalImage {
    /// Number of bytes per pixel.
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Creates an image of a specified size.
    ///
    /// The image will start out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Wraps a packed RGBA buffer.
    ///
    /// Returns [`None`] if `data` is shorter than `width * height * 4` bytes.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buf| Self { buf })
    }

    /// Decodes an image file (PNG or JPEG).
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let decoded =
            image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            buf: decoded.to_rgba8(),
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Returns the number of bytes per row, which is always `width * 4`.
    #[inline]
    pub fn stride(&self) -> usize {
        self.width() as usize * Self::BYTES_PER_PIXEL
    }

    /// Returns a [`Rect`] covering this image, positioned at `(0, 0)`.
    #[inline]
    pub fn rect(&self) -> Rect {
        Rect::from_top_left(0.0, 0.0, self.width() as f32, self.height() as f32)
    }

    /// Returns the raw RGBA bytes, row by row.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.buf.as_raw()
    }

    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.buf.into_raw()
    }

    /// Gets the color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Sets the color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// This will panic if `(x, y)` is outside the bounds of this image.
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.buf[(x, y)] = Rgba(color.0);
    }

    /// Sets every pixel to `color`.
    pub fn clear(&mut self, color: Color) {
        self.buf.pixels_mut().for_each(|pix| pix.0 = color.0);
    }

    /// Samples the pixel nearest to the (continuous) image position `pos`.
    ///
    /// Pixel `(x, y)` covers the area from `(x, y)` to `(x + 1, y + 1)`. Positions outside of the
    /// image read as [`Color::NULL`], which is how letterboxing and out-of-frame hand regions are
    /// padded.
    pub fn sample(&self, pos: Vec2) -> Color {
        let (x, y) = (pos.x.floor(), pos.y.floor());
        if !(x >= 0.0 && y >= 0.0 && x < self.width() as f32 && y < self.height() as f32) {
            return Color::NULL;
        }
        self.get(x as u32, y as u32)
    }
}

impl fmt::Debug for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} CanonicalImage", self.width(), self.height())
    }
}

/// An 8-bit RGBA color.
///
/// Colors are always in the sRGB color space and use non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NULL: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl Index<usize> for Color {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_dense() {
        let image = CanonicalImage::new(7, 3);
        assert_eq!(image.stride(), 28);
        assert_eq!(image.data().len(), 7 * 3 * 4);
        assert_eq!(image.get(6, 2), Color::NULL);
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(CanonicalImage::from_rgba8(2, 2, vec![0; 15]).is_none());
        assert!(CanonicalImage::from_rgba8(2, 2, vec![0; 16]).is_some());
    }

    #[test]
    fn sample_nearest() {
        let mut image = CanonicalImage::new(2, 2);
        image.clear(Color::BLACK);
        image.set(1, 0, Color::WHITE);

        assert_eq!(image.sample(Vec2::new(1.5, 0.5)), Color::WHITE);
        assert_eq!(image.sample(Vec2::new(1.99, 0.99)), Color::WHITE);
        assert_eq!(image.sample(Vec2::new(0.5, 1.5)), Color::BLACK);
        assert_eq!(image.sample(Vec2::new(2.0, 0.5)), Color::NULL);
        assert_eq!(image.sample(Vec2::new(-0.1, 0.5)), Color::NULL);
        assert_eq!(image.sample(Vec2::new(f32::NAN, 0.5)), Color::NULL);
    }
}
