//! Raw camera frames and their conversion to [`CanonicalImage`]s.
//!
//! Cameras hand out frames in whatever layout the hardware produces. Two families are supported:
//!
//! - [`PixelFormat::Yuv420`]: three planes (Y, U, V), chroma subsampled 2:1 in both directions.
//!   Chroma planes may be interleaved (NV12/NV21 style, pixel stride 2) or fully planar (I420,
//!   pixel stride 1). Both chroma planes are addressed with the U plane's strides.
//! - [`PixelFormat::Rgba`] / [`PixelFormat::Bgra`]: a single packed plane with 4 bytes per pixel,
//!   rows possibly padded beyond `width * 4` bytes.
//!
//! Conversion is a pure function of the frame; independent frames can be converted on any number
//! of threads at once.

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::image::CanonicalImage;

/// Pixel layout of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (BT.601).
    Yuv420,
    /// Packed 8-bit RGBA.
    Rgba,
    /// Packed 8-bit BGRA.
    Bgra,
}

impl PixelFormat {
    /// Returns the number of planes a frame of this format carries.
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420 => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 1,
        }
    }

    /// Returns the name of this format as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420 => "yuv420",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown [`PixelFormat`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized pixel format '{0}' (expected one of yuv420, rgba, bgra)")]
pub struct UnknownFormat(pub String);

impl FromStr for PixelFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yuv420" => Ok(Self::Yuv420),
            "rgba" | "rgba8888" => Ok(Self::Rgba),
            "bgra" | "bgra8888" => Ok(Self::Bgra),
            _ => Err(UnknownFormat(s.to_string())),
        }
    }
}

/// One plane of a [`Frame`]: a byte buffer plus the strides needed to address it.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    bytes: &'a [u8],
    row_stride: usize,
    pixel_stride: usize,
}

impl<'a> Plane<'a> {
    /// Creates a plane with the given row stride and a pixel stride of 1.
    pub fn new(bytes: &'a [u8], row_stride: usize) -> Self {
        Self {
            bytes,
            row_stride,
            pixel_stride: 1,
        }
    }

    /// Sets the distance in bytes between horizontally adjacent samples.
    ///
    /// Only meaningful for the chroma planes of a YUV frame.
    pub fn with_pixel_stride(self, pixel_stride: usize) -> Self {
        Self {
            pixel_stride,
            ..self
        }
    }

    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    #[inline]
    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }
}

/// A raw camera frame.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane<'a>>,
}

impl<'a> Frame<'a> {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane<'a>>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn planes(&self) -> &[Plane<'a>] {
        &self.planes
    }
}

/// Errors produced by [`convert`] for malformed frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("{format} frame needs {expected} plane(s), got {actual}")]
    InvalidPlaneCount {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
    #[error("frame has a zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
    #[error("plane {plane} holds {actual} bytes, but its strides address {needed}")]
    PlaneTooSmall {
        plane: usize,
        needed: usize,
        actual: usize,
    },
    #[error("invalid stride in plane {plane}: {reason}")]
    InvalidStride { plane: usize, reason: &'static str },
}

/// Converts a raw frame to a densely packed RGBA image.
pub fn convert(frame: &Frame<'_>) -> Result<CanonicalImage, ConversionError> {
    let (width, height) = (frame.width, frame.height);
    if width == 0 || height == 0 {
        return Err(ConversionError::ZeroDimension { width, height });
    }

    let expected = frame.format.plane_count();
    if frame.planes.len() < expected {
        return Err(ConversionError::InvalidPlaneCount {
            format: frame.format,
            expected,
            actual: frame.planes.len(),
        });
    }

    // The output is only allocated once the planes are known to cover the whole frame.
    match frame.format {
        PixelFormat::Yuv420 => {
            let [y, u, v] = [frame.planes[0], frame.planes[1], frame.planes[2]];
            yuv420_to_rgba(width, height, y, u, v)
        }
        PixelFormat::Rgba => packed_to_rgba::<false>(width, height, frame.planes[0]),
        PixelFormat::Bgra => packed_to_rgba::<true>(width, height, frame.planes[0]),
    }
}

/// Returns the number of bytes a plane must hold to cover `rows` rows whose last addressed byte in
/// each row is at `row_len - 1`.
fn required_len(rows: usize, row_stride: usize, row_len: usize) -> usize {
    (rows - 1).saturating_mul(row_stride).saturating_add(row_len)
}

fn check_len(index: usize, plane: &Plane<'_>, needed: usize) -> Result<(), ConversionError> {
    if plane.bytes.len() < needed {
        return Err(ConversionError::PlaneTooSmall {
            plane: index,
            needed,
            actual: plane.bytes.len(),
        });
    }
    Ok(())
}

fn yuv420_to_rgba(
    width: u32,
    height: u32,
    y_plane: Plane<'_>,
    u_plane: Plane<'_>,
    v_plane: Plane<'_>,
) -> Result<CanonicalImage, ConversionError> {
    let (w, h) = (width as usize, height as usize);
    if y_plane.row_stride < w {
        return Err(ConversionError::InvalidStride {
            plane: 0,
            reason: "luma row stride is smaller than the frame width",
        });
    }
    let uv_row_stride = u_plane.row_stride;
    let uv_pixel_stride = u_plane.pixel_stride;
    if uv_pixel_stride == 0 {
        return Err(ConversionError::InvalidStride {
            plane: 1,
            reason: "chroma pixel stride is zero",
        });
    }

    check_len(0, &y_plane, required_len(h, y_plane.row_stride, w))?;
    let chroma_rows = (h + 1) / 2;
    let chroma_row_len = ((w + 1) / 2 - 1).saturating_mul(uv_pixel_stride) + 1;
    let chroma_needed = required_len(chroma_rows, uv_row_stride, chroma_row_len);
    check_len(1, &u_plane, chroma_needed)?;
    check_len(2, &v_plane, chroma_needed)?;

    let mut image = CanonicalImage::new(width, height);
    let (y_buf, u_buf, v_buf) = (y_plane.bytes, u_plane.bytes, v_plane.bytes);
    for (row, out_row) in image.data_mut().chunks_exact_mut(w * 4).enumerate() {
        let p_y = row * y_plane.row_stride;
        let p_uv = (row >> 1) * uv_row_stride;
        for (col, px) in out_row.chunks_exact_mut(4).enumerate() {
            let uv = p_uv + (col >> 1) * uv_pixel_stride;
            let [r, g, b] = yuv_to_rgb(y_buf[p_y + col], u_buf[uv], v_buf[uv]);
            px.copy_from_slice(&[r, g, b, 255]);
        }
    }

    Ok(image)
}

/// BT.601 full-swing YUV to RGB.
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    let r = y + 1.370705 * v;
    let g = y - 0.337633 * u - 0.698001 * v;
    let b = y + 1.732446 * u;
    [r, g, b].map(|c| (c as i32).clamp(0, 255) as u8)
}

fn packed_to_rgba<const SWAP_RB: bool>(
    width: u32,
    height: u32,
    plane: Plane<'_>,
) -> Result<CanonicalImage, ConversionError> {
    let row_len = width as usize * 4;
    if plane.row_stride < row_len {
        return Err(ConversionError::InvalidStride {
            plane: 0,
            reason: "row stride is smaller than width * 4",
        });
    }
    check_len(0, &plane, required_len(height as usize, plane.row_stride, row_len))?;

    let mut image = CanonicalImage::new(width, height);
    let out = image.data_mut();
    if plane.row_stride == row_len {
        // Dense rows: one contiguous copy.
        copy_pixels::<SWAP_RB>(&plane.bytes[..out.len()], out);
    } else {
        for (row, out_row) in out.chunks_exact_mut(row_len).enumerate() {
            let start = row * plane.row_stride;
            copy_pixels::<SWAP_RB>(&plane.bytes[start..start + row_len], out_row);
        }
    }

    Ok(image)
}

#[inline]
fn copy_pixels<const SWAP_RB: bool>(src: &[u8], dest: &mut [u8]) {
    if SWAP_RB {
        for (s, d) in src.chunks_exact(4).zip(dest.chunks_exact_mut(4)) {
            d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
        }
    } else {
        dest.copy_from_slice(src);
    }
}
