//! Pixel conversion: raw driver samples to a 32-bit intermediate, then to
//! packed RGB.

use image::ImageFormat;

use crate::traits::FourCC;

/// Pixel formats [`to_argb`] can convert.
pub const SUPPORTED_FORMATS: [FourCC; 8] = [
    FourCC::YUYV,
    FourCC::UYVY,
    FourCC::NV12,
    FourCC::YU12,
    FourCC::RGB3,
    FourCC::BGR3,
    FourCC::GREY,
    FourCC::MJPG,
];

/// Whether [`to_argb`] understands `fourcc`.
#[must_use]
pub fn is_supported(fourcc: FourCC) -> bool {
    SUPPORTED_FORMATS.contains(&fourcc)
}

/// Conversion failure.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// No converter for this pixel format.
    #[error("no converter for pixel format {0}")]
    Unsupported(FourCC),
    /// Width or height is zero.
    #[error("cannot convert an empty {width}x{height} image")]
    EmptyImage {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// Sample holds fewer bytes than the format needs.
    #[error("sample holds {actual} bytes, {expected} needed")]
    ShortSample {
        /// Bytes the format needs at this resolution.
        expected: usize,
        /// Bytes in the sample.
        actual: usize,
    },
    /// The JPEG decoder rejected the sample.
    #[error("cannot decode JPEG sample: {0}")]
    Jpeg(#[from] image::ImageError),
    /// The JPEG decoded to a different size than configured.
    #[error("JPEG is {actual_width}x{actual_height}, expected {width}x{height}")]
    JpegSize {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
        /// Decoded width.
        actual_width: u32,
        /// Decoded height.
        actual_height: u32,
    },
}

/// Packing failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    /// The destination is not exactly one RGB frame long.
    #[error("destination holds {actual} bytes, {expected} needed")]
    Destination {
        /// Bytes needed.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// The intermediate image does not hold `width * height` pixels.
    #[error("intermediate holds {actual} pixels, {expected} expected")]
    Intermediate {
        /// Pixels expected.
        expected: usize,
        /// Pixels present.
        actual: usize,
    },
}

/// A full-resolution image at 32 bits per pixel, `0xAARRGGBB`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgbImage {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major pixels.
    pub pixels: Vec<u32>,
}

const fn argb(r: u8, g: u8, b: u8) -> u32 {
    u32::from_be_bytes([0xFF, r, g, b])
}

fn yuv_argb(y: u8, u: u8, v: u8) -> u32 {
    let (r, g, b) = yuv_to_rgb(y, u, v);
    argb(r, g, b)
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
///
/// # Arguments
///
/// * `y` - Luminance value
/// * `u` - Blue-difference chroma value
/// * `v` - Red-difference chroma value
///
/// # Returns
///
/// RGB tuple with values clamped to 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

fn check_len(sample: &[u8], expected: usize) -> Result<(), ConvertError> {
    if sample.len() < expected {
        return Err(ConvertError::ShortSample {
            expected,
            actual: sample.len(),
        });
    }
    Ok(())
}

/// Convert one raw sample of `fourcc` at `width`x`height` into the 32-bit
/// intermediate. Samples may be longer than needed; trailing bytes are
/// ignored. Rows are assumed tightly packed.
#[allow(clippy::indexing_slicing)]
pub fn to_argb(
    sample: &[u8],
    fourcc: FourCC,
    width: u32,
    height: u32,
) -> Result<ArgbImage, ConvertError> {
    if width == 0 || height == 0 {
        return Err(ConvertError::EmptyImage { width, height });
    }
    let w = width as usize;
    let h = height as usize;

    let pixels = match fourcc {
        FourCC::YUYV => packed_422(sample, w, h, |q| (q[0], q[1], q[2], q[3]))?,
        FourCC::UYVY => packed_422(sample, w, h, |q| (q[1], q[0], q[3], q[2]))?,
        FourCC::NV12 => nv12(sample, w, h)?,
        FourCC::YU12 => yu12(sample, w, h)?,
        FourCC::RGB3 => packed_rgb(sample, w, h, |p| argb(p[0], p[1], p[2]))?,
        FourCC::BGR3 => packed_rgb(sample, w, h, |p| argb(p[2], p[1], p[0]))?,
        FourCC::GREY => {
            check_len(sample, w * h)?;
            sample.iter().take(w * h).map(|&l| argb(l, l, l)).collect()
        }
        FourCC::MJPG => jpeg(sample, width, height)?,
        other => return Err(ConvertError::Unsupported(other)),
    };

    Ok(ArgbImage {
        width,
        height,
        pixels,
    })
}

/// 4:2:2 packed formats; `split` maps a 4-byte group to `(y0, u, y1, v)`.
#[allow(clippy::indexing_slicing)]
fn packed_422(
    sample: &[u8],
    w: usize,
    h: usize,
    split: fn(&[u8]) -> (u8, u8, u8, u8),
) -> Result<Vec<u32>, ConvertError> {
    let row_len = w.div_ceil(2) * 4;
    check_len(sample, row_len * h)?;

    let mut pixels = Vec::with_capacity(w * h);
    for row in sample.chunks_exact(row_len).take(h) {
        let start = pixels.len();
        for quad in row.chunks_exact(4) {
            let (y0, u, y1, v) = split(quad);
            pixels.push(yuv_argb(y0, u, v));
            pixels.push(yuv_argb(y1, u, v));
        }
        pixels.truncate(start + w);
    }
    Ok(pixels)
}

#[allow(clippy::indexing_slicing)]
fn packed_rgb(
    sample: &[u8],
    w: usize,
    h: usize,
    pixel: fn(&[u8]) -> u32,
) -> Result<Vec<u32>, ConvertError> {
    check_len(sample, w * h * 3)?;
    Ok(sample.chunks_exact(3).take(w * h).map(pixel).collect())
}

#[allow(clippy::indexing_slicing)]
fn nv12(sample: &[u8], w: usize, h: usize) -> Result<Vec<u32>, ConvertError> {
    let uv_row = w.div_ceil(2) * 2;
    check_len(sample, w * h + uv_row * h.div_ceil(2))?;

    let (luma, chroma) = sample.split_at(w * h);
    let mut pixels = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let uv = (y / 2) * uv_row + (x / 2) * 2;
            pixels.push(yuv_argb(luma[y * w + x], chroma[uv], chroma[uv + 1]));
        }
    }
    Ok(pixels)
}

#[allow(clippy::indexing_slicing)]
fn yu12(sample: &[u8], w: usize, h: usize) -> Result<Vec<u32>, ConvertError> {
    let cw = w.div_ceil(2);
    let plane = cw * h.div_ceil(2);
    check_len(sample, w * h + 2 * plane)?;

    let (luma, chroma) = sample.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(plane);
    let mut pixels = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let c = (y / 2) * cw + x / 2;
            pixels.push(yuv_argb(luma[y * w + x], u_plane[c], v_plane[c]));
        }
    }
    Ok(pixels)
}

fn jpeg(sample: &[u8], width: u32, height: u32) -> Result<Vec<u32>, ConvertError> {
    let decoded = image::load_from_memory_with_format(sample, ImageFormat::Jpeg)?.to_rgb8();
    if decoded.dimensions() != (width, height) {
        return Err(ConvertError::JpegSize {
            width,
            height,
            actual_width: decoded.width(),
            actual_height: decoded.height(),
        });
    }
    Ok(decoded
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            argb(r, g, b)
        })
        .collect())
}

/// Pack the intermediate into `dst` as `R, G, B` bytes, row-major, no
/// padding. `dst` must be exactly `width * height * 3` bytes.
pub fn pack_rgb(image: &ArgbImage, dst: &mut [u8]) -> Result<(), PackError> {
    let count = image.width as usize * image.height as usize;
    if image.pixels.len() != count {
        return Err(PackError::Intermediate {
            expected: count,
            actual: image.pixels.len(),
        });
    }
    if dst.len() != count * 3 {
        return Err(PackError::Destination {
            expected: count * 3,
            actual: dst.len(),
        });
    }

    for (px, out) in image.pixels.iter().zip(dst.chunks_exact_mut(3)) {
        let [_, r, g, b] = px.to_be_bytes();
        out.copy_from_slice(&[r, g, b]);
    }
    Ok(())
}
