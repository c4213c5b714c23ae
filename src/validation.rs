//! Frame validation utilities for test pattern verification.
//!
//! These check that captured RGB frames contain known test patterns, which
//! is how the integration tests verify frames from virtual cameras.

use crate::traits::RgbFrame;

/// Expected RGB values for SMPTE color bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235), // White
    (235, 235, 11),  // Yellow
    (12, 236, 237),  // Cyan
    (13, 237, 13),   // Green
    (237, 13, 237),  // Magenta
    (238, 14, 13),   // Red
    (15, 15, 239),   // Blue
    (16, 16, 16),    // Black
];

/// Tolerance for RGB color matching (accounts for YUV->RGB conversion errors).
pub const COLOR_TOLERANCE: u8 = 15;

/// Smallest left-to-right luminance rise accepted as a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// A frame that does not show the expected pattern.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The frame is smaller than the pattern needs, or its buffer is short.
    #[error("frame {width}x{height} is too small to sample at ({x}, {y})")]
    OutOfBounds {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Sample column.
        x: u32,
        /// Sample row.
        y: u32,
    },
    /// A sampled pixel differs from the expected color.
    #[error("pixel ({x}, {y}) is RGB{actual:?}, expected RGB{expected:?}")]
    ColorMismatch {
        /// Sample column.
        x: u32,
        /// Sample row.
        y: u32,
        /// Expected color.
        expected: (u8, u8, u8),
        /// Observed color.
        actual: (u8, u8, u8),
    },
    /// Luminance decreased where it should rise.
    #[error("luminance falls at x={x}: {luminance} after {previous}")]
    NotMonotonic {
        /// Sample column.
        x: u32,
        /// Luminance at `x`.
        luminance: f32,
        /// Luminance at the previous sample.
        previous: f32,
    },
    /// The frame is too flat to be a gradient.
    #[error("luminance rises only {0} across the frame")]
    FlatGradient(f32),
    /// A batch buffer does not divide into whole frames.
    #[error("batch of {actual} bytes is not a whole number of {frame_len}-byte frames")]
    BatchSize {
        /// Bytes per frame.
        frame_len: usize,
        /// Bytes in the batch.
        actual: usize,
    },
}

fn sample(frame: &RgbFrame, x: u32, y: u32) -> Result<(u8, u8, u8), ValidationError> {
    frame.pixel_at(x, y).ok_or(ValidationError::OutOfBounds {
        width: frame.width,
        height: frame.height,
        x,
        y,
    })
}

/// Validates that a frame contains the SMPTE color bar pattern.
///
/// Samples the center of each of the 8 vertical bars on the middle row.
pub fn validate_color_bars(frame: &RgbFrame) -> Result<(), ValidationError> {
    let bar_width = frame.width / 8;
    let y = frame.height / 2;
    if bar_width < 2 {
        return Err(ValidationError::OutOfBounds {
            width: frame.width,
            height: frame.height,
            x: 8,
            y,
        });
    }

    for (bar, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(frame, x, y)?;
        if !colors_match(actual, expected, COLOR_TOLERANCE) {
            return Err(ValidationError::ColorMismatch {
                x,
                y,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Luminance along the middle row, sampled every 10 pixels, must never
/// drop by more than one step of rounding and must rise by at least 50
/// overall.
pub fn validate_gradient(frame: &RgbFrame) -> Result<(), ValidationError> {
    let y = frame.height / 2;
    let mut first: Option<f32> = None;
    let mut previous: Option<f32> = None;

    for x in (0..frame.width).step_by(10) {
        let (r, g, b) = sample(frame, x, y)?;
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if let Some(previous) = previous {
            if luminance < previous - 1.0 {
                return Err(ValidationError::NotMonotonic {
                    x,
                    luminance,
                    previous,
                });
            }
        }
        first.get_or_insert(luminance);
        previous = Some(luminance);
    }

    let rise = previous.zip(first).map_or(0.0, |(last, first)| last - first);
    if rise < MIN_GRADIENT_RISE {
        return Err(ValidationError::FlatGradient(rise));
    }
    Ok(())
}

/// Validates that every pixel of a frame is `expected` within `tolerance`.
pub fn validate_solid(
    frame: &RgbFrame,
    expected: (u8, u8, u8),
    tolerance: u8,
) -> Result<(), ValidationError> {
    for y in 0..frame.height {
        for x in 0..frame.width {
            let actual = sample(frame, x, y)?;
            if !colors_match(actual, expected, tolerance) {
                return Err(ValidationError::ColorMismatch {
                    x,
                    y,
                    expected,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Split a batched read into its per-camera frames.
pub fn split_batch(data: &[u8], width: u32, height: u32) -> Result<Vec<RgbFrame>, ValidationError> {
    let frame_len = width as usize * height as usize * 3;
    if frame_len == 0 || data.len() % frame_len != 0 {
        return Err(ValidationError::BatchSize {
            frame_len,
            actual: data.len(),
        });
    }
    Ok(data
        .chunks_exact(frame_len)
        .map(|chunk| RgbFrame {
            width,
            height,
            data: chunk.to_vec(),
        })
        .collect())
}

/// Whether all three channels are within `tolerance` of each other.
pub fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}
