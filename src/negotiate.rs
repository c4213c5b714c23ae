//! Capability negotiation: capability checks, format/size/interval
//! enumeration, camera discovery and the frame-rate to interval conversion.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::device::V4L2Device;
use crate::error::{ConfigError, DeviceError, DeviceErrorKind, Result};
use crate::traits::{
    DeviceCapabilities, FourCC, Fraction, FrameIntervalRange, FrameSizeRange, VideoDriver,
};

/// Upper bound on entries produced by expanding one stepwise size or
/// interval range. Beyond this, enumeration fails with
/// `EnumerationOverflow` rather than truncating.
pub const MAX_ENUM_ENTRIES: usize = 4096;

/// Largest multiplier tried when turning a fractional rate into a rational.
const MAX_RATE_MULTIPLIER: u32 = 10_000;

/// How close `rate * k` must be to an integer to count as integral.
const RATE_TOLERANCE: f64 = 1e-6;

/// One (format, size) capability entry with its supported frame intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Supported frame intervals, in driver order.
    pub intervals: Vec<Fraction>,
}

impl FrameDescriptor {
    /// Supported frame rates, in driver order.
    pub fn rates(&self) -> Vec<f64> {
        self.intervals.iter().filter_map(|i| i.fps()).collect()
    }
}

/// One enumerated pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    /// Driver-supplied description.
    pub description: String,
    /// Compressed format.
    pub compressed: bool,
    /// Emulated in software.
    pub emulated: bool,
    /// Supported sizes, in driver order.
    pub sizes: Vec<FrameDescriptor>,
}

impl FormatInfo {
    /// The entry for `width`x`height`, if supported.
    pub fn size(&self, width: u32, height: u32) -> Option<&FrameDescriptor> {
        self.sizes
            .iter()
            .find(|d| d.width == width && d.height == height)
    }
}

/// Enumeration result: every capture format keyed by its FourCC.
pub type FormatMap = BTreeMap<FourCC, FormatInfo>;

/// Check that an open device can capture video through streaming I/O.
pub fn check_capabilities<D: VideoDriver>(driver: &D) -> Result<DeviceCapabilities> {
    let caps = driver
        .capabilities()
        .map_err(|err| DeviceError::io(DeviceErrorKind::NotADevice, driver.path(), err))?;
    require_streaming_capture(caps, driver.path())
}

fn require_streaming_capture(caps: DeviceCapabilities, path: &Path) -> Result<DeviceCapabilities> {
    if !caps.can_capture {
        return Err(DeviceError::new(DeviceErrorKind::NotCaptureCapable, path));
    }
    if !caps.can_stream {
        return Err(DeviceError::new(DeviceErrorKind::NotStreamingCapable, path));
    }
    Ok(caps)
}

fn close_quietly<D: VideoDriver>(driver: D) {
    let path = driver.path().to_path_buf();
    if let Err(err) = driver.close() {
        warn!(device = %path.display(), error = %err, "close after probe failed");
    }
}

/// Open `path` read-only, check its capabilities and close it again.
///
/// Only QUERYCAP is issued, so probing a device that is already streaming
/// elsewhere does not disturb it.
pub fn validate(path: &Path) -> Result<DeviceCapabilities> {
    require_streaming_capture(V4L2Device::probe(path)?, path)
}

/// Whether `path` is a streaming-capable V4L2 capture device.
pub fn is_valid_device(path: &Path) -> bool {
    match validate(path) {
        Ok(_) => true,
        Err(err) => {
            debug!(error = %err, "not a usable camera");
            false
        }
    }
}

/// All `/dev/video*` nodes that are usable capture devices, sorted.
pub fn list_cameras() -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };

    let mut cameras: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("video"))
        })
        .filter(|path| is_valid_device(path))
        .collect();
    cameras.sort();
    cameras
}

/// Enumerate formats, sizes and intervals of the device at `path`.
pub fn enumerate_formats(path: &Path) -> Result<FormatMap> {
    let device = V4L2Device::open(path)?;
    let formats = check_capabilities(&device).and_then(|_| enumerate_formats_with(&device));
    close_quietly(device);
    formats
}

/// Enumerate formats, sizes and intervals of an open device.
pub fn enumerate_formats_with<D: VideoDriver>(driver: &D) -> Result<FormatMap> {
    let path = driver.path();
    let query = |err| DeviceError::io(DeviceErrorKind::NotADevice, path, err);

    let mut map = FormatMap::new();
    for desc in driver.formats().map_err(query)? {
        let mut sizes = Vec::new();
        for range in driver.frame_sizes(desc.fourcc).map_err(query)? {
            for (width, height) in expand_sizes(range, path)? {
                let mut intervals = Vec::new();
                for interval in driver
                    .frame_intervals(desc.fourcc, width, height)
                    .map_err(query)?
                {
                    intervals.extend(expand_intervals(interval, path)?);
                }
                sizes.push(FrameDescriptor {
                    fourcc: desc.fourcc,
                    width,
                    height,
                    intervals,
                });
            }
        }

        debug!(device = %path.display(), fourcc = %desc.fourcc, sizes = sizes.len(), "format enumerated");
        map.insert(
            desc.fourcc,
            FormatInfo {
                description: desc.description,
                compressed: desc.compressed,
                emulated: desc.emulated,
                sizes,
            },
        );
    }
    Ok(map)
}

fn overflow(path: &Path, what: &str) -> DeviceError {
    DeviceError::new(DeviceErrorKind::EnumerationOverflow, path).with_detail(format!(
        "{what} expands beyond {MAX_ENUM_ENTRIES} entries"
    ))
}

/// `min..=max` by `step`; `None` if that would exceed the entry cap or
/// never terminate.
fn expand_axis(min: u32, max: u32, step: u32) -> Option<Vec<u32>> {
    if min > max {
        return Some(Vec::new());
    }
    if step == 0 {
        return (min == max).then(|| vec![min]);
    }

    let mut values = Vec::new();
    let mut value = Some(min);
    while let Some(v) = value.filter(|v| *v <= max) {
        if values.len() == MAX_ENUM_ENTRIES {
            return None;
        }
        values.push(v);
        value = v.checked_add(step);
    }
    Some(values)
}

fn expand_sizes(range: FrameSizeRange, path: &Path) -> Result<Vec<(u32, u32)>> {
    match range {
        FrameSizeRange::Discrete { width, height } => Ok(vec![(width, height)]),
        FrameSizeRange::Stepwise {
            min_width,
            max_width,
            step_width,
            min_height,
            max_height,
            step_height,
        } => {
            let widths = expand_axis(min_width, max_width, step_width)
                .ok_or_else(|| overflow(path, "stepwise width range"))?;
            let heights = expand_axis(min_height, max_height, step_height)
                .ok_or_else(|| overflow(path, "stepwise height range"))?;
            if widths.len().saturating_mul(heights.len()) > MAX_ENUM_ENTRIES {
                return Err(overflow(path, "stepwise size range"));
            }
            Ok(widths
                .iter()
                .flat_map(|&w| heights.iter().map(move |&h| (w, h)))
                .collect())
        }
    }
}

const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn reduced(numerator: u64, denominator: u64) -> Option<Fraction> {
    let g = gcd(numerator, denominator).max(1);
    Some(Fraction::new(
        u32::try_from(numerator / g).ok()?,
        u32::try_from(denominator / g).ok()?,
    ))
}

fn expand_intervals(range: FrameIntervalRange, path: &Path) -> Result<Vec<Fraction>> {
    let (min, max, step) = match range {
        FrameIntervalRange::Discrete(interval) => return Ok(vec![interval]),
        FrameIntervalRange::Stepwise { min, max, step } => (min, max, step),
    };

    let [min_n, min_d, max_n, max_d, step_n, step_d] = [
        min.numerator,
        min.denominator,
        max.numerator,
        max.denominator,
        step.numerator,
        step.denominator,
    ]
    .map(u64::from);
    if min_d == 0 || max_d == 0 || step_d == 0 {
        return Err(overflow(path, "stepwise interval with zero denominator"));
    }

    // All values share the denominator min_d * step_d:
    // min + k * step = (min_n * step_d + k * step_n * min_d) / (min_d * step_d).
    let denominator = min_d * step_d;
    let start = min_n * step_d;
    let increment = step_n * min_d;
    let within_max = |numerator: u64| u128::from(numerator) * u128::from(max_d)
        <= u128::from(max_n) * u128::from(denominator);

    if increment == 0 {
        if min_n * max_d == max_n * min_d {
            return Ok(vec![min]);
        }
        return Err(overflow(path, "stepwise interval with zero step"));
    }

    let mut intervals = Vec::new();
    let mut numerator = start;
    while within_max(numerator) {
        if intervals.len() == MAX_ENUM_ENTRIES {
            return Err(overflow(path, "stepwise interval range"));
        }
        intervals.push(
            reduced(numerator, denominator)
                .ok_or_else(|| overflow(path, "stepwise interval value"))?,
        );
        numerator += increment;
    }
    Ok(intervals)
}

/// Convert a frame rate to the exact frame interval requested from the
/// driver.
///
/// The smallest `k` for which `rate * k` is integral within a tolerance of
/// `1e-6` gives `k / round(rate * k)`: 30 fps (or a computed 30.000000001)
/// gives `1/30`, 7.5 fps gives `2/15` and 29.97 fps gives `100/2997`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn interval_for_rate(fps: f64) -> std::result::Result<Fraction, ConfigError> {
    if !fps.is_finite() || fps <= 0.0 || fps > f64::from(u32::MAX) {
        return Err(ConfigError::InvalidFrameRate(fps));
    }

    for k in 1..=MAX_RATE_MULTIPLIER {
        let scaled = fps * f64::from(k);
        let rounded = scaled.round();
        if (scaled - rounded).abs() < RATE_TOLERANCE {
            if rounded < 1.0 || rounded > f64::from(u32::MAX) {
                break;
            }
            return Ok(Fraction::new(k, rounded as u32));
        }
    }
    Err(ConfigError::InvalidFrameRate(fps))
}
