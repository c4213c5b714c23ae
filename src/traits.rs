//! Core traits and types for V4L2 camera abstraction.

use std::io;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed, chroma first).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// NV12 pixel format (4:2:0, Y plane then interleaved UV plane).
    pub const NV12: Self = Self::new(b"NV12");
    /// YU12 pixel format (4:2:0 planar, also known as I420).
    pub const YU12: Self = Self::new(b"YU12");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// BGR3 pixel format (24-bit BGR).
    pub const BGR3: Self = Self::new(b"BGR3");
    /// GREY pixel format (8-bit luminance).
    pub const GREY: Self = Self::new(b"GREY");

    /// The 32-bit tag used on the wire, first character in the low byte.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl FromStr for FourCC {
    type Err = ConfigError;

    /// Parse a four character code, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| ConfigError::InvalidFourCC(s.to_owned()))?;
        if !code.iter().all(|c| c.is_ascii_graphic() || *c == b' ') {
            return Err(ConfigError::InvalidFourCC(s.to_owned()));
        }
        Ok(Self(code.map(|c| c.to_ascii_uppercase())))
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &c in &self.0 {
            write!(f, "{}", char::from(c))?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// An exact rational number, used for frame intervals (seconds per frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl Fraction {
    /// Create a new fraction.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Frames per second for an interval, `None` for a zero interval.
    #[must_use]
    pub fn fps(self) -> Option<f64> {
        (self.numerator != 0).then(|| f64::from(self.denominator) / f64::from(self.numerator))
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl From<v4l::Fraction> for Fraction {
    fn from(frac: v4l::Fraction) -> Self {
        Self::new(frac.numerator, frac.denominator)
    }
}

impl From<Fraction> for v4l::Fraction {
    fn from(frac: Fraction) -> Self {
        Self::new(frac.numerator, frac.denominator)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride), zero to let the driver choose.
    pub stride: u32,
    /// Total frame size in bytes, zero to let the driver choose.
    pub size: u32,
}

impl Format {
    /// Create a format request; the driver fills in stride and size.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// One entry of the driver's pixel format enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Pixel format.
    pub fourcc: FourCC,
    /// Driver-supplied description.
    pub description: String,
    /// Compressed format (e.g. MJPEG).
    pub compressed: bool,
    /// Emulated in software rather than native to the hardware.
    pub emulated: bool,
}

/// One entry of the driver's frame size enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeRange {
    /// A single supported size.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A range of sizes, each axis stepping independently.
    Stepwise {
        /// Smallest width.
        min_width: u32,
        /// Largest width.
        max_width: u32,
        /// Width increment.
        step_width: u32,
        /// Smallest height.
        min_height: u32,
        /// Largest height.
        max_height: u32,
        /// Height increment.
        step_height: u32,
    },
}

/// One entry of the driver's frame interval enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIntervalRange {
    /// A single supported interval.
    Discrete(Fraction),
    /// A range of intervals.
    Stepwise {
        /// Shortest interval.
        min: Fraction,
        /// Longest interval.
        max: Fraction,
        /// Increment.
        step: Fraction,
    },
}

/// A buffer handed back by the driver on dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Slot index within the buffer pool.
    pub index: u32,
    /// Bytes of valid sample data in the slot.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
}

/// The kernel-facing operations of one open capture device.
///
/// Each method corresponds to one V4L2 ioctl (or `mmap`/`munmap`) and
/// reports the raw OS error on failure; callers attach the semantic stage.
/// Implementations are not internally synchronized: one caller at a time.
pub trait VideoDriver: Send {
    /// A mapped capture buffer.
    type Mapping: AsRef<[u8]> + Send;

    /// Path of the device node, for diagnostics.
    fn path(&self) -> &Path;

    /// Query device capabilities.
    fn capabilities(&self) -> io::Result<DeviceCapabilities>;

    /// Enumerate capture pixel formats.
    fn formats(&self) -> io::Result<Vec<FormatDescription>>;

    /// Enumerate frame sizes for a pixel format.
    fn frame_sizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSizeRange>>;

    /// Enumerate frame intervals for a pixel format and size.
    fn frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameIntervalRange>>;

    /// Set capture format. Returns the actual format set by the driver.
    fn set_format(&mut self, format: &Format) -> io::Result<Format>;

    /// Set the frame interval. Returns the interval the driver applied.
    fn set_frame_interval(&mut self, interval: Fraction) -> io::Result<Fraction>;

    /// Request `count` mmap buffers. Returns how many the driver granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query and map buffer `index`.
    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping>;

    /// Unmap a buffer previously returned by [`VideoDriver::map_buffer`].
    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()>;

    /// Hand buffer `index` to the driver for filling.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take the next filled buffer, blocking until one is ready.
    fn dequeue_buffer(&mut self) -> io::Result<Dequeued>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming; the driver reclaims all queued buffers.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Close the descriptor.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// A captured frame packed as RGB, 3 bytes per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl RgbFrame {
    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates lie outside the frame.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        match self.data.get(offset..offset + 3)? {
            &[r, g, b] => Some((r, g, b)),
            _ => None,
        }
    }

    /// Consume the frame, returning the packed bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
