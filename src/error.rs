//! Error types for device, configuration and batch capture failures.

use std::io;
use std::path::{Path, PathBuf};

use crate::traits::FourCC;

/// The stage at which a device operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    /// Path is not a V4L2 character device.
    NotADevice,
    /// Device lacks the video-capture capability.
    NotCaptureCapable,
    /// Device lacks the streaming I/O capability.
    NotStreamingCapable,
    /// Stat or open of the device node failed.
    OpenFailed,
    /// Driver did not accept the exact pixel format and size.
    FormatNegotiationFailed,
    /// Driver did not accept the exact frame interval.
    FrameRateNegotiationFailed,
    /// Driver granted fewer than two capture buffers.
    InsufficientBufferMemory,
    /// Querying or mapping a capture buffer failed.
    MappingFailed,
    /// Taking a filled buffer from the driver failed.
    DequeueFailed,
    /// Raw sample could not be converted.
    ConversionFailed,
    /// Handing a consumed buffer back to the driver failed.
    RequeueFailed,
    /// Intermediate image could not be packed into the destination.
    PackingFailed,
    /// Queueing buffers or stream-on failed.
    StreamOnFailed,
    /// Stream-off failed.
    StreamOffFailed,
    /// Stepwise size or interval expansion exceeded the entry cap.
    EnumerationOverflow,
    /// Operation is not valid in the handle's current state.
    InvalidState,
    /// Closing the descriptor failed.
    CloseFailed,
    /// Unmapping a capture buffer failed.
    UnmapFailed,
    /// A capture worker thread panicked.
    WorkerPanicked,
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NotADevice => "not a V4L2 device",
            Self::NotCaptureCapable => "not a video capture device",
            Self::NotStreamingCapable => "does not support streaming I/O",
            Self::OpenFailed => "cannot open device",
            Self::FormatNegotiationFailed => "pixel format negotiation failed",
            Self::FrameRateNegotiationFailed => "frame rate negotiation failed",
            Self::InsufficientBufferMemory => "insufficient buffer memory",
            Self::MappingFailed => "buffer mapping failed",
            Self::DequeueFailed => "dequeue failed",
            Self::ConversionFailed => "pixel conversion failed",
            Self::RequeueFailed => "requeue failed",
            Self::PackingFailed => "RGB packing failed",
            Self::StreamOnFailed => "stream on failed",
            Self::StreamOffFailed => "stream off failed",
            Self::EnumerationOverflow => "stepwise enumeration overflow",
            Self::InvalidState => "invalid state for operation",
            Self::CloseFailed => "cannot close device",
            Self::UnmapFailed => "buffer unmap failed",
            Self::WorkerPanicked => "capture worker panicked",
        };
        f.write_str(msg)
    }
}

/// A failed device operation.
///
/// Carries the semantic [`DeviceErrorKind`], the device path, an optional
/// human-readable detail and, when the failure came from the OS, the
/// underlying [`io::Error`] (and with it the errno).
#[derive(Debug)]
pub struct DeviceError {
    kind: DeviceErrorKind,
    device: PathBuf,
    detail: Option<String>,
    source: Option<io::Error>,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.device.display(), self.kind)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        if let Some(err) = &self.source {
            write!(f, ": {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl DeviceError {
    /// Create an error without an underlying OS error.
    pub fn new(kind: DeviceErrorKind, device: &Path) -> Self {
        Self {
            kind,
            device: device.to_path_buf(),
            detail: None,
            source: None,
        }
    }

    /// Create an error wrapping the OS error that caused it.
    pub fn io(kind: DeviceErrorKind, device: &Path, source: io::Error) -> Self {
        Self {
            kind,
            device: device.to_path_buf(),
            detail: None,
            source: Some(source),
        }
    }

    /// Attach a human-readable detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// The stage that failed.
    pub const fn kind(&self) -> DeviceErrorKind {
        self.kind
    }

    /// Path of the device the error belongs to.
    pub fn device(&self) -> &Path {
        &self.device
    }

    /// Extra detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// The OS error code, if the failure came from a syscall.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(io::Error::raw_os_error)
    }

    /// The underlying I/O error, if any.
    pub const fn io_error(&self) -> Option<&io::Error> {
        self.source.as_ref()
    }
}

/// Invalid caller-supplied configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Cameras in one batch do not share a resolution.
    #[error("camera {index} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    MismatchedCameraResolutions {
        /// Index of the first camera that differs.
        index: usize,
        /// Resolution of camera 0.
        expected_width: u32,
        /// Resolution of camera 0.
        expected_height: u32,
        /// Resolution of the mismatching camera.
        actual_width: u32,
        /// Resolution of the mismatching camera.
        actual_height: u32,
    },
    /// A FourCC string was not exactly four ASCII characters.
    #[error("`{0}` is not a valid FOURCC")]
    InvalidFourCC(String),
    /// The frame rate cannot be expressed as an exact rational interval.
    #[error("frame rate {0} cannot be expressed as a rational interval")]
    InvalidFrameRate(f64),
    /// A batch read was requested over zero cameras.
    #[error("no cameras to read from")]
    NoCameras,
    /// The destination does not hold exactly one frame per camera.
    #[error("destination holds {actual} bytes, expected {expected}")]
    DestinationSize {
        /// Bytes required.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// A camera index outside the group was requested.
    #[error("no camera with index {index} (group has {count})")]
    UnknownCamera {
        /// Requested index.
        index: usize,
        /// Number of cameras in the group.
        count: usize,
    },
    /// The same camera was requested twice in one batch.
    #[error("camera {0} requested more than once")]
    DuplicateCamera(usize),
    /// Width or height is zero.
    #[error("resolution {width}x{height} is empty")]
    EmptyResolution {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
    },
    /// The format is not one the pixel converter understands.
    #[error("pixel format {0} is not supported")]
    UnsupportedFormat(FourCC),
}

/// Failure of a multi-camera operation.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Preconditions failed before any worker started.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Camera `index` within the batch failed.
    #[error("camera {index} failed: {source}")]
    Camera {
        /// Position of the camera within the batch.
        index: usize,
        /// The pipeline error.
        #[source]
        source: DeviceError,
    },
}

impl CaptureError {
    /// Batch index and device error for a camera failure.
    pub const fn camera(&self) -> Option<(usize, &DeviceError)> {
        match self {
            Self::Camera { index, source } => Some((*index, source)),
            Self::Config(_) => None,
        }
    }
}

/// Result type for single-device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
