//! Per-device capture lifecycle.
//!
//! A [`DeviceHandle`] owns one device descriptor and its buffer pool and
//! moves through
//! `Closed -> Opened -> Configured -> Streaming -> Stopped -> Closed`.
//! Every transition is checked; calling an operation from the wrong state
//! fails with [`DeviceErrorKind::InvalidState`].

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::convert;
use crate::device::V4L2Device;
use crate::error::{ConfigError, DeviceError, DeviceErrorKind, Result};
use crate::negotiate::{check_capabilities, interval_for_rate};
use crate::pool::{BufferPool, DEFAULT_BUFFER_COUNT};
use crate::traits::{Format, FourCC, Fraction, VideoDriver};

/// Capture settings for one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Device node, e.g. `/dev/video0`.
    pub path: PathBuf,
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Requested pixel format.
    pub fourcc: FourCC,
    /// Requested frame rate.
    pub fps: f64,
}

impl DeviceConfig {
    /// Default width.
    pub const DEFAULT_WIDTH: u32 = 640;
    /// Default height.
    pub const DEFAULT_HEIGHT: u32 = 480;
    /// Default pixel format.
    pub const DEFAULT_FOURCC: FourCC = FourCC::MJPG;
    /// Default frame rate.
    pub const DEFAULT_FPS: f64 = 30.0;

    /// Settings for `path`.
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32, fourcc: FourCC, fps: f64) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            fourcc,
            fps,
        }
    }

    /// 640x480 MJPEG at 30 fps.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self::new(
            path,
            Self::DEFAULT_WIDTH,
            Self::DEFAULT_HEIGHT,
            Self::DEFAULT_FOURCC,
            Self::DEFAULT_FPS,
        )
    }

    /// Check the settings without touching the device and return the frame
    /// interval that will be requested.
    pub fn validate(&self) -> std::result::Result<Fraction, ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyResolution {
                width: self.width,
                height: self.height,
            });
        }
        if !convert::is_supported(self.fourcc) {
            return Err(ConfigError::UnsupportedFormat(self.fourcc));
        }
        interval_for_rate(self.fps)
    }

    /// Bytes of one packed RGB frame.
    pub const fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Lifecycle state of a [`DeviceHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No descriptor.
    Closed,
    /// Descriptor open, nothing negotiated.
    Opened,
    /// Format and rate negotiated, buffers mapped.
    Configured,
    /// Buffers queued and the stream running.
    Streaming,
    /// Stream stopped; only `close` remains.
    Stopped,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Opens the driver for a device path.
pub type Opener<D> = Box<dyn Fn(&Path) -> Result<D> + Send>;

/// One camera's descriptor, buffer pool and lifecycle state.
///
/// Operations take `&mut self`, so acquisitions on one handle never
/// overlap. Dropping a handle that is not closed closes it, logging any
/// failure.
pub struct DeviceHandle<D: VideoDriver = V4L2Device> {
    config: DeviceConfig,
    opener: Opener<D>,
    driver: Option<D>,
    pool: BufferPool<D::Mapping>,
    format: Option<Format>,
    state: CaptureState,
}

impl<D: VideoDriver> std::fmt::Debug for DeviceHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("format", &self.format)
            .field("buffers", &self.pool.len())
            .finish_non_exhaustive()
    }
}

impl DeviceHandle<V4L2Device> {
    /// A closed handle onto a V4L2 device node.
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_opener(config, V4L2Device::open)
    }
}

impl<D: VideoDriver> DeviceHandle<D> {
    /// A closed handle whose descriptor is produced by `opener`.
    pub fn with_opener<F>(config: DeviceConfig, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<D> + Send + 'static,
    {
        Self {
            config,
            opener: Box::new(opener),
            driver: None,
            pool: BufferPool::default(),
            format: None,
            state: CaptureState::Closed,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Requested settings.
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Device node path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        self.config.width
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        self.config.height
    }

    /// Bytes of one packed RGB frame.
    pub const fn frame_len(&self) -> usize {
        self.config.frame_len()
    }

    /// Format the driver accepted, once configured.
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Number of mapped capture buffers.
    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    /// Capture buffer pool.
    pub const fn pool(&self) -> &BufferPool<D::Mapping> {
        &self.pool
    }

    fn expect_state(&self, expected: CaptureState, op: &str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        Err(self.invalid_state(op))
    }

    fn invalid_state(&self, op: &str) -> DeviceError {
        DeviceError::new(DeviceErrorKind::InvalidState, &self.config.path)
            .with_detail(format!("cannot {op} while {}", self.state))
    }

    /// Open the descriptor. Only valid while closed.
    pub fn open(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Closed, "open")?;

        let driver = (self.opener)(&self.config.path)?;
        self.driver = Some(driver);
        self.state = CaptureState::Opened;
        debug!(device = %self.config.path.display(), "opened");
        Ok(())
    }

    /// Negotiate format and frame rate, then request and map the buffer
    /// pool. Only valid while opened.
    ///
    /// The driver must accept the exact pixel format, size and frame
    /// interval; any adjustment is a negotiation failure. On failure the
    /// handle stays opened.
    pub fn configure(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Opened, "configure")?;
        let config = &self.config;
        let path = config.path.as_path();
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| DeviceError::new(DeviceErrorKind::InvalidState, path))?;

        check_capabilities(&*driver)?;

        let interval = config.validate().map_err(|err| {
            let kind = match err {
                ConfigError::InvalidFrameRate(_) => DeviceErrorKind::FrameRateNegotiationFailed,
                _ => DeviceErrorKind::FormatNegotiationFailed,
            };
            DeviceError::new(kind, path).with_detail(err.to_string())
        })?;

        let requested = Format::new(config.width, config.height, config.fourcc);
        let format = driver
            .set_format(&requested)
            .map_err(|err| DeviceError::io(DeviceErrorKind::FormatNegotiationFailed, path, err))?;
        if format.fourcc != requested.fourcc
            || format.width != requested.width
            || format.height != requested.height
        {
            return Err(
                DeviceError::new(DeviceErrorKind::FormatNegotiationFailed, path).with_detail(
                    format!(
                        "requested {}x{} {}, driver chose {}x{} {}",
                        requested.width,
                        requested.height,
                        requested.fourcc,
                        format.width,
                        format.height,
                        format.fourcc
                    ),
                ),
            );
        }

        let applied = driver.set_frame_interval(interval).map_err(|err| {
            DeviceError::io(DeviceErrorKind::FrameRateNegotiationFailed, path, err)
        })?;
        if applied != interval {
            return Err(
                DeviceError::new(DeviceErrorKind::FrameRateNegotiationFailed, path)
                    .with_detail(format!("requested interval {interval}, driver chose {applied}")),
            );
        }

        let mut pool = BufferPool::request(driver, DEFAULT_BUFFER_COUNT)?;
        pool.map_all(driver)?;

        debug!(
            device = %path.display(),
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            %interval,
            buffers = pool.len(),
            "configured"
        );
        self.pool = pool;
        self.format = Some(format);
        self.state = CaptureState::Configured;
        Ok(())
    }

    /// Queue every buffer and start the stream. Only valid while
    /// configured.
    ///
    /// On failure the stream is stopped again, the buffers are reclaimed and
    /// the handle stays configured.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Configured, "start")?;
        let path = self.config.path.as_path();
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| DeviceError::new(DeviceErrorKind::InvalidState, path))?;

        let indices: Vec<u32> = self.pool.iter().map(|b| b.index()).collect();
        let started = indices
            .iter()
            .try_for_each(|&index| -> std::io::Result<()> {
                driver.queue_buffer(index)?;
                self.pool.mark_queued(index);
                Ok(())
            })
            .and_then(|()| driver.stream_on());

        if let Err(err) = started {
            if let Err(off_err) = driver.stream_off() {
                warn!(device = %path.display(), error = %off_err, "stream off after failed start");
            }
            self.pool.reclaim_all();
            return Err(DeviceError::io(DeviceErrorKind::StreamOnFailed, path, err));
        }

        self.state = CaptureState::Streaming;
        debug!(device = %path.display(), queued = self.pool.queued_count(), "streaming");
        Ok(())
    }

    /// Stop the stream. Only valid while streaming.
    ///
    /// On failure the handle stays streaming.
    pub fn stop(&mut self) -> Result<()> {
        self.expect_state(CaptureState::Streaming, "stop")?;
        let path = self.config.path.as_path();
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| DeviceError::new(DeviceErrorKind::InvalidState, path))?;

        driver
            .stream_off()
            .map_err(|err| DeviceError::io(DeviceErrorKind::StreamOffFailed, path, err))?;
        self.pool.reclaim_all();
        self.state = CaptureState::Stopped;
        debug!(device = %path.display(), "stopped");
        Ok(())
    }

    /// Unmap the buffers and close the descriptor. Valid from any state but
    /// closed.
    ///
    /// A streaming handle is stopped first. Every step is attempted; the
    /// first failure is returned and the handle ends closed regardless.
    pub fn close(&mut self) -> Result<()> {
        if self.state == CaptureState::Closed {
            return Err(self.invalid_state("close"));
        }
        let path = self.config.path.as_path();
        let was_streaming = self.state == CaptureState::Streaming;
        self.state = CaptureState::Closed;
        self.format = None;

        let Some(mut driver) = self.driver.take() else {
            return Ok(());
        };

        let stopped = if was_streaming {
            let stopped = driver.stream_off().map_err(|err| {
                warn!(device = %path.display(), error = %err, "stream off during close");
                DeviceError::io(DeviceErrorKind::StreamOffFailed, path, err)
            });
            self.pool.reclaim_all();
            stopped
        } else {
            Ok(())
        };

        let released = self.pool.release(&mut driver);
        let closed = driver
            .close()
            .map_err(|err| DeviceError::io(DeviceErrorKind::CloseFailed, path, err));

        debug!(device = %path.display(), "closed");
        stopped.and(released).and(closed)
    }

    /// Driver, pool and negotiated format for one acquisition. Only valid
    /// while streaming.
    pub(crate) fn streaming_parts(
        &mut self,
    ) -> Result<(&mut D, &mut BufferPool<D::Mapping>, &Format)> {
        if self.state != CaptureState::Streaming {
            return Err(self.invalid_state("acquire"));
        }
        match (self.driver.as_mut(), self.format.as_ref()) {
            (Some(driver), Some(format)) => Ok((driver, &mut self.pool, format)),
            _ => Err(DeviceError::new(
                DeviceErrorKind::InvalidState,
                &self.config.path,
            )),
        }
    }
}

impl<D: VideoDriver> Drop for DeviceHandle<D> {
    fn drop(&mut self) {
        if self.state != CaptureState::Closed {
            if let Err(err) = self.close() {
                warn!(error = %err, "close on drop failed");
            }
        }
    }
}
