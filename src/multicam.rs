//! A fixed group of cameras started, read and stopped together.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::capture::{CaptureState, DeviceConfig, DeviceHandle};
use crate::device::V4L2Device;
use crate::error::{CaptureError, ConfigError};
use crate::sync::{read_all, read_batch, Result};
use crate::traits::{FourCC, VideoDriver};

/// Cameras sharing one resolution, format and frame rate.
#[derive(Debug)]
pub struct Multicam<D: VideoDriver = V4L2Device> {
    cameras: Vec<DeviceHandle<D>>,
    started: bool,
}

impl Multicam<V4L2Device> {
    /// A stopped group over the V4L2 devices at `paths`.
    pub fn new<I, P>(paths: I, width: u32, height: u32, fourcc: FourCC, fps: f64) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let cameras = paths
            .into_iter()
            .map(|path| -> std::result::Result<DeviceHandle, ConfigError> {
                let config = DeviceConfig::new(path, width, height, fourcc, fps);
                config.validate()?;
                Ok(DeviceHandle::new(config))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::from_handles(cameras)
    }
}

impl<D: VideoDriver> Multicam<D> {
    /// A group over closed handles; all must share one resolution.
    pub fn from_handles(cameras: Vec<DeviceHandle<D>>) -> Result<Self> {
        let first = cameras.first().ok_or(ConfigError::NoCameras)?;
        let (width, height) = (first.width(), first.height());
        if let Some((index, handle)) = cameras
            .iter()
            .enumerate()
            .find(|(_, h)| h.width() != width || h.height() != height)
        {
            return Err(ConfigError::MismatchedCameraResolutions {
                index,
                expected_width: width,
                expected_height: height,
                actual_width: handle.width(),
                actual_height: handle.height(),
            }
            .into());
        }
        Ok(Self {
            cameras,
            started: false,
        })
    }

    /// Number of cameras.
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Whether the group has no cameras. Never true for a constructed group.
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Whether [`Multicam::start`] has succeeded and [`Multicam::stop`] has
    /// not been called since.
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// The cameras, in group order.
    pub fn cameras(&self) -> &[DeviceHandle<D>] {
        &self.cameras
    }

    /// Bytes of one packed RGB frame from one camera.
    pub fn frame_len(&self) -> usize {
        self.cameras.first().map_or(0, DeviceHandle::frame_len)
    }

    /// Open, configure and start every camera in order.
    ///
    /// If any camera fails, every camera is closed again before the error
    /// is returned.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        for index in 0..self.cameras.len() {
            let Some(camera) = self.cameras.get_mut(index) else {
                break;
            };
            let started = camera
                .open()
                .and_then(|()| camera.configure())
                .and_then(|()| camera.start());
            if let Err(source) = started {
                warn!(index, error = %source, "camera failed to start, closing group");
                self.close_all();
                return Err(CaptureError::Camera { index, source });
            }
        }

        self.started = true;
        debug!(cameras = self.cameras.len(), "group started");
        Ok(())
    }

    fn close_all(&mut self) {
        for camera in &mut self.cameras {
            if camera.state() != CaptureState::Closed {
                if let Err(err) = camera.close() {
                    warn!(error = %err, "close during rollback failed");
                }
            }
        }
    }

    /// Capture one frame from every camera, concatenated in group order.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let mut dst = vec![0u8; self.frame_len() * self.cameras.len()];
        self.read_into(&mut dst)?;
        Ok(dst)
    }

    /// Capture `n` consecutive batches, stacked per camera: camera `i`'s
    /// frames occupy bytes `i * n * frame_len .. (i + 1) * n * frame_len`,
    /// oldest first.
    pub fn read_n(&mut self, n: usize) -> Result<Vec<u8>> {
        let frame_len = self.frame_len();
        let mut batch = vec![0u8; frame_len * self.cameras.len()];
        let mut stacked = vec![0u8; batch.len() * n];

        for shot in 0..n {
            self.read_into(&mut batch)?;
            for (frame, frames) in batch
                .chunks_exact(frame_len)
                .zip(stacked.chunks_exact_mut(frame_len * n))
            {
                if let Some(slot) = frames.chunks_exact_mut(frame_len).nth(shot) {
                    slot.copy_from_slice(frame);
                }
            }
        }
        Ok(stacked)
    }

    /// Capture one frame from every camera into `dst`.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<()> {
        read_all(&mut self.cameras, dst)
    }

    /// Capture one frame from each camera in `ids`, concatenated in the
    /// order given. Errors name the camera by its group index.
    pub fn read_subset(&mut self, ids: &[usize]) -> Result<Vec<u8>> {
        let count = self.cameras.len();
        let mut slots: Vec<Option<&mut DeviceHandle<D>>> =
            self.cameras.iter_mut().map(Some).collect();

        let mut batch = Vec::with_capacity(ids.len());
        for &index in ids {
            let handle = slots
                .get_mut(index)
                .ok_or(ConfigError::UnknownCamera { index, count })?
                .take()
                .ok_or(ConfigError::DuplicateCamera(index))?;
            batch.push(handle);
        }

        let frame_len = batch.first().map_or(0, |h| h.frame_len());
        let mut dst = vec![0u8; frame_len * batch.len()];
        read_batch(batch, &mut dst).map_err(|err| match err {
            CaptureError::Camera { index, source } => CaptureError::Camera {
                index: ids.get(index).copied().unwrap_or(index),
                source,
            },
            other @ CaptureError::Config(_) => other,
        })?;
        Ok(dst)
    }

    /// Stop and close every camera.
    ///
    /// Every camera is attempted; the first failure is returned.
    pub fn stop(&mut self) -> Result<()> {
        let mut first_err = None;
        for (index, camera) in self.cameras.iter_mut().enumerate() {
            let result = match camera.state() {
                CaptureState::Closed => Ok(()),
                CaptureState::Streaming => camera.stop().and_then(|()| camera.close()),
                _ => camera.close(),
            };
            if let Err(source) = result {
                warn!(index, error = %source, "camera failed to stop");
                first_err.get_or_insert(CaptureError::Camera { index, source });
                if camera.state() != CaptureState::Closed {
                    if let Err(err) = camera.close() {
                        warn!(index, error = %err, "close after failed stop");
                    }
                }
            }
        }

        self.started = false;
        debug!(cameras = self.cameras.len(), "group stopped");
        first_err.map_or(Ok(()), Err)
    }
}
