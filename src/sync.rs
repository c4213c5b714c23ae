//! Concurrent capture across cameras sharing one resolution.

use std::thread;

use tracing::debug;

use crate::capture::DeviceHandle;
use crate::error::{CaptureError, ConfigError, DeviceError, DeviceErrorKind};
use crate::pipeline::acquire;
use crate::traits::VideoDriver;

/// Result type for batch reads.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Capture one frame from every handle concurrently into `dst`.
///
/// Camera `i` writes bytes `i * frame_len .. (i + 1) * frame_len` of `dst`.
/// Resolution and destination size are checked before any worker starts.
/// All workers are joined; when several fail, the lowest index is
/// reported. Cameras that succeeded keep their frames and nothing is
/// rolled back.
pub fn read_all<D: VideoDriver>(handles: &mut [DeviceHandle<D>], dst: &mut [u8]) -> Result<()> {
    read_batch(handles.iter_mut().collect(), dst)
}

/// [`read_all`] into a freshly allocated buffer.
pub fn read_all_to_vec<D: VideoDriver>(handles: &mut [DeviceHandle<D>]) -> Result<Vec<u8>> {
    let frame_len = handles.first().map_or(0, DeviceHandle::frame_len);
    let mut dst = vec![0u8; frame_len * handles.len()];
    read_all(handles, &mut dst)?;
    Ok(dst)
}

/// Read a batch given as individual handle borrows, in order.
pub(crate) fn read_batch<D: VideoDriver>(
    handles: Vec<&mut DeviceHandle<D>>,
    dst: &mut [u8],
) -> Result<()> {
    let first = handles.first().ok_or(ConfigError::NoCameras)?;
    let (width, height) = (first.width(), first.height());
    if width == 0 || height == 0 {
        return Err(ConfigError::EmptyResolution { width, height }.into());
    }
    if let Some((index, handle)) = handles
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

    let frame_len = first.frame_len();
    let expected = frame_len * handles.len();
    if dst.len() != expected {
        return Err(ConfigError::DestinationSize {
            expected,
            actual: dst.len(),
        }
        .into());
    }

    debug!(cameras = handles.len(), width, height, "batch read");
    let results: Vec<crate::error::Result<()>> = thread::scope(|scope| {
        let workers: Vec<_> = handles
            .into_iter()
            .zip(dst.chunks_exact_mut(frame_len))
            .map(|(handle, slice)| {
                let path = handle.path().to_path_buf();
                (path, scope.spawn(move || acquire(handle, slice)))
            })
            .collect();

        workers
            .into_iter()
            .map(|(path, worker)| {
                worker
                    .join()
                    .unwrap_or_else(|_| Err(DeviceError::new(DeviceErrorKind::WorkerPanicked, &path)))
            })
            .collect()
    });

    results
        .into_iter()
        .enumerate()
        .find_map(|(index, result)| result.err().map(|source| CaptureError::Camera { index, source }))
        .map_or(Ok(()), Err)
}
