//! Single-camera frame acquisition: dequeue, convert, requeue, pack.

use std::thread;

use crate::capture::DeviceHandle;
use crate::convert::{pack_rgb, to_argb};
use crate::error::{DeviceError, DeviceErrorKind, Result};
use crate::traits::{RgbFrame, VideoDriver};

/// Capture one frame from a streaming handle into `dst` as packed RGB.
///
/// `dst` must hold exactly `width * height * 3` bytes. The dequeued slot is
/// handed back to the driver even when conversion fails; if both fail the
/// conversion error is reported. Blocks until the driver delivers a frame
/// and never retries.
pub fn acquire<D: VideoDriver>(handle: &mut DeviceHandle<D>, dst: &mut [u8]) -> Result<()> {
    let (driver, pool, format) = handle.streaming_parts()?;
    let path = driver.path().to_path_buf();

    let frame = driver
        .dequeue_buffer()
        .map_err(|err| DeviceError::io(DeviceErrorKind::DequeueFailed, &path, err))?;
    if !pool.mark_dequeued(frame.index) {
        return Err(DeviceError::new(DeviceErrorKind::DequeueFailed, &path)
            .with_detail(format!("driver returned slot {} which was not queued", frame.index)));
    }

    let converted = match pool.get(frame.index) {
        Some(slot) => {
            let data = slot.data();
            let used = match frame.bytes_used as usize {
                0 => data.len(),
                n => n.min(data.len()),
            };
            to_argb(
                data.get(..used).unwrap_or(data),
                format.fourcc,
                format.width,
                format.height,
            )
            .map_err(|err| {
                DeviceError::new(DeviceErrorKind::ConversionFailed, &path)
                    .with_detail(err.to_string())
            })
        }
        None => Err(DeviceError::new(DeviceErrorKind::ConversionFailed, &path)
            .with_detail(format!("slot {} is not mapped", frame.index))),
    };

    let requeued = driver
        .queue_buffer(frame.index)
        .map(|()| {
            pool.mark_queued(frame.index);
        })
        .map_err(|err| DeviceError::io(DeviceErrorKind::RequeueFailed, &path, err));

    let image = converted?;
    requeued?;

    pack_rgb(&image, dst).map_err(|err| {
        DeviceError::new(DeviceErrorKind::PackingFailed, &path).with_detail(err.to_string())
    })
}

/// Capture one frame on a worker thread and return it.
pub fn read<D: VideoDriver>(handle: &mut DeviceHandle<D>) -> Result<RgbFrame> {
    let (width, height) = (handle.width(), handle.height());
    let path = handle.path().to_path_buf();
    let mut data = vec![0u8; handle.frame_len()];

    thread::scope(|scope| scope.spawn(|| acquire(handle, &mut data)).join())
        .map_err(|_| DeviceError::new(DeviceErrorKind::WorkerPanicked, &path))??;

    Ok(RgbFrame {
        width,
        height,
        data,
    })
}

/// Capture `n` consecutive frames, oldest first.
///
/// Stops at the first failure; frames already captured are dropped.
pub fn read_n<D: VideoDriver>(handle: &mut DeviceHandle<D>, n: usize) -> Result<Vec<RgbFrame>> {
    (0..n).map(|_| read(handle)).collect()
}
