//! Capture buffer pool: requests mmap buffers from the driver, maps them and
//! tracks which side (kernel or pipeline) owns each slot.
//!
//! The pool performs no locking. Callers serialize access per device; the
//! [`DeviceHandle`](crate::capture::DeviceHandle) does so through `&mut`.

use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceErrorKind, Result};
use crate::traits::VideoDriver;

/// Number of buffers requested from the driver.
pub const DEFAULT_BUFFER_COUNT: u32 = 5;

/// Fewest buffers streaming capture can run with.
pub const MIN_BUFFER_COUNT: u32 = 2;

/// Which side currently owns a buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Handed to the driver for filling.
    Queued,
    /// Held by the process.
    Dequeued,
}

/// One mapped capture slot.
#[derive(Debug)]
pub struct Buffer<M> {
    index: u32,
    mapping: M,
    state: BufferState,
}

impl<M: AsRef<[u8]>> Buffer<M> {
    /// Slot index as known to the driver.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Mapped bytes.
    pub fn data(&self) -> &[u8] {
        self.mapping.as_ref()
    }

    /// Current owner.
    pub const fn state(&self) -> BufferState {
        self.state
    }
}

/// Ordered collection of mapped capture buffers.
#[derive(Debug)]
pub struct BufferPool<M> {
    granted: u32,
    buffers: Vec<Buffer<M>>,
}

impl<M> Default for BufferPool<M> {
    fn default() -> Self {
        Self {
            granted: 0,
            buffers: Vec::new(),
        }
    }
}

impl<M: AsRef<[u8]> + Send> BufferPool<M> {
    /// Ask the driver for `desired` buffers.
    ///
    /// The driver may grant more; fewer than [`MIN_BUFFER_COUNT`] is
    /// `InsufficientBufferMemory`. Nothing is mapped yet.
    pub fn request<D>(driver: &mut D, desired: u32) -> Result<Self>
    where
        D: VideoDriver<Mapping = M>,
    {
        let granted = driver.request_buffers(desired).map_err(|err| {
            DeviceError::io(DeviceErrorKind::InsufficientBufferMemory, driver.path(), err)
        })?;

        if granted < MIN_BUFFER_COUNT {
            return Err(
                DeviceError::new(DeviceErrorKind::InsufficientBufferMemory, driver.path())
                    .with_detail(format!("driver granted {granted} of {desired} buffers")),
            );
        }

        debug!(device = %driver.path().display(), desired, granted, "buffers granted");
        Ok(Self {
            granted,
            buffers: Vec::with_capacity(granted as usize),
        })
    }

    /// Map every granted buffer.
    ///
    /// On failure, buffers mapped so far are unmapped before the
    /// `MappingFailed` error is returned.
    pub fn map_all<D>(&mut self, driver: &mut D) -> Result<()>
    where
        D: VideoDriver<Mapping = M>,
    {
        for index in 0..self.granted {
            match driver.map_buffer(index) {
                Ok(mapping) => self.buffers.push(Buffer {
                    index,
                    mapping,
                    state: BufferState::Dequeued,
                }),
                Err(err) => {
                    let mapping_err =
                        DeviceError::io(DeviceErrorKind::MappingFailed, driver.path(), err)
                            .with_detail(format!("buffer {index}"));
                    if let Err(release_err) = self.release(driver) {
                        warn!(error = %release_err, "cleanup after failed mapping");
                    }
                    return Err(mapping_err);
                }
            }
        }
        Ok(())
    }

    /// Unmap every buffer and clear the bookkeeping.
    ///
    /// Every buffer is unmapped even if an earlier one fails; the first
    /// error is returned. Calling this on an empty pool is a no-op.
    pub fn release<D>(&mut self, driver: &mut D) -> Result<()>
    where
        D: VideoDriver<Mapping = M>,
    {
        let mut first_err = None;
        for buffer in self.buffers.drain(..) {
            if let Err(err) = driver.unmap_buffer(buffer.mapping) {
                first_err.get_or_insert_with(|| {
                    DeviceError::io(DeviceErrorKind::UnmapFailed, driver.path(), err)
                        .with_detail(format!("buffer {}", buffer.index))
                });
            }
        }
        self.granted = 0;
        first_err.map_or(Ok(()), Err)
    }
}

impl<M: AsRef<[u8]>> BufferPool<M> {
    /// Number of mapped buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are mapped.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Slot `index`, if mapped.
    pub fn get(&self, index: u32) -> Option<&Buffer<M>> {
        self.buffers.get(index as usize)
    }

    /// Iterate over the mapped slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Buffer<M>> {
        self.buffers.iter()
    }

    /// Number of slots currently owned by the driver.
    pub fn queued_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state == BufferState::Queued)
            .count()
    }

    /// Record that slot `index` was handed to the driver.
    ///
    /// Returns `false` if the slot is unknown or already queued.
    pub fn mark_queued(&mut self, index: u32) -> bool {
        self.transition(index, BufferState::Dequeued, BufferState::Queued)
    }

    /// Record that slot `index` came back from the driver.
    ///
    /// Returns `false` if the slot is unknown or not queued, i.e. the slot
    /// would be dequeued twice.
    pub fn mark_dequeued(&mut self, index: u32) -> bool {
        self.transition(index, BufferState::Queued, BufferState::Dequeued)
    }

    /// Mark every slot as held by the process, as after stream-off.
    pub fn reclaim_all(&mut self) {
        for buffer in &mut self.buffers {
            buffer.state = BufferState::Dequeued;
        }
    }

    fn transition(&mut self, index: u32, from: BufferState, to: BufferState) -> bool {
        match self.buffers.get_mut(index as usize) {
            Some(buffer) if buffer.state == from => {
                buffer.state = to;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCamera;

    #[test]
    fn test_request_and_map_all() {
        let camera = MockCamera::new("mock0");
        let mut driver = camera.driver();

        let mut pool = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect("request");
        assert!(pool.is_empty());
        pool.map_all(&mut driver).expect("map_all");

        assert_eq!(pool.len(), 5);
        assert_eq!(camera.kernel().mapped, 5);
        assert!(pool.iter().all(|b| b.state() == BufferState::Dequeued));
        assert!(pool.get(4).is_some_and(|b| !b.data().is_empty()));
    }

    #[test]
    fn test_driver_may_grant_more() {
        let camera = MockCamera::new("mock0").granting(8);
        let mut driver = camera.driver();

        let mut pool = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect("request");
        pool.map_all(&mut driver).expect("map_all");
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn test_single_buffer_is_insufficient() {
        let camera = MockCamera::new("mock0").granting(1);
        let mut driver = camera.driver();

        let err = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect_err("must fail");
        assert_eq!(err.kind(), DeviceErrorKind::InsufficientBufferMemory);
        assert_eq!(camera.kernel().mapped, 0);
    }

    #[test]
    fn test_partial_mapping_failure_unmaps_everything() {
        let camera = MockCamera::new("mock0").failing_map_at(3);
        let mut driver = camera.driver();

        let mut pool = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect("request");
        let err = pool.map_all(&mut driver).expect_err("must fail");

        assert_eq!(err.kind(), DeviceErrorKind::MappingFailed);
        assert!(err.raw_os_error().is_some());
        assert!(pool.is_empty());
        assert_eq!(camera.kernel().mapped, 0);
        assert_eq!(camera.kernel().unmap_calls, 3);

        // Releasing again after the partial failure is harmless.
        pool.release(&mut driver).expect("release is idempotent");
    }

    #[test]
    fn test_release_is_idempotent() {
        let camera = MockCamera::new("mock0");
        let mut driver = camera.driver();

        let mut pool = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect("request");
        pool.map_all(&mut driver).expect("map_all");
        pool.release(&mut driver).expect("release");
        pool.release(&mut driver).expect("second release");

        assert!(pool.is_empty());
        assert_eq!(camera.kernel().mapped, 0);
        assert_eq!(camera.kernel().unmap_calls, 5);
    }

    #[test]
    fn test_slot_cannot_be_dequeued_twice() {
        let camera = MockCamera::new("mock0");
        let mut driver = camera.driver();

        let mut pool = BufferPool::request(&mut driver, DEFAULT_BUFFER_COUNT).expect("request");
        pool.map_all(&mut driver).expect("map_all");

        assert!(!pool.mark_dequeued(0), "fresh slots are already process-owned");
        assert!(pool.mark_queued(0));
        assert!(!pool.mark_queued(0), "already queued");
        assert_eq!(pool.queued_count(), 1);
        assert!(pool.mark_dequeued(0));
        assert!(!pool.mark_dequeued(0), "already dequeued");
        assert!(!pool.mark_queued(42), "unknown slot");

        pool.mark_queued(1);
        pool.mark_queued(2);
        pool.reclaim_all();
        assert_eq!(pool.queued_count(), 0);
    }
}
