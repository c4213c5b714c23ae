//! Multicam-Capture: synchronized multi-camera V4L2 capture
//!
//! This library negotiates formats with Video4Linux2 capture devices, streams
//! frames through mmap buffers and delivers them as packed RGB, one camera at
//! a time or from several cameras concurrently. Kernel access sits behind the
//! [`VideoDriver`] trait, enabling both production use with real hardware and
//! testing with mock devices.
//!
//! ```no_run
//! use multicam_capture::{read_all_to_vec, DeviceConfig, DeviceHandle, FourCC};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut handles: Vec<DeviceHandle> = ["/dev/video0", "/dev/video2"]
//!     .into_iter()
//!     .map(|path| DeviceHandle::new(DeviceConfig::new(path, 640, 480, FourCC::YUYV, 30.0)))
//!     .collect();
//! for handle in &mut handles {
//!     handle.open()?;
//!     handle.configure()?;
//!     handle.start()?;
//! }
//! let frames = read_all_to_vec(&mut handles)?;
//! assert_eq!(frames.len(), 2 * 640 * 480 * 3);
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod convert;
pub mod device;
pub mod error;
pub mod multicam;
pub mod negotiate;
pub mod pipeline;
pub mod pool;
pub mod sync;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureState, DeviceConfig, DeviceHandle};
pub use device::V4L2Device;
pub use error::{CaptureError, ConfigError, DeviceError, DeviceErrorKind};
pub use multicam::Multicam;
pub use negotiate::{
    enumerate_formats, interval_for_rate, is_valid_device, list_cameras, validate, FormatInfo,
    FrameDescriptor,
};
pub use pipeline::{acquire, read, read_n};
pub use sync::{read_all, read_all_to_vec};
pub use traits::{DeviceCapabilities, FourCC, Fraction, RgbFrame, VideoDriver};
