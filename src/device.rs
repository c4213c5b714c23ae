//! V4L2 device implementation using the v4l crate.
//!
//! Query, format and parameter ioctls go through the v4l crate's safe
//! wrappers. Buffer management (REQBUFS, QUERYBUF, QBUF, DQBUF, STREAMON,
//! STREAMOFF) is issued directly so the buffer pool can own the mappings.

#![allow(unsafe_code)]

use std::fs::{self, OpenOptions};
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::os::raw::{c_int, c_void};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use v4l::buffer::Type;
use v4l::capability::Flags as CapabilityFlags;
use v4l::format::description::Flags as DescriptionFlags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::memory::Memory;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{v4l2_buffer, v4l2_capability, v4l2_requestbuffers};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::error::{DeviceError, DeviceErrorKind, Result};
use crate::traits::{
    DeviceCapabilities, Dequeued, Format, FormatDescription, FourCC, Fraction,
    FrameIntervalRange, FrameSizeRange, VideoDriver,
};

/// A buffer mapped into the process with `mmap`.
///
/// Released through [`VideoDriver::unmap_buffer`]; dropping it without
/// doing so leaks the mapping until the process exits.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain shared memory owned by exactly one buffer
// pool slot; moving it between threads does not alias it.
unsafe impl Send for MmapRegion {}

impl AsRef<[u8]> for MmapRegion {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: `ptr` came from a successful mmap of `len` bytes that stays
        // mapped until the region is consumed by `unmap_buffer`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    path: PathBuf,
}

impl std::fmt::Debug for V4L2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4L2Device")
            .field("path", &self.path)
            .field("fd", &self.fd())
            .finish()
    }
}

impl V4L2Device {
    /// Open the character device at `path` read-write.
    pub fn open(path: &Path) -> Result<Self> {
        check_char_device(path)?;
        let device = Device::with_path(path)
            .map_err(|err| DeviceError::io(DeviceErrorKind::OpenFailed, path, err))?;

        Ok(Self {
            device,
            path: path.to_path_buf(),
        })
    }

    /// Query the capabilities of `path` through a read-only descriptor.
    ///
    /// Only QUERYCAP is issued; the descriptor is closed before returning.
    pub fn probe(path: &Path) -> Result<DeviceCapabilities> {
        check_char_device(path)?;
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|err| DeviceError::io(DeviceErrorKind::OpenFailed, path, err))?;

        // SAFETY: v4l2_capability is a plain C struct; all-zero is a valid value.
        let mut raw: v4l2_capability = unsafe { mem::zeroed() };
        // SAFETY: QUERYCAP fills exactly one v4l2_capability, which outlives
        // the call.
        unsafe {
            v4l::v4l2::ioctl(
                file.as_raw_fd(),
                vidioc::VIDIOC_QUERYCAP,
                ptr::from_mut(&mut raw).cast::<c_void>(),
            )
        }
        .map_err(|err| DeviceError::io(DeviceErrorKind::NotADevice, path, err))?;

        let flags = CapabilityFlags::from_bits_truncate(raw.capabilities);
        Ok(DeviceCapabilities {
            driver: c_string(&raw.driver),
            card: c_string(&raw.card),
            bus_info: c_string(&raw.bus_info),
            can_capture: flags.contains(CapabilityFlags::VIDEO_CAPTURE),
            can_stream: flags.contains(CapabilityFlags::STREAMING),
        })
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    /// Issue `request` with `arg` on this descriptor.
    fn ioctl<T>(&self, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
        // SAFETY: `arg` is the exact structure `request` expects and lives
        // for the duration of the call.
        unsafe { v4l::v4l2::ioctl(self.fd(), request, ptr::from_mut(arg).cast::<c_void>()) }
    }

    fn buffer(index: u32) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is a plain C struct; all-zero is a valid value.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.index = index;
        buf.type_ = Type::VideoCapture as u32;
        buf.memory = Memory::Mmap as u32;
        buf
    }

    fn wait_readable(&self) -> io::Result<()> {
        let mut pfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd, no timeout.
        if unsafe { libc::poll(&mut pfd, 1, -1) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn stream_ioctl(&self, request: vidioc::_IOC_TYPE) -> io::Result<()> {
        let mut typ = Type::VideoCapture as c_int;
        self.ioctl(request, &mut typ)
    }
}

fn check_char_device(path: &Path) -> Result<()> {
    let metadata =
        fs::metadata(path).map_err(|err| DeviceError::io(DeviceErrorKind::OpenFailed, path, err))?;
    if !metadata.file_type().is_char_device() {
        return Err(DeviceError::new(DeviceErrorKind::NotADevice, path)
            .with_detail("not a character device"));
    }
    Ok(())
}

/// A NUL-terminated fixed-size field as a string.
fn c_string(bytes: &[u8]) -> String {
    let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(text).into_owned()
}

impl VideoDriver for V4L2Device {
    type Mapping = MmapRegion;

    fn path(&self) -> &Path {
        &self.path
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device.query_caps()?;
        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(CapabilityFlags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(CapabilityFlags::STREAMING),
        })
    }

    fn formats(&self) -> io::Result<Vec<FormatDescription>> {
        Ok(self
            .device
            .enum_formats()?
            .into_iter()
            .map(|desc| FormatDescription {
                fourcc: desc.fourcc.into(),
                description: desc.description,
                compressed: desc.flags.contains(DescriptionFlags::COMPRESSED),
                emulated: desc.flags.contains(DescriptionFlags::EMULATED),
            })
            .collect())
    }

    fn frame_sizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSizeRange>> {
        Ok(self
            .device
            .enum_framesizes(fourcc.into())?
            .into_iter()
            .map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => FrameSizeRange::Discrete {
                    width: d.width,
                    height: d.height,
                },
                FrameSizeEnum::Stepwise(s) => FrameSizeRange::Stepwise {
                    min_width: s.min_width,
                    max_width: s.max_width,
                    step_width: s.step_width,
                    min_height: s.min_height,
                    max_height: s.max_height,
                    step_height: s.step_height,
                },
            })
            .collect())
    }

    fn frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameIntervalRange>> {
        Ok(self
            .device
            .enum_frameintervals(fourcc.into(), width, height)?
            .into_iter()
            .map(|interval| match interval.interval {
                FrameIntervalEnum::Discrete(frac) => FrameIntervalRange::Discrete(frac.into()),
                FrameIntervalEnum::Stepwise(s) => FrameIntervalRange::Stepwise {
                    min: s.min.into(),
                    max: s.max.into(),
                    step: s.step.into(),
                },
            })
            .collect())
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut fmt = self.device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self.device.set_format(&fmt)?;
        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> io::Result<Fraction> {
        let params = self.device.set_params(&Parameters::new(interval.into()))?;
        Ok(params.interval.into())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        // SAFETY: v4l2_requestbuffers is a plain C struct; all-zero is valid.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = Memory::Mmap as u32;
        self.ioctl(vidioc::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<MmapRegion> {
        let mut buf = Self::buffer(index);
        self.ioctl(vidioc::VIDIOC_QUERYBUF, &mut buf)?;

        // SAFETY: QUERYBUF on an MMAP buffer fills the `offset` member.
        let offset = unsafe { buf.m.offset };
        let len = buf.length as usize;
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))?;

        // SAFETY: maps `len` bytes of the driver's buffer at the offset it
        // reported; failure is checked below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd(),
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOMEM))?;
        Ok(MmapRegion { ptr, len })
    }

    fn unmap_buffer(&mut self, mapping: MmapRegion) -> io::Result<()> {
        // SAFETY: the region came from `map_buffer` and is consumed here, so
        // no slice into it outlives the unmap.
        if unsafe { libc::munmap(mapping.ptr.as_ptr().cast::<c_void>(), mapping.len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer(index);
        self.ioctl(vidioc::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        // The v4l crate opens descriptors non-blocking.
        self.wait_readable()?;
        let mut buf = Self::buffer(0);
        self.ioctl(vidioc::VIDIOC_DQBUF, &mut buf)?;
        Ok(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMON)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.stream_ioctl(vidioc::VIDIOC_STREAMOFF)
    }

    fn close(self) -> io::Result<()> {
        drop(self.device);
        Ok(())
    }
}
