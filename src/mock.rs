//! Mock kernel for testing without hardware.
//!
//! A [`MockCamera`] holds the simulated kernel state of one device node and
//! hands out [`MockDriver`]s (open descriptors) onto it. Tests keep the
//! camera to inspect counters after the handle has consumed the driver.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::{DeviceConfig, DeviceHandle};
use crate::error::DeviceError;
use crate::traits::{
    DeviceCapabilities, Dequeued, Format, FormatDescription, FourCC, Fraction,
    FrameIntervalRange, FrameSizeRange, VideoDriver,
};

const EINVAL: i32 = 22;
const ENODEV: i32 = 19;
const ENOMEM: i32 = 12;
const EIO: i32 = 5;
const EAGAIN: i32 = 11;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern (YUYV).
    ColorBars,
    /// Horizontal gradient from dark to light (YUYV).
    Gradient,
    /// Solid color with specified Y, U, V values (YUYV).
    Solid(u8, u8, u8),
    /// Solid color with specified R, G, B values (RGB3).
    Rgb(u8, u8, u8),
}

/// One format the mock advertises, with its sizes and intervals.
#[derive(Debug, Clone)]
pub struct MockFormat {
    /// Format description.
    pub description: FormatDescription,
    /// Sizes and, per size, intervals.
    pub sizes: Vec<(FrameSizeRange, Vec<FrameIntervalRange>)>,
}

/// Simulated kernel state of one device node.
#[derive(Debug)]
pub struct MockKernel {
    pub caps: DeviceCapabilities,
    pub formats: Vec<MockFormat>,
    pub format: Format,
    pub interval: Fraction,
    pub pattern: TestPattern,

    pub grant: Option<u32>,
    pub reported_size: Option<(u32, u32)>,
    pub reported_interval: Option<Fraction>,
    pub fail_map_at: Option<u32>,
    pub fail_dequeue: bool,
    pub fail_queue: bool,
    pub fail_stream_on: bool,
    pub fail_stream_off: bool,

    pub open: bool,
    pub streaming: bool,
    pub buffers: u32,
    pub mapped: usize,
    pub unmap_calls: usize,
    pub queued: VecDeque<u32>,
    pub queue_calls: usize,
    pub dequeue_calls: usize,
    pub sequence: u32,
}

/// Shared handle onto a [`MockKernel`].
#[derive(Debug, Clone)]
pub struct MockCamera {
    path: PathBuf,
    kernel: Arc<Mutex<MockKernel>>,
}

impl MockCamera {
    /// A capture+streaming capable camera advertising 640x480 YUYV at 30
    /// and 15 fps, producing color bars.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let kernel = MockKernel {
            caps: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![MockFormat {
                description: FormatDescription {
                    fourcc: FourCC::YUYV,
                    description: "YUYV 4:2:2".to_owned(),
                    compressed: false,
                    emulated: false,
                },
                sizes: vec![(
                    FrameSizeRange::Discrete {
                        width: 640,
                        height: 480,
                    },
                    vec![
                        FrameIntervalRange::Discrete(Fraction::new(1, 30)),
                        FrameIntervalRange::Discrete(Fraction::new(1, 15)),
                    ],
                )],
            }],
            format: Format::new(640, 480, FourCC::YUYV),
            interval: Fraction::new(1, 30),
            pattern: TestPattern::ColorBars,
            grant: None,
            reported_size: None,
            reported_interval: None,
            fail_map_at: None,
            fail_dequeue: false,
            fail_queue: false,
            fail_stream_on: false,
            fail_stream_off: false,
            open: false,
            streaming: false,
            buffers: 0,
            mapped: 0,
            unmap_calls: 0,
            queued: VecDeque::new(),
            queue_calls: 0,
            dequeue_calls: 0,
            sequence: 0,
        };
        Self {
            path: path.into(),
            kernel: Arc::new(Mutex::new(kernel)),
        }
    }

    fn update(self, f: impl FnOnce(&mut MockKernel)) -> Self {
        f(&mut self.kernel());
        self
    }

    /// Set the frame pattern.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.update(|k| k.pattern = pattern)
    }

    /// Set the capabilities.
    #[must_use]
    pub fn with_capabilities(self, caps: DeviceCapabilities) -> Self {
        self.update(|k| k.caps = caps)
    }

    /// Replace the advertised formats.
    #[must_use]
    pub fn with_formats(self, formats: Vec<MockFormat>) -> Self {
        self.update(|k| k.formats = formats)
    }

    /// Grant exactly `count` buffers regardless of the request.
    #[must_use]
    pub fn granting(self, count: u32) -> Self {
        self.update(|k| k.grant = Some(count))
    }

    /// Report this size back from set-format instead of the request.
    #[must_use]
    pub fn reporting_size(self, width: u32, height: u32) -> Self {
        self.update(|k| k.reported_size = Some((width, height)))
    }

    /// Report this interval back from set-parameters instead of the request.
    #[must_use]
    pub fn reporting_interval(self, interval: Fraction) -> Self {
        self.update(|k| k.reported_interval = Some(interval))
    }

    /// Fail mapping buffer `index`.
    #[must_use]
    pub fn failing_map_at(self, index: u32) -> Self {
        self.update(|k| k.fail_map_at = Some(index))
    }

    /// Fail every queue with `EIO`.
    #[must_use]
    pub fn failing_queue(self) -> Self {
        self.update(|k| k.fail_queue = true)
    }

    /// Fail stream-on with `EIO`.
    #[must_use]
    pub fn failing_stream_on(self) -> Self {
        self.update(|k| k.fail_stream_on = true)
    }

    /// Fail stream-off with `EIO`.
    #[must_use]
    pub fn failing_stream_off(self) -> Self {
        self.update(|k| k.fail_stream_off = true)
    }

    /// Toggle dequeue failure on an existing camera.
    pub fn set_fail_dequeue(&self, fail: bool) {
        self.kernel().fail_dequeue = fail;
    }

    /// Inspect or modify the kernel state.
    pub fn kernel(&self) -> MutexGuard<'_, MockKernel> {
        self.kernel.lock().expect("mock kernel lock poisoned")
    }

    /// Open a descriptor onto this camera.
    pub fn driver(&self) -> MockDriver {
        self.kernel().open = true;
        MockDriver {
            path: self.path.clone(),
            kernel: Arc::clone(&self.kernel),
        }
    }

    /// A closed [`DeviceHandle`] whose opener returns drivers onto this
    /// camera.
    pub fn handle(&self, config: DeviceConfig) -> DeviceHandle<MockDriver> {
        let camera = self.clone();
        DeviceHandle::with_opener(config, move |_path: &Path| -> Result<MockDriver, DeviceError> {
            Ok(camera.driver())
        })
    }
}

/// An open descriptor onto a [`MockCamera`].
#[derive(Debug)]
pub struct MockDriver {
    path: PathBuf,
    kernel: Arc<Mutex<MockKernel>>,
}

impl MockDriver {
    fn kernel(&self) -> MutexGuard<'_, MockKernel> {
        self.kernel.lock().expect("mock kernel lock poisoned")
    }
}

impl VideoDriver for MockDriver {
    type Mapping = Vec<u8>;

    fn path(&self) -> &Path {
        &self.path
    }

    fn capabilities(&self) -> io::Result<DeviceCapabilities> {
        Ok(self.kernel().caps.clone())
    }

    fn formats(&self) -> io::Result<Vec<FormatDescription>> {
        Ok(self
            .kernel()
            .formats
            .iter()
            .map(|f| f.description.clone())
            .collect())
    }

    fn frame_sizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSizeRange>> {
        let kernel = self.kernel();
        let format = kernel
            .formats
            .iter()
            .find(|f| f.description.fourcc == fourcc)
            .ok_or_else(|| io::Error::from_raw_os_error(EINVAL))?;
        Ok(format.sizes.iter().map(|(size, _)| *size).collect())
    }

    fn frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> io::Result<Vec<FrameIntervalRange>> {
        let kernel = self.kernel();
        let format = kernel
            .formats
            .iter()
            .find(|f| f.description.fourcc == fourcc)
            .ok_or_else(|| io::Error::from_raw_os_error(EINVAL))?;
        let intervals = format
            .sizes
            .iter()
            .find(|(size, _)| match *size {
                FrameSizeRange::Discrete { width: w, height: h } => w == width && h == height,
                FrameSizeRange::Stepwise {
                    min_width,
                    max_width,
                    min_height,
                    max_height,
                    ..
                } => {
                    (min_width..=max_width).contains(&width)
                        && (min_height..=max_height).contains(&height)
                }
            })
            .map(|(_, intervals)| intervals.clone())
            .unwrap_or_default();
        Ok(intervals)
    }

    fn set_format(&mut self, format: &Format) -> io::Result<Format> {
        let mut kernel = self.kernel();
        let (width, height) = kernel
            .reported_size
            .unwrap_or((format.width, format.height));
        let bpp = if format.fourcc == FourCC::RGB3 { 3 } else { 2 };
        kernel.format = Format {
            width,
            height,
            fourcc: format.fourcc,
            stride: width * bpp,
            size: width * height * bpp,
        };
        Ok(kernel.format.clone())
    }

    fn set_frame_interval(&mut self, interval: Fraction) -> io::Result<Fraction> {
        let mut kernel = self.kernel();
        kernel.interval = kernel.reported_interval.unwrap_or(interval);
        Ok(kernel.interval)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut kernel = self.kernel();
        kernel.buffers = if count == 0 {
            0
        } else {
            kernel.grant.unwrap_or(count)
        };
        Ok(kernel.buffers)
    }

    fn map_buffer(&mut self, index: u32) -> io::Result<Self::Mapping> {
        let mut kernel = self.kernel();
        if index >= kernel.buffers || kernel.fail_map_at == Some(index) {
            return Err(io::Error::from_raw_os_error(ENOMEM));
        }
        kernel.mapped += 1;
        Ok(generate_test_frame(&kernel.format, kernel.pattern))
    }

    fn unmap_buffer(&mut self, _mapping: Self::Mapping) -> io::Result<()> {
        let mut kernel = self.kernel();
        kernel.unmap_calls += 1;
        kernel.mapped = kernel.mapped.saturating_sub(1);
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut kernel = self.kernel();
        kernel.queue_calls += 1;
        if kernel.fail_queue {
            return Err(io::Error::from_raw_os_error(EIO));
        }
        if index >= kernel.buffers || kernel.queued.contains(&index) {
            return Err(io::Error::from_raw_os_error(EINVAL));
        }
        kernel.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<Dequeued> {
        let mut kernel = self.kernel();
        kernel.dequeue_calls += 1;
        if kernel.fail_dequeue {
            return Err(io::Error::from_raw_os_error(ENODEV));
        }
        if !kernel.streaming {
            return Err(io::Error::from_raw_os_error(EINVAL));
        }
        let index = kernel
            .queued
            .pop_front()
            .ok_or_else(|| io::Error::from_raw_os_error(EAGAIN))?;
        let sequence = kernel.sequence;
        kernel.sequence += 1;
        Ok(Dequeued {
            index,
            bytes_used: kernel.format.size,
            sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut kernel = self.kernel();
        if kernel.fail_stream_on {
            return Err(io::Error::from_raw_os_error(EIO));
        }
        kernel.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut kernel = self.kernel();
        if kernel.fail_stream_off {
            return Err(io::Error::from_raw_os_error(EIO));
        }
        kernel.streaming = false;
        kernel.queued.clear();
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        self.kernel().open = false;
        Ok(())
    }
}

/// Generate test frame data based on pattern.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let (width, height) = (format.width as usize, format.height as usize);

    match pattern {
        TestPattern::ColorBars => yuyv_frame(width, height, |x| {
            let bar_width = (width / 8).max(1);
            COLOR_BARS[(x / bar_width).min(7)]
        }),
        TestPattern::Gradient => yuyv_frame(width, height, |x| {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            (y_val, 128, 128)
        }),
        TestPattern::Solid(y, u, v) => yuyv_frame(width, height, |_| (y, u, v)),
        TestPattern::Rgb(r, g, b) => [r, g, b].repeat(width * height),
    }
}

/// YUYV values for the 8 SMPTE bars: White, Yellow, Cyan, Green, Magenta,
/// Red, Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Build a YUYV frame where each pixel pair takes its color from `color(x)`.
fn yuyv_frame(width: usize, height: usize, color: impl Fn(usize) -> (u8, u8, u8)) -> Vec<u8> {
    let row: Vec<u8> = (0..width.div_ceil(2))
        .flat_map(|pair| {
            let (y, u, v) = color(pair * 2);
            [y, u, y, v]
        })
        .collect();
    row.repeat(height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_creation() {
        let camera = MockCamera::new("mock0");
        let driver = camera.driver();
        let caps = driver.capabilities().expect("caps");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
        assert!(camera.kernel().open);

        driver.close().expect("close");
        assert!(!camera.kernel().open);
    }

    #[test]
    fn test_mock_set_format_reports_override() {
        let camera = MockCamera::new("mock0").reporting_size(320, 240);
        let mut driver = camera.driver();
        let actual = driver
            .set_format(&Format::new(640, 480, FourCC::YUYV))
            .expect("set_format");
        assert_eq!((actual.width, actual.height), (320, 240));
    }

    #[test]
    fn test_mock_queue_dequeue_cycle() {
        let camera = MockCamera::new("mock0");
        let mut driver = camera.driver();
        driver.request_buffers(2).expect("reqbufs");
        driver.queue_buffer(0).expect("queue 0");
        driver.queue_buffer(1).expect("queue 1");
        assert!(driver.queue_buffer(1).is_err(), "double queue");

        assert!(driver.dequeue_buffer().is_err(), "not streaming");
        driver.stream_on().expect("stream on");

        let first = driver.dequeue_buffer().expect("dequeue");
        let second = driver.dequeue_buffer().expect("dequeue");
        assert_eq!((first.index, first.sequence), (0, 0));
        assert_eq!((second.index, second.sequence), (1, 1));
        assert!(driver.dequeue_buffer().is_err(), "queue drained");
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white, last is black.
        assert_eq!(data[0], 235);
        assert_eq!(data[639 * 2], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_solid_and_rgb_patterns() {
        let format = Format::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(&data[..4], &[128, 64, 128, 192]);

        let format = Format::new(4, 2, FourCC::RGB3);
        let data = generate_test_frame(&format, TestPattern::Rgb(1, 2, 3));
        assert_eq!(data.len(), 4 * 2 * 3);
        assert_eq!(&data[..6], &[1, 2, 3, 1, 2, 3]);
    }
}
