//! Mock backend for testing without hardware.
//!
//! Frames are injected synchronously with [`MockBackend::capture`], which
//! runs the session's producer callback on the calling thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureDimensions, DeviceInfo, Format, FourCC,
    FrameMetadata, FrameSink, NativeImage, PixelFormat, Result, YuvRange,
};

/// Filler written into row padding so leaks into output are detectable.
pub const PADDING_BYTE: u8 = 0xEE;

/// Scripted camera exposed by a [`MockBackend`].
#[derive(Debug, Clone)]
pub struct MockCamera {
    name: String,
    dimensions: CaptureDimensions,
    formats: Vec<PixelFormat>,
    frame_rates: Vec<f64>,
    row_padding: usize,
    fail_configure: bool,
}

impl MockCamera {
    /// A camera offering every supported encoding at `width` x `height`.
    #[must_use]
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_owned(),
            dimensions: CaptureDimensions::new(width, height),
            formats: vec![
                PixelFormat::BiPlanar420(YuvRange::Video),
                PixelFormat::BiPlanar420(YuvRange::Full),
                PixelFormat::Argb32,
            ],
            frame_rates: vec![30.0, 15.0],
            row_padding: 0,
            fail_configure: false,
        }
    }

    /// Restrict the encodings the camera offers.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Pad every native row with `bytes` extra bytes.
    #[must_use]
    pub const fn with_row_padding(mut self, bytes: usize) -> Self {
        self.row_padding = bytes;
        self
    }

    /// Set the advertised frame rates.
    #[must_use]
    pub fn with_frame_rates(mut self, frame_rates: Vec<f64>) -> Self {
        self.frame_rates = frame_rates;
        self
    }

    /// Make output configuration fail, as when the output cannot be attached.
    #[must_use]
    pub const fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// 100% colour bars: white, yellow, cyan, green, magenta, red, blue, black.
    ColorBars,
    /// Horizontal grey ramp from black to white.
    Gradient,
    /// Solid colour with the given R, G, B values.
    Solid(u8, u8, u8),
}

/// RGB values of the eight colour bars, left to right.
pub const COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255), // White
    (255, 255, 0),   // Yellow
    (0, 255, 255),   // Cyan
    (0, 255, 0),     // Green
    (255, 0, 255),   // Magenta
    (255, 0, 0),     // Red
    (0, 0, 255),     // Blue
    (0, 0, 0),       // Black
];

impl TestPattern {
    /// Grey level of the gradient at column `x`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn gradient_luma(x: u32, width: u32) -> u8 {
        let span = if width > 1 { width - 1 } else { 1 };
        (x as u64 * 255 / span as u64) as u8
    }

    /// Full-range BT.601 luma of an RGB colour.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn luma(r: u8, g: u8, b: u8) -> u8 {
        ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
    }

    /// Colour of column `x` in a frame `width` pixels wide.
    #[must_use]
    pub fn rgb_at(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar = (u64::from(x) * 8 / u64::from(width.max(1))).min(7);
                COLOR_BARS
                    .get(usize::try_from(bar).unwrap_or(7))
                    .copied()
                    .unwrap_or_default()
            }
            Self::Gradient => {
                let v = Self::gradient_luma(x, width);
                (v, v, v)
            }
            Self::Solid(r, g, b) => (r, g, b),
        }
    }
}

struct CameraSlot {
    camera: MockCamera,
    configured: Option<Format>,
    configure_count: usize,
    sink: Option<FrameSink>,
    sequence: u32,
}

/// In-memory camera backend.
///
/// Clones share the same set of cameras.
#[derive(Clone, Default)]
pub struct MockBackend {
    slots: Arc<Mutex<Vec<CameraSlot>>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("cameras", &self.lock().len())
            .finish()
    }
}

impl MockBackend {
    /// Create a backend with no cameras.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a camera; it is discovered after the existing ones.
    pub fn add_camera(&self, camera: MockCamera) {
        self.lock().push(CameraSlot {
            camera,
            configured: None,
            configure_count: 0,
            sink: None,
            sequence: 0,
        });
    }

    /// Deliver one synthetic frame from the camera called `name`.
    ///
    /// Returns `false` if that camera is not streaming.
    pub fn capture(&self, name: &str, pattern: TestPattern) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.iter_mut().find(|slot| slot.camera.name == name) else {
            return false;
        };
        let Some(format) = slot.configured.clone() else {
            return false;
        };
        let data = generate_test_frame(&format, pattern);
        deliver(slot, &format, format.stride as usize, &data)
    }

    /// Deliver raw native bytes with the given stride from camera `name`.
    ///
    /// Returns `false` if that camera is not streaming.
    pub fn capture_raw(&self, name: &str, stride: usize, data: &[u8]) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.iter_mut().find(|slot| slot.camera.name == name) else {
            return false;
        };
        let Some(format) = slot.configured.clone() else {
            return false;
        };
        deliver(slot, &format, stride, data)
    }

    /// Whether camera `name` currently has a frame sink attached.
    pub fn is_streaming(&self, name: &str) -> bool {
        self.lock()
            .iter()
            .any(|slot| slot.camera.name == name && slot.sink.is_some())
    }

    /// How many times camera `name` has been configured.
    pub fn configure_count(&self, name: &str) -> usize {
        self.lock()
            .iter()
            .find(|slot| slot.camera.name == name)
            .map_or(0, |slot| slot.configure_count)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CameraSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(slot: &mut CameraSlot, format: &Format, stride: usize, data: &[u8]) -> bool {
    let Some(sink) = slot.sink.as_mut() else {
        return false;
    };
    let sequence = slot.sequence;
    slot.sequence = slot.sequence.wrapping_add(1);

    let image = NativeImage {
        pixel_format: format.pixel_format,
        width: format.width,
        height: format.height,
        stride,
        data,
        metadata: FrameMetadata {
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33), // ~30fps
            bytes_used: u32::try_from(data.len()).unwrap_or(u32::MAX),
        },
    };
    sink(&image);
    true
}

fn device_info(index: usize, camera: &MockCamera) -> DeviceInfo {
    DeviceInfo {
        id: format!("mock:{index}"),
        name: camera.name.clone(),
        driver: "mock".to_owned(),
        bus_info: format!("mock:{index}"),
        dimensions: camera.dimensions,
        active_fourcc: FourCC::YUYV,
        frame_rates: camera.frame_rates.clone(),
    }
}

impl CameraBackend for MockBackend {
    type Device = MockDevice;

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .lock()
            .iter()
            .enumerate()
            .map(|(index, slot)| device_info(index, &slot.camera))
            .collect())
    }

    fn open_device(&self, info: &DeviceInfo) -> Result<MockDevice> {
        let index = self
            .enumerate()?
            .iter()
            .position(|candidate| candidate.id == info.id)
            .ok_or_else(|| CameraError::AttachFailed(format!("{} disappeared", info.id)))?;
        Ok(MockDevice {
            info: info.clone(),
            index,
            backend: self.clone(),
        })
    }
}

/// Mock device attached through a [`MockBackend`].
#[derive(Debug)]
pub struct MockDevice {
    info: DeviceInfo,
    index: usize,
    backend: MockBackend,
}

impl MockDevice {
    fn with_slot<T, F: FnOnce(&mut CameraSlot) -> T>(&self, f: F) -> Result<T> {
        let mut slots = self.backend.lock();
        let slot = slots
            .get_mut(self.index)
            .ok_or_else(|| CameraError::StreamError(format!("{} disappeared", self.info.id)))?;
        Ok(f(slot))
    }
}

impl CameraDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        self.with_slot(|slot| slot.camera.formats.clone())
    }

    fn configure(&mut self, pixel_format: PixelFormat) -> Result<Format> {
        self.with_slot(|slot| {
            if slot.camera.fail_configure {
                return Err(CameraError::AttachFailed(
                    "mock output refused configuration".to_owned(),
                ));
            }
            let dims = slot.camera.dimensions;
            let mut format = Format::packed(dims.width, dims.height, pixel_format);
            let padding = u32::try_from(slot.camera.row_padding).unwrap_or_default();
            format.stride += padding;
            format.size = format.stride * dims.height * chroma_factor(pixel_format) / 2;
            slot.configured = Some(format.clone());
            slot.configure_count += 1;
            Ok(format)
        })?
    }

    fn start_streaming(&mut self, sink: FrameSink) -> Result<()> {
        self.with_slot(|slot| {
            if slot.configured.is_none() {
                return Err(CameraError::StreamError("mock not configured".to_owned()));
            }
            slot.sink = Some(sink);
            Ok(())
        })?
    }

    fn stop_streaming(&mut self) {
        let _ = self.with_slot(|slot| slot.sink = None);
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        let _ = self.with_slot(|slot| {
            slot.sink = None;
            slot.configured = None;
        });
    }
}

/// Frame size in half-rows of the first plane: 3 for 4:2:0, 2 for packed.
const fn chroma_factor(pixel_format: PixelFormat) -> u32 {
    match pixel_format {
        PixelFormat::BiPlanar420(_) | PixelFormat::Planar420(_) => 3,
        PixelFormat::Argb32 => 2,
    }
}

/// Generate native frame data for `format` filled with `pattern`.
pub fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let stride = format.stride as usize;
    let mut data = vec![PADDING_BYTE; format.size as usize];

    match format.pixel_format {
        PixelFormat::Argb32 => {
            for row in data.chunks_exact_mut(stride).take(format.height as usize) {
                for (x, px) in (0..format.width).zip(row.chunks_exact_mut(4)) {
                    let (r, g, b) = pattern.rgb_at(x, format.width);
                    px.copy_from_slice(&[0xFF, r, g, b]);
                }
            }
        }
        PixelFormat::BiPlanar420(_) | PixelFormat::Planar420(_) => {
            let luma_len = stride * format.height as usize;
            let (luma, chroma) = data.split_at_mut(luma_len.min(data.len()));
            for row in luma.chunks_exact_mut(stride) {
                for (x, px) in (0..format.width).zip(row.iter_mut()) {
                    let (r, g, b) = pattern.rgb_at(x, format.width);
                    *px = TestPattern::luma(r, g, b);
                }
            }
            chroma.fill(128);
        }
    }

    data
}
