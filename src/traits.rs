//! Core traits and types for the camera bridge.

use std::fmt;
use std::time::Duration;

use crate::config::DeviceQuery;

/// Colour space requested by the consumer.
///
/// Determines the layout of the destination buffer, independent of the
/// camera's native wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    /// Single 8-bit luma channel.
    Greyscale,
    /// Three 8-bit channels, packed R, G, B.
    #[default]
    Rgb,
}

impl ColorSpace {
    /// Number of bytes per destination pixel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Greyscale => 1,
            Self::Rgb => 3,
        }
    }
}

impl TryFrom<i32> for ColorSpace {
    type Error = CameraError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Greyscale),
            1 => Ok(Self::Rgb),
            other => Err(CameraError::UnknownColorSpace(other)),
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greyscale => f.write_str("greyscale"),
            Self::Rgb => f.write_str("rgb"),
        }
    }
}

/// Native capture dimensions, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureDimensions {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl CaptureDimensions {
    /// Create a new dimensions pair.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in one frame.
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of a tightly packed destination frame in `color_space`.
    #[must_use]
    pub const fn packed_len(self, color_space: ColorSpace) -> usize {
        self.pixel_count() * color_space.channels()
    }
}

impl fmt::Display for CaptureDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel format representation (e.g., NV12, YU12, BA24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// NV12: 4:2:0 biplanar, Y plane followed by interleaved CbCr.
    pub const NV12: Self = Self::new(b"NV12");
    /// YU12: 4:2:0 planar, Y then Cb then Cr.
    pub const YU12: Self = Self::new(b"YU12");
    /// BA24: 32-bit ARGB, memory order A, R, G, B.
    pub const ARGB32: Self = Self::new(b"BA24");
    /// YUYV: 4:2:2 packed.
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPG: Motion JPEG.
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(code) => f.write_str(code),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Quantization range of a luma/chroma encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YuvRange {
    /// Luma in 16..=235, chroma in 16..=240.
    Video,
    /// Luma and chroma in 0..=255.
    Full,
}

/// Hardware pixel encodings the engine knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4:2:0 biplanar: one luma plane, one interleaved chroma plane.
    BiPlanar420(YuvRange),
    /// 4:2:0 planar: one luma plane, two chroma planes.
    Planar420(YuvRange),
    /// Packed 32-bit, byte order alpha, red, green, blue.
    Argb32,
}

impl PixelFormat {
    /// FourCC used to request this encoding from the driver.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::BiPlanar420(_) => FourCC::NV12,
            Self::Planar420(_) => FourCC::YU12,
            Self::Argb32 => FourCC::ARGB32,
        }
    }

    /// Bytes per pixel of the first (or only) plane.
    #[must_use]
    pub const fn primary_bytes_per_pixel(self) -> usize {
        match self {
            Self::BiPlanar420(_) | Self::Planar420(_) => 1,
            Self::Argb32 => 4,
        }
    }

    /// Whether the first plane holds luma samples.
    #[must_use]
    pub const fn has_luma_plane(self) -> bool {
        matches!(self, Self::BiPlanar420(_) | Self::Planar420(_))
    }

    /// Quantization range for luma/chroma encodings.
    #[must_use]
    pub const fn range(self) -> Option<YuvRange> {
        match self {
            Self::BiPlanar420(range) | Self::Planar420(range) => Some(range),
            Self::Argb32 => None,
        }
    }

    /// Encodings offered by a driver that advertises `fourcc`.
    ///
    /// V4L2 carries the quantization range outside the FourCC, so one
    /// NV12 entry yields both range variants.
    #[must_use]
    pub fn from_fourcc(fourcc: FourCC) -> Vec<Self> {
        match fourcc {
            FourCC::NV12 => vec![
                Self::BiPlanar420(YuvRange::Video),
                Self::BiPlanar420(YuvRange::Full),
            ],
            FourCC::YU12 => vec![Self::Planar420(YuvRange::Video)],
            FourCC::ARGB32 => vec![Self::Argb32],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BiPlanar420(YuvRange::Video) => f.write_str("420YpCbCr8BiPlanarVideoRange"),
            Self::BiPlanar420(YuvRange::Full) => f.write_str("420YpCbCr8BiPlanarFullRange"),
            Self::Planar420(YuvRange::Video) => f.write_str("420YpCbCr8Planar"),
            Self::Planar420(YuvRange::Full) => f.write_str("420YpCbCr8PlanarFullRange"),
            Self::Argb32 => f.write_str("32ARGB"),
        }
    }
}

/// Video format reported by the driver after configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Negotiated encoding.
    pub pixel_format: PixelFormat,
    /// Bytes per line of the first plane (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a format with no row padding.
    #[must_use]
    pub const fn packed(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let stride = width * pixel_format.primary_bytes_per_pixel() as u32;
        let size = match pixel_format {
            PixelFormat::BiPlanar420(_) | PixelFormat::Planar420(_) => stride * height * 3 / 2,
            PixelFormat::Argb32 => stride * height,
        };
        Self {
            width,
            height,
            pixel_format,
            stride,
            size,
        }
    }

    /// Dimensions of this format.
    #[must_use]
    pub const fn dimensions(&self) -> CaptureDimensions {
        CaptureDimensions::new(self.width, self.height)
    }
}

/// Snapshot of a capture device, taken when the catalog enumerates it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Stable identity (device node path for V4L2).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Driver name.
    pub driver: String,
    /// Bus information.
    pub bus_info: String,
    /// Dimensions of the device's active format.
    pub dimensions: CaptureDimensions,
    /// Native encoding of the active format.
    pub active_fourcc: FourCC,
    /// Frame rates supported by the active format, in frames per second.
    pub frame_rates: Vec<f64>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), format {} {}, frame rates {{ ",
            self.name, self.id, self.active_fourcc, self.dimensions
        )?;
        for (idx, rate) in self.frame_rates.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{rate:.2}")?;
        }
        f.write_str(" } fps")
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// One captured image in the device's native encoding.
///
/// Borrowed from the driver for the duration of a single producer call.
#[derive(Debug, Clone, Copy)]
pub struct NativeImage<'a> {
    /// Encoding of `data`.
    pub pixel_format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row of the first plane; may exceed the packed row length.
    pub stride: usize,
    /// Raw image bytes, first plane at offset zero.
    pub data: &'a [u8],
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Producer callback invoked once per captured image.
///
/// Invocations for one device never overlap.
pub type FrameSink = Box<dyn FnMut(&NativeImage<'_>) + Send>;

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No device matched the selection query.
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceQuery),
    /// No capture devices are present at all.
    #[error("No capture devices found")]
    NoDevices,
    /// The device cannot deliver any encoding usable for the colour space.
    #[error("No supported pixel format for {0} capture")]
    FormatNotSupported(ColorSpace),
    /// Attaching the device input or the frame output failed.
    #[error("Failed to attach capture device: {0}")]
    AttachFailed(String),
    /// Error while starting or running the stream.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation is not valid in the session's current state.
    #[error("Cannot {operation} a session in state {state:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: crate::session::SessionState,
    },
    /// Destination buffer does not match `width * height * channels`.
    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },
    /// Handle is unknown or was already destroyed.
    #[error("Unknown session handle {0}")]
    UnknownHandle(u64),
    /// Raw colour space code is not recognised.
    #[error("Unknown color space code {0}")]
    UnknownColorSpace(i32),
    /// Captured frame does not show the expected test pattern.
    #[error("Frame validation failed: {0}")]
    ValidationFailed(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Source of capture devices.
pub trait CameraBackend {
    /// Device type produced by `open_device`.
    type Device: CameraDevice;

    /// List capture devices in discovery order.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>>;

    /// Attach to the device described by `info`.
    fn open_device(&self, info: &DeviceInfo) -> Result<Self::Device>;
}

/// Abstraction over an attached camera device.
pub trait CameraDevice: Send {
    /// Snapshot taken at enumeration time.
    fn info(&self) -> &DeviceInfo;

    /// Encodings the device can deliver at its active size.
    fn supported_formats(&self) -> Result<Vec<PixelFormat>>;

    /// Configure the output encoding. Returns the format set by the driver.
    fn configure(&mut self, pixel_format: PixelFormat) -> Result<Format>;

    /// Begin streaming; `sink` runs once per captured image.
    ///
    /// Must not wait for the first frame.
    fn start_streaming(&mut self, sink: FrameSink) -> Result<()>;

    /// Cancel streaming. Idempotent and non-blocking.
    fn stop_streaming(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_space_codes() {
        assert_eq!(ColorSpace::try_from(0).ok(), Some(ColorSpace::Greyscale));
        assert_eq!(ColorSpace::try_from(1).ok(), Some(ColorSpace::Rgb));
        assert!(matches!(
            ColorSpace::try_from(2),
            Err(CameraError::UnknownColorSpace(2))
        ));
        assert_eq!(ColorSpace::default(), ColorSpace::Rgb);
    }

    #[test]
    fn test_packed_len() {
        let dims = CaptureDimensions::new(1280, 720);
        assert_eq!(dims.packed_len(ColorSpace::Greyscale), 1280 * 720);
        assert_eq!(dims.packed_len(ColorSpace::Rgb), 1280 * 720 * 3);
        assert_eq!(dims.to_string(), "1280x720");
    }

    #[test]
    fn test_fourcc_v4l_conversion() {
        let fourcc = FourCC::from(v4l::FourCC::new(b"NV12"));
        assert_eq!(fourcc, FourCC::NV12);
        assert_eq!(v4l::FourCC::from(FourCC::ARGB32).repr, *b"BA24");
        assert_eq!(FourCC::YU12.to_string(), "YU12");
    }

    #[test]
    fn test_pixel_formats_from_fourcc() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::NV12),
            vec![
                PixelFormat::BiPlanar420(YuvRange::Video),
                PixelFormat::BiPlanar420(YuvRange::Full)
            ]
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::ARGB32), vec![PixelFormat::Argb32]);
        assert!(PixelFormat::from_fourcc(FourCC::MJPG).is_empty());
    }

    #[test]
    fn test_packed_format_sizes() {
        let nv12 = Format::packed(640, 480, PixelFormat::BiPlanar420(YuvRange::Video));
        assert_eq!((nv12.stride, nv12.size), (640, 640 * 480 * 3 / 2));

        let argb = Format::packed(640, 480, PixelFormat::Argb32);
        assert_eq!((argb.stride, argb.size), (2560, 2560 * 480));
        assert_eq!(argb.dimensions(), CaptureDimensions::new(640, 480));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(
            PixelFormat::BiPlanar420(YuvRange::Full).to_string(),
            "420YpCbCr8BiPlanarFullRange"
        );
        assert_eq!(PixelFormat::Argb32.to_string(), "32ARGB");

        let info = DeviceInfo {
            id: "/dev/video0".to_owned(),
            name: "Webcam".to_owned(),
            driver: "uvcvideo".to_owned(),
            bus_info: "usb-1".to_owned(),
            dimensions: CaptureDimensions::new(1280, 720),
            active_fourcc: FourCC::YUYV,
            frame_rates: vec![30.0, 15.0],
        };
        assert_eq!(
            info.to_string(),
            "Webcam (/dev/video0), format YUYV 1280x720, frame rates { 30.00 15.00 } fps"
        );
    }
}
