//! Cam-Bridge: a camera frame acquisition and conversion engine
//!
//! This library resolves a capture device, negotiates a hardware pixel
//! encoding for the requested colour space, converts every captured image
//! into a tightly packed greyscale or RGB frame, and hands the latest frame
//! to a polling consumer. The V4L2 backend drives real hardware; the mock
//! backend drives tests.

pub mod catalog;
pub mod config;
pub mod convert;
pub mod device;
pub mod handoff;
pub mod negotiate;
pub mod registry;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use catalog::DeviceCatalog;
pub use config::{CaptureConfig, DeviceQuery};
pub use convert::{ConvertError, FrameConverter};
pub use device::{V4l2Backend, V4l2Device};
pub use handoff::{FrameBuffer, FrameHandoff};
pub use registry::{Handle, Registry};
pub use session::{CaptureSession, SessionState};
pub use traits::{
    CameraBackend, CameraDevice, CameraError, CaptureDimensions, ColorSpace, DeviceInfo, Format,
    FourCC, FrameMetadata, FrameSink, NativeImage, PixelFormat, YuvRange,
};
