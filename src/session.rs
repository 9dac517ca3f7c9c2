//! Capture session lifecycle.
//!
//! ```text
//! Unopened --open--> Opened --start--> Running --stop--> Stopped
//!                      |                                   |  ^
//!                      |                                   |  +--start/resume-- (Running)
//!                      +-----------release-----------------+--> Released
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::DeviceCatalog;
use crate::config::CaptureConfig;
use crate::convert::FrameConverter;
use crate::handoff::{FrameBuffer, FrameHandoff};
use crate::negotiate::negotiate;
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureDimensions, ColorSpace, DeviceInfo, Format,
    FrameSink, NativeImage, Result,
};

/// Lifecycle state of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no device attached.
    Unopened,
    /// Device attached and format negotiated.
    Opened,
    /// Streaming into the bound buffer.
    Running,
    /// Streaming halted; may be restarted.
    Stopped,
    /// Torn down; the session is unusable.
    Released,
}

/// One camera bound to one frame-delivery pipeline.
pub struct CaptureSession<B: CameraBackend> {
    backend: B,
    config: CaptureConfig,
    state: SessionState,
    device: Option<B::Device>,
    format: Option<Format>,
    color_space: ColorSpace,
    handoff: Arc<FrameHandoff>,
    owns_buffer: bool,
}

impl<B: CameraBackend> std::fmt::Debug for CaptureSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("format", &self.format)
            .field("color_space", &self.color_space)
            .field("owns_buffer", &self.owns_buffer)
            .finish_non_exhaustive()
    }
}

impl<B: CameraBackend> CaptureSession<B> {
    /// Create an unopened session.
    pub fn new(backend: B, config: CaptureConfig) -> Self {
        let color_space = config.color_space();
        Self {
            backend,
            config,
            state: SessionState::Unopened,
            device: None,
            format: None,
            color_space,
            handoff: Arc::new(FrameHandoff::new()),
            owns_buffer: false,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Colour space frames are delivered in.
    pub const fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Native capture dimensions, known once opened.
    pub fn dimensions(&self) -> Option<CaptureDimensions> {
        self.format.as_ref().map(Format::dimensions)
    }

    /// Format negotiated with the device, known once opened.
    pub const fn format(&self) -> Option<&Format> {
        self.format.as_ref()
    }

    /// Device the session is attached to.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device.as_ref().map(CameraDevice::info)
    }

    /// Required destination buffer length, known once opened.
    pub fn frame_len(&self) -> Option<usize> {
        self.dimensions()
            .map(|dims| dims.packed_len(self.color_space))
    }

    /// Currently bound destination buffer.
    pub fn buffer(&self) -> Option<FrameBuffer> {
        self.handoff.buffer()
    }

    /// Shared hand-off, for polling availability without borrowing the session.
    pub fn handoff(&self) -> Arc<FrameHandoff> {
        Arc::clone(&self.handoff)
    }

    /// Resolve the device, negotiate an encoding and attach.
    ///
    /// On failure the session stays `Unopened` and may be opened again.
    pub fn open(&mut self, color_space: ColorSpace) -> Result<CaptureDimensions> {
        self.expect_state("open", &[SessionState::Unopened])?;

        let info = DeviceCatalog::new(&self.backend).resolve(self.config.query())?;
        let mut device = self.backend.open_device(&info)?;
        let available = device.supported_formats()?;
        let pixel_format = negotiate(color_space, &available)?;
        let format = device.configure(pixel_format)?;
        let dimensions = format.dimensions();

        info!(
            device = %info,
            %color_space,
            format = %format.pixel_format,
            %dimensions,
            "capture session opened"
        );

        self.device = Some(device);
        self.format = Some(format);
        self.color_space = color_space;
        self.state = SessionState::Opened;
        Ok(dimensions)
    }

    /// Bind `buffer` and begin streaming into it.
    ///
    /// `buffer` must hold exactly `width * height * channels` bytes. Does not
    /// wait for the first frame.
    pub fn start(&mut self, buffer: FrameBuffer) -> Result<()> {
        self.expect_state("start", &[SessionState::Opened, SessionState::Stopped])?;
        let expected = self.frame_len().unwrap_or_default();
        if buffer.len() != expected {
            return Err(CameraError::BufferSizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        let previous = self.handoff.buffer();
        let epoch = self.handoff.bind(buffer);
        if let Err(err) = self.begin_streaming(epoch) {
            self.restore_binding(previous);
            return Err(err);
        }
        self.owns_buffer = false;
        Ok(())
    }

    /// Allocate an engine-owned destination and begin streaming into it.
    ///
    /// The returned handle shares the storage; the engine drops its
    /// reference at release.
    pub fn start_owned(&mut self) -> Result<FrameBuffer> {
        self.expect_state("start", &[SessionState::Opened, SessionState::Stopped])?;
        let buffer = FrameBuffer::new(self.frame_len().unwrap_or_default());
        self.start(buffer.clone())?;
        self.owns_buffer = true;
        Ok(buffer)
    }

    /// Restart a stopped session into the buffer bound by the last `start`.
    pub fn resume(&mut self) -> Result<()> {
        self.expect_state("resume", &[SessionState::Stopped])?;
        let Some(epoch) = self.handoff.resume() else {
            return Err(CameraError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        };
        if let Err(err) = self.begin_streaming(epoch) {
            self.handoff.halt();
            return Err(err);
        }
        Ok(())
    }

    /// Halt streaming. Idempotent; a no-op unless running.
    ///
    /// Once this returns, no further frame is signalled available.
    pub fn stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.handoff.halt();
        if let Some(device) = self.device.as_mut() {
            device.stop_streaming();
        }
        self.state = SessionState::Stopped;
        info!("capture session stopped");
    }

    /// Stop if running, detach the device and drop any engine-owned buffer.
    ///
    /// Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.state == SessionState::Released {
            return;
        }
        self.stop();
        if self.handoff.unbind().is_some() && self.owns_buffer {
            debug!("released engine-owned frame buffer");
        }
        self.owns_buffer = false;
        self.device = None;
        self.state = SessionState::Released;
        info!("capture session released");
    }

    /// Whether a converted, unconsumed frame is waiting in the buffer.
    pub fn is_available(&self) -> bool {
        self.handoff.is_available()
    }

    /// Acknowledge the current frame.
    pub fn mark_consumed(&self) {
        self.handoff.mark_consumed();
    }

    fn begin_streaming(&mut self, epoch: u64) -> Result<()> {
        let Some(format) = self.format.as_ref() else {
            return Err(CameraError::InvalidState {
                operation: "start",
                state: self.state,
            });
        };
        let sink = frame_sink(
            FrameConverter::new(self.color_space, format.dimensions()),
            Arc::clone(&self.handoff),
            epoch,
        );
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::InvalidState {
                operation: "start",
                state: self.state,
            });
        };
        device.start_streaming(sink)?;
        self.state = SessionState::Running;
        info!("capture session started");
        Ok(())
    }

    fn restore_binding(&self, previous: Option<FrameBuffer>) {
        match previous {
            Some(buffer) => {
                self.handoff.bind(buffer);
                self.handoff.halt();
            }
            None => {
                self.handoff.unbind();
            }
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CameraError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl<B: CameraBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build the producer callback: convert into a private scratch buffer, then
/// publish in one step under `epoch`. Failed conversions are dropped without
/// a signal.
fn frame_sink(converter: FrameConverter, handoff: Arc<FrameHandoff>, epoch: u64) -> FrameSink {
    let mut scratch = vec![0u8; converter.output_len()];
    Box::new(move |image: &NativeImage<'_>| {
        if converter.convert(image, &mut scratch).is_ok() {
            handoff.publish(epoch, &scratch);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceQuery;
    use crate::mock::{MockBackend, MockCamera, TestPattern};
    use crate::traits::{PixelFormat, YuvRange};

    fn session_for(backend: &MockBackend, query: DeviceQuery) -> CaptureSession<MockBackend> {
        CaptureSession::new(backend.clone(), CaptureConfig::default().with_query(query))
    }

    #[test]
    fn test_open_reports_native_dimensions() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("HD Camera", 1280, 720));

        let mut session = session_for(&backend, DeviceQuery::Index(0));
        let dims = session.open(ColorSpace::Rgb).expect("open should succeed");

        assert_eq!(dims, CaptureDimensions::new(1280, 720));
        assert_eq!(session.state(), SessionState::Opened);
        assert_eq!(session.frame_len(), Some(1280 * 720 * 3));
        assert_eq!(
            session.format().map(|format| format.pixel_format),
            Some(PixelFormat::Argb32)
        );
    }

    #[test]
    fn test_out_of_range_index_leaves_session_unopened() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Only Camera", 640, 480));

        let mut session = session_for(&backend, DeviceQuery::Index(5));
        let result = session.open(ColorSpace::Rgb);
        assert!(matches!(result, Err(CameraError::DeviceNotFound(_))));
        assert_eq!(session.state(), SessionState::Unopened);
        assert_eq!(session.dimensions(), None);

        let mut session = session_for(&backend, DeviceQuery::Index(0));
        let dims = session.open(ColorSpace::Rgb).expect("open should succeed");
        assert_eq!(dims, CaptureDimensions::new(640, 480));
    }

    #[test]
    fn test_attach_failure_rolls_back() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Broken", 640, 480).failing_configure());

        let mut session = session_for(&backend, DeviceQuery::Default);
        let result = session.open(ColorSpace::Rgb);
        assert!(matches!(result, Err(CameraError::AttachFailed(_))));
        assert_eq!(session.state(), SessionState::Unopened);
        assert!(session.device_info().is_none());
    }

    #[test]
    fn test_unsupported_format_fails_open() {
        let backend = MockBackend::new();
        backend.add_camera(
            MockCamera::new("Greyscale Only", 640, 480)
                .with_formats(vec![PixelFormat::BiPlanar420(YuvRange::Video)]),
        );

        let mut session = session_for(&backend, DeviceQuery::Default);
        let result = session.open(ColorSpace::Rgb);
        assert!(matches!(
            result,
            Err(CameraError::FormatNotSupported(ColorSpace::Rgb))
        ));
        assert_eq!(session.state(), SessionState::Unopened);

        session
            .open(ColorSpace::Greyscale)
            .expect("greyscale open should succeed");
    }

    #[test]
    fn test_start_before_open_is_rejected() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 4, 4));
        let mut session = session_for(&backend, DeviceQuery::Default);

        let result = session.start(FrameBuffer::new(48));
        assert!(matches!(
            result,
            Err(CameraError::InvalidState {
                operation: "start",
                state: SessionState::Unopened
            })
        ));
    }

    #[test]
    fn test_start_rejects_wrong_buffer_size() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 4, 4));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");

        let result = session.start(FrameBuffer::new(47));
        assert!(matches!(
            result,
            Err(CameraError::BufferSizeMismatch {
                expected: 48,
                actual: 47
            })
        ));
        assert_eq!(session.state(), SessionState::Opened);
    }

    #[test]
    fn test_rgb_capture_cycle() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("HD Camera", 1280, 720).with_row_padding(64));
        let mut session = session_for(&backend, DeviceQuery::Index(0));
        session.open(ColorSpace::Rgb).expect("open should succeed");

        let buffer = FrameBuffer::new(1280 * 720 * 3);
        session.start(buffer.clone()).expect("start should succeed");
        assert_eq!(session.state(), SessionState::Running);
        assert!(!session.is_available());

        assert!(backend.capture("HD Camera", TestPattern::Solid(10, 20, 30)));
        assert!(session.is_available());
        let frame = buffer.to_vec();
        assert_eq!(frame.len(), 1280 * 720 * 3);
        assert!(frame.chunks_exact(3).all(|px| px == [10, 20, 30]));

        session.mark_consumed();
        assert!(!session.is_available());
    }

    #[test]
    fn test_greyscale_capture_matches_luma_plane() {
        let backend = MockBackend::new();
        backend.add_camera(
            MockCamera::new("Mono", 64, 16)
                .with_formats(vec![PixelFormat::BiPlanar420(YuvRange::Full)])
                .with_row_padding(16),
        );
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Greyscale).expect("open should succeed");
        let buffer = session.start_owned().expect("start should succeed");

        assert!(backend.capture("Mono", TestPattern::Gradient));
        assert!(session.is_available());

        let frame = buffer.to_vec();
        assert_eq!(frame.len(), 64 * 16);
        let expected: Vec<u8> = (0..16u32)
            .flat_map(|_| (0..64u32).map(|x| TestPattern::gradient_luma(x, 64)))
            .collect();
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_malformed_frame_is_dropped_silently() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 4, 2));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");
        let buffer = FrameBuffer::from_vec(vec![0x55; 24]);
        session.start(buffer.clone()).expect("start should succeed");

        assert!(backend.capture_raw("Camera", 16, &[0u8; 20]));
        assert!(!session.is_available());
        assert_eq!(buffer.to_vec(), vec![0x55; 24]);

        assert!(backend.capture("Camera", TestPattern::Solid(1, 2, 3)));
        assert!(session.is_available());
    }

    #[test]
    fn test_stop_discards_frames_and_resume_reuses_buffer() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 2, 2));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");
        let buffer = FrameBuffer::new(12);
        session.start(buffer.clone()).expect("start should succeed");

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!backend.capture("Camera", TestPattern::Solid(9, 9, 9)));
        assert!(!session.is_available());

        session.resume().expect("resume should succeed");
        assert!(session.buffer().is_some_and(|bound| bound.shares_storage(&buffer)));
        assert_eq!(backend.configure_count("Camera"), 1);
        assert!(backend.capture("Camera", TestPattern::Solid(4, 5, 6)));
        assert!(session.is_available());
        assert_eq!(buffer.to_vec(), vec![4, 5, 6, 4, 5, 6, 4, 5, 6, 4, 5, 6]);
    }

    #[test]
    fn test_stop_while_producer_runs_and_consumer_reads() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::{Duration, Instant};

        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 64, 48).with_row_padding(16));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");
        let buffer = session.start_owned().expect("start should succeed");

        let running = Arc::new(AtomicBool::new(true));
        let producer = {
            let backend = backend.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut level = 0u8;
                while running.load(Ordering::Acquire) {
                    level = level.wrapping_add(1);
                    backend.capture("Camera", TestPattern::Solid(level, level, level));
                }
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !session.is_available() {
            assert!(Instant::now() < deadline, "no frame delivered");
            thread::yield_now();
        }

        let guard = buffer.read();
        session.stop();
        drop(guard);
        session.mark_consumed();
        let snapshot = buffer.to_vec();

        for _ in 0..10_000 {
            assert!(!session.is_available(), "frame signalled after stop");
            thread::yield_now();
        }
        assert_eq!(buffer.to_vec(), snapshot);
        assert!(!backend.is_streaming("Camera"));

        running.store(false, Ordering::Release);
        producer.join().expect("producer thread panicked");
    }

    #[test]
    fn test_two_frames_without_consumption_keep_latest() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 2, 1));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");
        let buffer = session.start_owned().expect("start should succeed");

        assert!(backend.capture("Camera", TestPattern::Solid(1, 1, 1)));
        assert!(backend.capture("Camera", TestPattern::Solid(2, 2, 2)));
        assert!(session.is_available());
        assert_eq!(buffer.to_vec(), vec![2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = MockBackend::new();
        backend.add_camera(MockCamera::new("Camera", 2, 2));
        let mut session = session_for(&backend, DeviceQuery::Default);
        session.open(ColorSpace::Rgb).expect("open should succeed");
        let buffer = session.start_owned().expect("start should succeed");

        session.stop();
        session.release();
        session.release();
        assert_eq!(session.state(), SessionState::Released);
        assert!(session.buffer().is_none());
        assert!(!backend.is_streaming("Camera"));
        // Caller's view stays valid after the engine drops its reference.
        assert_eq!(buffer.len(), 12);

        assert!(session.open(ColorSpace::Rgb).is_err());
    }
}
