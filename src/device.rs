//! V4L2 backend implementation using the v4l crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::format::Quantization;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::config::CaptureConfig;
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureDimensions, DeviceInfo, Format, FourCC,
    FrameMetadata, FrameSink, NativeImage, PixelFormat, Result, YuvRange,
};

/// Backend enumerating `/dev/video*` capture nodes.
#[derive(Debug, Clone)]
pub struct V4l2Backend {
    buffer_count: u32,
    poll_timeout: Duration,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl V4l2Backend {
    /// Create a backend with default streaming parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend using the streaming parameters of `config`.
    #[must_use]
    pub const fn from_config(config: &CaptureConfig) -> Self {
        Self {
            buffer_count: config.buffer_count(),
            poll_timeout: config.poll_timeout(),
        }
    }
}

impl CameraBackend for V4l2Backend {
    type Device = V4l2Device;

    fn enumerate(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_string_lossy().into_owned();
            match probe(&path) {
                Ok(Some(info)) => devices.push(info),
                Ok(None) => debug!(%path, "skipping non-capture node"),
                Err(err) => debug!(%path, %err, "skipping unreadable node"),
            }
        }
        Ok(devices)
    }

    fn open_device(&self, info: &DeviceInfo) -> Result<V4l2Device> {
        let device = Device::with_path(&info.id)
            .map_err(|err| CameraError::AttachFailed(format!("{}: {err}", info.id)))?;

        Ok(V4l2Device {
            device: Arc::new(device),
            info: info.clone(),
            format: None,
            buffer_count: self.buffer_count,
            poll_timeout: self.poll_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }
}

/// Snapshot a node, or `None` if it cannot capture and stream video.
fn probe(path: &str) -> Result<Option<DeviceInfo>> {
    let device = Device::with_path(path)?;
    let caps = device.query_caps()?;

    let can_capture = caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE);
    let can_stream = caps.capabilities.contains(v4l::capability::Flags::STREAMING);
    if !can_capture || !can_stream {
        return Ok(None);
    }

    let active = device.format()?;
    let frame_rates = device
        .enum_frameintervals(active.fourcc, active.width, active.height)
        .map(|intervals| {
            intervals
                .iter()
                .filter_map(|interval| match &interval.interval {
                    FrameIntervalEnum::Discrete(fraction) => {
                        fps(fraction.numerator, fraction.denominator)
                    }
                    FrameIntervalEnum::Stepwise(stepwise) => {
                        fps(stepwise.min.numerator, stepwise.min.denominator)
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Some(DeviceInfo {
        id: path.to_owned(),
        name: caps.card,
        driver: caps.driver,
        bus_info: caps.bus,
        dimensions: CaptureDimensions::new(active.width, active.height),
        active_fourcc: FourCC::from(active.fourcc),
        frame_rates,
    }))
}

/// Frames per second for a frame interval of `numerator / denominator` seconds.
fn fps(numerator: u32, denominator: u32) -> Option<f64> {
    (numerator != 0).then(|| f64::from(denominator) / f64::from(numerator))
}

/// V4L2 device attached to one capture session.
pub struct V4l2Device {
    device: Arc<Device>,
    info: DeviceInfo,
    format: Option<Format>,
    buffer_count: u32,
    poll_timeout: Duration,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("info", &self.info)
            .field("format", &self.format)
            .field("device", &"<v4l::Device>")
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl V4l2Device {
    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            reap(&self.info.id, handle);
        }
    }
}

fn reap(device: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(device, "capture thread panicked");
    }
}

impl CameraDevice for V4l2Device {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        let descriptions = self
            .device
            .enum_formats()
            .map_err(|err| CameraError::AttachFailed(err.to_string()))?;

        let mut formats = Vec::new();
        for description in descriptions {
            for format in PixelFormat::from_fourcc(FourCC::from(description.fourcc)) {
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
        }
        debug!(device = %self.info.id, ?formats, "supported pixel formats");
        Ok(formats)
    }

    fn configure(&mut self, pixel_format: PixelFormat) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::AttachFailed(err.to_string()))?;

        fmt.fourcc = pixel_format.fourcc().into();
        fmt.quantization = match pixel_format.range() {
            Some(YuvRange::Video) => Quantization::LimitedRange,
            Some(YuvRange::Full) => Quantization::FullRange,
            None => Quantization::Default,
        };

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::AttachFailed(err.to_string()))?;

        let actual = FourCC::from(fmt.fourcc);
        if actual != pixel_format.fourcc() {
            return Err(CameraError::AttachFailed(format!(
                "driver substituted {actual} for {}",
                pixel_format.fourcc()
            )));
        }

        let format = Format {
            width: fmt.width,
            height: fmt.height,
            pixel_format,
            stride: fmt.stride,
            size: fmt.size,
        };
        self.format = Some(format.clone());
        Ok(format)
    }

    fn start_streaming(&mut self, sink: FrameSink) -> Result<()> {
        let format = self
            .format
            .clone()
            .ok_or_else(|| CameraError::StreamError("device not configured".to_owned()))?;

        // A cancelled stream may still sit in its poll timeout. The new worker
        // reaps it before taking the device, so this call never waits on it.
        let previous = self.worker.take().and_then(|handle| {
            if handle.is_finished() {
                reap(&self.info.id, handle);
                None
            } else {
                Some(handle)
            }
        });
        let draining = previous.is_some();

        let cancel = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker = ProducerLoop {
            device: Arc::clone(&self.device),
            format,
            buffer_count: self.buffer_count,
            poll_timeout: self.poll_timeout,
            cancel: Arc::clone(&cancel),
            previous,
            sink,
        };
        let handle = thread::Builder::new()
            .name(format!("capture {}", self.info.id))
            .spawn(move || worker.run(&ready_tx))?;

        if draining {
            debug!(device = %self.info.id, "previous stream still draining, setup deferred");
            self.cancel = cancel;
            self.worker = Some(handle);
            return Ok(());
        }

        // Stream setup (REQBUFS/STREAMON) only; never waits for a frame.
        let ready = ready_rx
            .recv()
            .map_err(|_| CameraError::StreamError("capture thread exited".to_owned()))?;
        if let Err(err) = ready {
            let _ = handle.join();
            return Err(err);
        }

        self.cancel = cancel;
        self.worker = Some(handle);
        Ok(())
    }

    fn stop_streaming(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.stop_streaming();
        self.join_worker();
    }
}

/// Producer thread state: owns the mmap stream and the frame sink.
struct ProducerLoop {
    device: Arc<Device>,
    format: Format,
    buffer_count: u32,
    poll_timeout: Duration,
    cancel: Arc<AtomicBool>,
    previous: Option<JoinHandle<()>>,
    sink: FrameSink,
}

impl ProducerLoop {
    fn run(mut self, ready: &mpsc::Sender<Result<()>>) {
        if let Some(previous) = self.previous.take() {
            reap("previous stream", previous);
            if self.cancel.load(Ordering::Acquire) {
                return;
            }
        }

        let mut stream =
            match Stream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count) {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "capture stream setup failed");
                    let _ = ready.send(Err(CameraError::StreamError(err.to_string())));
                    return;
                }
            };
        stream.set_timeout(self.poll_timeout);
        let _ = ready.send(Ok(()));

        while !self.cancel.load(Ordering::Acquire) {
            let (buf, meta) = match stream.next() {
                Ok(frame) => frame,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(err) => {
                    warn!(%err, "capture stream ended");
                    break;
                }
            };

            if self.cancel.load(Ordering::Acquire) {
                break;
            }

            // Safe conversions: V4L2 timestamps are always non-negative in practice
            #[allow(clippy::cast_sign_loss)]
            let secs = meta.timestamp.sec.max(0) as u64;
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

            let used = (meta.bytesused as usize).min(buf.len());
            let image = NativeImage {
                pixel_format: self.format.pixel_format,
                width: self.format.width,
                height: self.format.height,
                stride: self.format.stride as usize,
                data: buf.get(..used).unwrap_or(buf),
                metadata: FrameMetadata {
                    sequence: meta.sequence,
                    timestamp: Duration::new(secs, nanos),
                    bytes_used: meta.bytesused,
                },
            };
            (self.sink)(&image);
        }
    }
}
