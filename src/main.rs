//! Cam-bridge binary for testing camera capture.

use std::thread;
use std::time::{Duration, Instant};

use cam_bridge::{CaptureConfig, ColorSpace, DeviceQuery, FrameBuffer, Registry, V4l2Backend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cam_bridge=info")),
        )
        .init();

    if !run() {
        error!("capture failed");
        std::process::exit(1);
    }
}

fn run() -> bool {
    let query = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<DeviceQuery>().ok());
    let config = CaptureConfig::default().with_color_space(ColorSpace::Rgb);
    let registry = Registry::with_config(V4l2Backend::from_config(&config), config);

    let handle = registry.create(query);
    let Some(dims) = registry.open(handle, None) else {
        registry.destroy(handle);
        return false;
    };

    let buffer = FrameBuffer::new(dims.packed_len(ColorSpace::Rgb));
    if !registry.start(handle, buffer.clone()) {
        registry.destroy(handle);
        return false;
    }

    let started = Instant::now();
    let mut frames = 0u32;
    while started.elapsed() < Duration::from_secs(5) {
        if registry.is_available(handle) {
            let frame = buffer.read();
            let mean = frame.iter().map(|&b| u64::from(b)).sum::<u64>() / frame.len().max(1) as u64;
            drop(frame);
            registry.mark_consumed(handle);

            frames += 1;
            info!(frame = frames, %dims, mean, "frame received");
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }

    registry.stop(handle);
    registry.destroy(handle);
    info!(frames, "capture finished");
    true
}
