//! Integration tests using vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded, e.g. `modprobe vivid n_devs=2`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Expected vivid configuration:
//! - First vivid device: Gray Ramp pattern (gradient)
//! - Second vivid device: 100% Colorbar pattern
//!
//! Tests will fail if vivid is not available or not configured correctly.

#![cfg(feature = "integration")]

use std::thread;
use std::time::{Duration, Instant};

use cam_bridge::catalog::DeviceCatalog;
use cam_bridge::validation::{validate_color_bars, validate_gradient, validate_packed_len};
use cam_bridge::{
    CaptureConfig, CaptureSession, ColorSpace, DeviceInfo, DeviceQuery, FrameBuffer,
    SessionState, V4l2Backend,
};
use serial_test::serial;

/// Find all available vivid virtual camera devices, in discovery order.
fn find_vivid_devices() -> Vec<DeviceInfo> {
    DeviceCatalog::new(&V4l2Backend::new())
        .enumerate()
        .unwrap_or_default()
        .into_iter()
        .filter(|device| device.driver.to_lowercase().contains("vivid"))
        .collect()
}

/// Macro to fail test if vivid is not available.
///
/// Returns the first vivid device.
/// Integration tests MUST have vivid loaded - they should fail, not silently skip.
macro_rules! require_vivid {
    () => {{
        let devices = find_vivid_devices();
        assert!(
            !devices.is_empty(),
            "vivid virtual camera not available.\n\
             Load vivid with: sudo modprobe vivid n_devs=2\n\
             Or run unit tests only: cargo test --lib"
        );
        devices[0].clone()
    }};
}

/// Macro to get both vivid devices (for pattern-specific tests).
///
/// Returns a tuple of (gradient device, colorbar device).
macro_rules! require_vivid_pair {
    () => {{
        let devices = find_vivid_devices();
        assert!(
            devices.len() >= 2,
            "Two vivid devices required but found {}.\n\
             Load vivid with: sudo modprobe vivid n_devs=2\n\
             Or run unit tests only: cargo test --lib",
            devices.len()
        );
        (devices[0].clone(), devices[1].clone())
    }};
}

fn open_session(device: &DeviceInfo, color_space: ColorSpace) -> CaptureSession<V4l2Backend> {
    let config = CaptureConfig::default().with_name(device.name.clone());
    let mut session = CaptureSession::new(V4l2Backend::from_config(&config), config);
    session
        .open(color_space)
        .expect("Failed to open vivid device");
    session
}

/// Poll until a frame is available or the timeout expires.
fn wait_for_frame(session: &CaptureSession<V4l2Backend>, timeout: Duration) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if session.is_available() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn capture_one(
    device: &DeviceInfo,
    color_space: ColorSpace,
) -> (Vec<u8>, cam_bridge::CaptureDimensions) {
    let mut session = open_session(device, color_space);
    let dims = session.dimensions().expect("dimensions after open");
    let buffer = FrameBuffer::new(dims.packed_len(color_space));
    session.start(buffer.clone()).expect("Failed to start");
    assert!(
        wait_for_frame(&session, Duration::from_secs(5)),
        "No frame within 5s"
    );
    let frame = buffer.to_vec();
    session.release();
    (frame, dims)
}

#[test]
#[serial]
fn test_vivid_enumeration() {
    let device = require_vivid!();

    println!("Found vivid device: {device}");
    assert!(device.id.starts_with("/dev/video"), "Expected a device node path");
    assert!(device.dimensions.width > 0, "Width should be positive");
    assert!(device.dimensions.height > 0, "Height should be positive");
}

#[test]
#[serial]
fn test_vivid_open_reports_dimensions() {
    let device = require_vivid!();

    for color_space in [ColorSpace::Rgb, ColorSpace::Greyscale] {
        let session = open_session(&device, color_space);
        let dims = session.dimensions().expect("dimensions after open");
        println!("{color_space}: {dims} {:?}", session.format());
        assert_eq!(session.state(), SessionState::Opened);
        assert!(dims.width > 0 && dims.height > 0);
    }
}

#[test]
#[serial]
fn test_vivid_unknown_name_fails() {
    let _ = require_vivid!();

    let config =
        CaptureConfig::default().with_query(DeviceQuery::Name("no such camera".to_owned()));
    let mut session = CaptureSession::new(V4l2Backend::new(), config);
    assert!(session.open(ColorSpace::Rgb).is_err());
    assert_eq!(session.state(), SessionState::Unopened);
}

#[test]
#[serial]
fn test_vivid_capture_rgb_frame() {
    let device = require_vivid!();

    let (frame, dims) = capture_one(&device, ColorSpace::Rgb);
    validate_packed_len(&frame, dims, ColorSpace::Rgb).expect("packed RGB frame");
}

#[test]
#[serial]
fn test_vivid_stop_and_restart() {
    let device = require_vivid!();

    let mut session = open_session(&device, ColorSpace::Greyscale);
    let dims = session.dimensions().expect("dimensions after open");
    let buffer = FrameBuffer::new(dims.packed_len(ColorSpace::Greyscale));
    session.start(buffer.clone()).expect("Failed to start");
    assert!(wait_for_frame(&session, Duration::from_secs(5)));

    session.stop();
    session.mark_consumed();
    thread::sleep(Duration::from_millis(300));
    assert!(!session.is_available(), "No frame may arrive after stop");

    session.start(buffer).expect("Failed to restart");
    assert!(wait_for_frame(&session, Duration::from_secs(5)));
    session.release();
    session.release();
}

#[test]
#[serial]
fn test_vivid_restart_does_not_wait_for_cancelled_stream() {
    let device = require_vivid!();

    let config = CaptureConfig::default()
        .with_name(device.name.clone())
        .with_poll_timeout(Duration::from_secs(2));
    let mut session = CaptureSession::new(V4l2Backend::from_config(&config), config);
    let dims = session.open(ColorSpace::Rgb).expect("Failed to open vivid device");
    let buffer = FrameBuffer::new(dims.packed_len(ColorSpace::Rgb));
    session.start(buffer.clone()).expect("Failed to start");
    assert!(wait_for_frame(&session, Duration::from_secs(5)));

    session.stop();
    session.mark_consumed();
    let started = Instant::now();
    session.start(buffer).expect("Failed to restart");
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "restart waited {:?} for the previous stream",
        started.elapsed()
    );
    assert!(wait_for_frame(&session, Duration::from_secs(5)));
    session.release();
}

#[test]
#[serial]
fn test_vivid_gradient_pattern() {
    let (gradient_device, _) = require_vivid_pair!();

    let (frame, dims) = capture_one(&gradient_device, ColorSpace::Greyscale);
    let result = validate_gradient(&frame, dims, ColorSpace::Greyscale);
    assert!(
        result.is_ok(),
        "Gradient validation failed on first vivid device.\n\
         Expected Gray Ramp pattern.\n\
         Error: {:?}",
        result.err()
    );
}

#[test]
#[serial]
fn test_vivid_colorbar_pattern() {
    let (_, colorbar_device) = require_vivid_pair!();

    let (frame, dims) = capture_one(&colorbar_device, ColorSpace::Rgb);
    let result = validate_color_bars(&frame, dims, ColorSpace::Rgb);
    assert!(
        result.is_ok(),
        "Color bars validation failed on second vivid device.\n\
         Expected 100% Colorbar pattern.\n\
         Error: {:?}",
        result.err()
    );
}
