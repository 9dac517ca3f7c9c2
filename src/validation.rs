//! Frame validation utilities for test pattern verification.
//!
//! These functions check converted, tightly packed frames (as delivered to
//! the consumer) against known test patterns. Useful for integration
//! testing with virtual cameras.

use crate::traits::{CameraError, CaptureDimensions, ColorSpace, Result};

/// Expected RGB values for 100% colour bars (8 bars).
///
/// Colors in order: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255), // White
    (255, 255, 0),   // Yellow
    (0, 255, 255),   // Cyan
    (0, 255, 0),     // Green
    (255, 0, 255),   // Magenta
    (255, 0, 0),     // Red
    (0, 0, 255),     // Blue
    (0, 0, 0),       // Black
];

/// Tolerance for RGB color matching (accounts for driver colour handling).
const COLOR_TOLERANCE: u32 = 15;

/// Checks that `frame` has exactly the packed size for `dims` and `color_space`.
pub fn validate_packed_len(
    frame: &[u8],
    dims: CaptureDimensions,
    color_space: ColorSpace,
) -> Result<()> {
    let expected = dims.packed_len(color_space);
    if frame.len() == expected {
        Ok(())
    } else {
        Err(CameraError::ValidationFailed(format!(
            "Frame holds {} bytes, expected {expected} for {dims} {color_space}",
            frame.len()
        )))
    }
}

/// Read the pixel at (`x`, `y`) of a packed frame as RGB.
///
/// Greyscale pixels are returned with all three channels equal.
pub fn pixel_at(
    frame: &[u8],
    dims: CaptureDimensions,
    color_space: ColorSpace,
    x: u32,
    y: u32,
) -> Option<(u8, u8, u8)> {
    if x >= dims.width || y >= dims.height {
        return None;
    }
    let channels = color_space.channels();
    let offset = (y as usize * dims.width as usize + x as usize) * channels;
    match *frame.get(offset..offset + channels)? {
        [v] => Some((v, v, v)),
        [r, g, b] => Some((r, g, b)),
        _ => None,
    }
}

/// Validates that a frame contains the colour bar pattern.
///
/// Samples the centre of each of the 8 vertical bars on the middle row.
/// RGB frames must match the expected colours within a tolerance;
/// greyscale frames must show strictly decreasing luma from bar to bar.
pub fn validate_color_bars(
    frame: &[u8],
    dims: CaptureDimensions,
    color_space: ColorSpace,
) -> Result<()> {
    validate_packed_len(frame, dims, color_space)?;

    let bar_width = dims.width / 8;
    let center_y = dims.height / 2;
    let mut prev_luma: Option<u8> = None;

    for (bar_idx, expected_rgb) in COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let sample_x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        let actual_rgb = pixel_at(frame, dims, color_space, sample_x, center_y).ok_or_else(|| {
            CameraError::ValidationFailed(format!(
                "Failed to get pixel at ({sample_x}, {center_y})"
            ))
        })?;

        match color_space {
            ColorSpace::Rgb => {
                if !colors_match(actual_rgb, *expected_rgb, COLOR_TOLERANCE) {
                    return Err(CameraError::ValidationFailed(format!(
                        "Color bar {bar_idx} mismatch at ({sample_x}, {center_y}): \
                         expected RGB{expected_rgb:?}, got RGB{actual_rgb:?}"
                    )));
                }
            }
            ColorSpace::Greyscale => {
                let luma = actual_rgb.0;
                if let Some(prev) = prev_luma {
                    if luma >= prev {
                        return Err(CameraError::ValidationFailed(format!(
                            "Color bar {bar_idx} luma {luma} not below previous bar {prev}"
                        )));
                    }
                }
                prev_luma = Some(luma);
            }
        }
    }

    Ok(())
}

/// Validates that a frame contains a horizontal gradient pattern.
///
/// Samples the middle row and verifies that luminance increases
/// monotonically from left to right with a significant overall change.
pub fn validate_gradient(
    frame: &[u8],
    dims: CaptureDimensions,
    color_space: ColorSpace,
) -> Result<()> {
    validate_packed_len(frame, dims, color_space)?;

    let center_y = dims.height / 2;

    // Sample every 10 pixels to check for monotonic increase
    let sample_step = 10usize;
    let mut first_luminance: Option<f32> = None;
    let mut prev_luminance: Option<f32> = None;
    let mut last_luminance: Option<f32> = None;

    for x in (0..dims.width).step_by(sample_step) {
        let (r, g, b) = pixel_at(frame, dims, color_space, x, center_y).ok_or_else(|| {
            CameraError::ValidationFailed(format!("Failed to get pixel at ({x}, {center_y})"))
        })?;

        // Calculate luminance (Y' in Rec. 601)
        let luminance = 0.114f32.mul_add(
            f32::from(b),
            0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
        );

        if first_luminance.is_none() {
            first_luminance = Some(luminance);
        }

        if let Some(prev) = prev_luminance {
            if luminance < prev - 1.0 {
                // Allow small decreases due to rounding
                return Err(CameraError::ValidationFailed(format!(
                    "Gradient not monotonically increasing at x={x}: \
                     luminance {luminance} < previous {prev}"
                )));
            }
        }

        prev_luminance = Some(luminance);
        last_luminance = Some(luminance);
    }

    if let (Some(first), Some(last)) = (first_luminance, last_luminance) {
        let luminance_change = last - first;
        if luminance_change < 50.0 {
            return Err(CameraError::ValidationFailed(format!(
                "Insufficient luminance change for gradient: {luminance_change} \
                 (expected at least 50.0)"
            )));
        }
    }

    Ok(())
}

/// Helper function to check if two RGB colors match within a tolerance.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u32) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    u32::from(ar.abs_diff(er)) <= tolerance
        && u32::from(ag.abs_diff(eg)) <= tolerance
        && u32::from(ab.abs_diff(eb)) <= tolerance
}
