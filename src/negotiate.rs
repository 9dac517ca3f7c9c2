//! Pixel format negotiation.
//!
//! Each colour space has a fixed priority list of hardware encodings; the
//! first one the device offers wins.

use tracing::debug;

use crate::traits::{CameraError, ColorSpace, PixelFormat, Result, YuvRange};

const GREYSCALE_CANDIDATES: &[PixelFormat] = &[
    PixelFormat::BiPlanar420(YuvRange::Video),
    PixelFormat::Planar420(YuvRange::Video),
    PixelFormat::BiPlanar420(YuvRange::Full),
];

const RGB_CANDIDATES: &[PixelFormat] = &[PixelFormat::Argb32];

/// Encodings tried for `color_space`, highest priority first.
#[must_use]
pub const fn candidates(color_space: ColorSpace) -> &'static [PixelFormat] {
    match color_space {
        ColorSpace::Greyscale => GREYSCALE_CANDIDATES,
        ColorSpace::Rgb => RGB_CANDIDATES,
    }
}

/// Choose the hardware encoding for `color_space` from `available`.
pub fn negotiate(color_space: ColorSpace, available: &[PixelFormat]) -> Result<PixelFormat> {
    let chosen = candidates(color_space)
        .iter()
        .copied()
        .find(|candidate| available.contains(candidate));

    match chosen {
        Some(format) => {
            debug!(%color_space, %format, "negotiated pixel format");
            Ok(format)
        }
        None => {
            debug!(%color_space, ?available, "no usable pixel format");
            Err(CameraError::FormatNotSupported(color_space))
        }
    }
}
