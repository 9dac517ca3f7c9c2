//! Conversion of native captured images into packed destination frames.

use crate::traits::{CaptureDimensions, ColorSpace, NativeImage, PixelFormat};

/// Reasons a single frame could not be converted.
///
/// Never surfaced to callers; the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    /// Native encoding cannot produce the requested colour space.
    #[error("cannot convert {format} to {color_space}")]
    Unsupported {
        /// Native encoding.
        format: PixelFormat,
        /// Requested colour space.
        color_space: ColorSpace,
    },
    /// Image size differs from the session's dimensions.
    #[error("frame is {actual}, session expects {expected}")]
    DimensionMismatch {
        /// Session dimensions.
        expected: CaptureDimensions,
        /// Captured image dimensions.
        actual: CaptureDimensions,
    },
    /// Row stride is shorter than one row of pixels.
    #[error("stride {stride} shorter than row of {row_bytes} bytes")]
    StrideTooSmall {
        /// Native stride.
        stride: usize,
        /// Minimum row length.
        row_bytes: usize,
    },
    /// Source buffer ends before the last row.
    #[error("source holds {actual} bytes, needs {required}")]
    SourceTooShort {
        /// Bytes needed for all rows.
        required: usize,
        /// Bytes available.
        actual: usize,
    },
    /// Destination length differs from the packed frame size.
    #[error("destination holds {actual} bytes, needs {expected}")]
    DestinationSize {
        /// Packed frame size.
        expected: usize,
        /// Destination length.
        actual: usize,
    },
}

/// Converts native images into tightly packed frames of one colour space.
#[derive(Debug, Clone, Copy)]
pub struct FrameConverter {
    color_space: ColorSpace,
    dimensions: CaptureDimensions,
}

impl FrameConverter {
    /// Create a converter producing `color_space` frames of `dimensions`.
    #[must_use]
    pub const fn new(color_space: ColorSpace, dimensions: CaptureDimensions) -> Self {
        Self {
            color_space,
            dimensions,
        }
    }

    /// Length of one converted frame.
    #[must_use]
    pub const fn output_len(&self) -> usize {
        self.dimensions.packed_len(self.color_space)
    }

    /// Convert `image` into `dst`.
    ///
    /// Every check runs before the first byte is written, so on error
    /// `dst` is untouched.
    pub fn convert(&self, image: &NativeImage<'_>, dst: &mut [u8]) -> Result<(), ConvertError> {
        let actual = CaptureDimensions::new(image.width, image.height);
        if actual != self.dimensions {
            return Err(ConvertError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        if dst.len() != self.output_len() {
            return Err(ConvertError::DestinationSize {
                expected: self.output_len(),
                actual: dst.len(),
            });
        }

        let width = self.dimensions.width as usize;
        let height = self.dimensions.height as usize;
        match (self.color_space, image.pixel_format) {
            (ColorSpace::Greyscale, format) if format.has_luma_plane() => {
                extract_luma(image.data, image.stride, width, height, dst)
            }
            (ColorSpace::Rgb, PixelFormat::Argb32) => {
                argb_to_rgb(image.data, image.stride, width, height, dst)
            }
            (color_space, format) => Err(ConvertError::Unsupported {
                format,
                color_space,
            }),
        }
    }
}

/// Bytes a strided image of `height` rows must hold.
const fn required_len(stride: usize, row_bytes: usize, height: usize) -> usize {
    if height == 0 {
        0
    } else {
        stride * (height - 1) + row_bytes
    }
}

fn check_source(
    src: &[u8],
    stride: usize,
    row_bytes: usize,
    height: usize,
) -> Result<(), ConvertError> {
    if stride < row_bytes {
        return Err(ConvertError::StrideTooSmall { stride, row_bytes });
    }
    let required = required_len(stride, row_bytes, height);
    if src.len() < required {
        return Err(ConvertError::SourceTooShort {
            required,
            actual: src.len(),
        });
    }
    Ok(())
}

/// Copy the luma plane of a planar or biplanar image, dropping row padding.
///
/// `dst` must hold exactly `width * height` bytes.
pub fn extract_luma(
    src: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    check_source(src, stride, width, height)?;
    if width == 0 {
        return Ok(());
    }

    for (src_row, dst_row) in src.chunks(stride).zip(dst.chunks_exact_mut(width)) {
        if let Some(pixels) = src_row.get(..width) {
            dst_row.copy_from_slice(pixels);
        }
    }
    Ok(())
}

/// Repack 32-bit ARGB rows into 24-bit RGB, dropping alpha.
///
/// `dst` must hold exactly `width * height * 3` bytes.
pub fn argb_to_rgb(
    src: &[u8],
    stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    check_source(src, stride, width * 4, height)?;
    if width == 0 {
        return Ok(());
    }

    for (src_row, dst_row) in src.chunks(stride).zip(dst.chunks_exact_mut(width * 3)) {
        for (argb, rgb) in src_row.chunks_exact(4).zip(dst_row.chunks_exact_mut(3)) {
            if let [_alpha, red, green, blue] = *argb {
                rgb.copy_from_slice(&[red, green, blue]);
            }
        }
    }
    Ok(())
}
