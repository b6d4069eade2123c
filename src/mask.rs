//! Binary mask derivation from a paint layer, and reconciliation back to the
//! source image's original resolution.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};

use crate::canvas::EditorError;

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Default intensity a painted pixel must exceed to count as ROI.
pub const DEFAULT_THRESHOLD: u8 = 20;

/// Single-channel intensity of one paint pixel: ITU-R 601 luma, attenuated
/// by the pixel's alpha so faint brush opacity yields faint intensity.
#[inline]
pub fn paint_intensity(px: &[u8]) -> u8 {
    let luma = (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000;
    ((luma * px[3] as u32 + 127) / 255) as u8
}

/// Binarize a paint layer: `intensity > threshold` becomes 255, else 0.
pub fn threshold_layer(layer: &RgbaImage, threshold: u8) -> GrayImage {
    let (w, h) = layer.dimensions();
    let raw: Vec<u8> = layer
        .as_raw()
        .chunks_exact(4)
        .map(|px| {
            if paint_intensity(px) > threshold {
                MASK_ON
            } else {
                MASK_OFF
            }
        })
        .collect();
    // Length is w * h by construction.
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Derive the mask at editing resolution.
///
/// Without a paint layer the mask is all zero at `background_size`.
pub fn derive_mask(
    layer: Option<&RgbaImage>,
    background_size: (u32, u32),
    threshold: u8,
) -> Result<GrayImage, EditorError> {
    match layer {
        None => Ok(GrayImage::from_pixel(
            background_size.0,
            background_size.1,
            Luma([MASK_OFF]),
        )),
        Some(layer) if layer.dimensions() != background_size => Err(EditorError::LayerSize {
            index: 0,
            expected: background_size,
            found: layer.dimensions(),
        }),
        Some(layer) => Ok(threshold_layer(layer, threshold)),
    }
}

/// Bring a mask to `original_size` with nearest-neighbour sampling, which
/// keeps every value exactly 0 or 255. Returns the input unchanged when the
/// size already matches.
pub fn reconcile_resolution(mask: GrayImage, original_size: (u32, u32)) -> GrayImage {
    if mask.dimensions() == original_size {
        return mask;
    }
    imageops::resize(&mask, original_size.0, original_size.1, FilterType::Nearest)
}

/// True if every pixel is 0 or 255.
pub fn is_binary(mask: &GrayImage) -> bool {
    mask.as_raw().iter().all(|&v| v == MASK_ON || v == MASK_OFF)
}

/// Number of ROI pixels.
pub fn roi_pixel_count(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v == MASK_ON).count()
}
