//! # Pixel Adjustments
//!
//! Per-pixel transforms: grayscale conversion, background whitening and
//! contrast adjustment. All three are row-parallel on large images and never
//! change the buffer dimensions.

use std::time::Instant;

use super::buffer::{luma, PixelBuffer, CHANNELS};
use super::types::PreprocessingError;

/// Converts to BT.601 luma, written identically to all three channels.
///
/// Gray pixels map to themselves, so the conversion is idempotent.
pub fn to_grayscale(image: &PixelBuffer) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    let start_time = Instant::now();

    let output = image.map_rows(|_, src, dst| {
        for (out, pixel) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
            out.fill(luma(pixel[0], pixel[1], pixel[2]));
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Grayscale conversion completed in {:.2}ms: dimensions={}x{}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        image.width(),
        image.height()
    );
    Ok(output)
}

/// Sets every pixel whose luma is at least `threshold` to pure white.
///
/// Darker pixels pass through unchanged, so ink keeps its original tone.
pub fn whiten_background(
    image: &PixelBuffer,
    threshold: u8,
) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    let start_time = Instant::now();

    let output = image.map_rows(|_, src, dst| {
        for (out, pixel) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
            if luma(pixel[0], pixel[1], pixel[2]) >= threshold {
                out.fill(255);
            } else {
                out.copy_from_slice(pixel);
            }
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Background whitening completed in {:.2}ms: threshold={}, dimensions={}x{}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        threshold,
        image.width(),
        image.height()
    );
    Ok(output)
}

/// Contrast factor for `level`, clamped to (-255, 255) so the denominator
/// never reaches zero.
pub fn contrast_factor(level: f32) -> f64 {
    let level = (level as f64).clamp(-255.0, 255.0);
    259.0 * (level + 255.0) / (255.0 * (259.0 - level))
}

/// Lookup table for the classic contrast formula.
fn contrast_table(level: f32) -> [u8; 256] {
    let factor = contrast_factor(level);
    let mut table = [0u8; 256];
    for (v, entry) in table.iter_mut().enumerate() {
        *entry = (factor * (v as f64 - 128.0) + 128.0).round().clamp(0.0, 255.0) as u8;
    }
    table
}

/// Applies `v' = clamp(factor * (v - 128) + 128)` to every channel.
///
/// # Arguments
///
/// * `image` - Source buffer
/// * `level` - Contrast level, nominally in [-100, 100]; 0 is the identity
///
/// # Errors
///
/// Returns `PreprocessingError::InvalidInput` for a non-finite level or an
/// empty buffer.
pub fn adjust_contrast(image: &PixelBuffer, level: f32) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    if !level.is_finite() {
        return Err(PreprocessingError::invalid(format!(
            "contrast level must be finite, got {}",
            level
        )));
    }
    if level == 0.0 {
        return Ok(image.clone());
    }
    let start_time = Instant::now();

    let table = contrast_table(level);
    let output = image.map_rows(|_, src, dst| {
        for (out, &v) in dst.iter_mut().zip(src) {
            *out = table[v as usize];
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Contrast adjustment completed in {:.2}ms: level={:.1}, factor={:.4}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        level,
        contrast_factor(level)
    );
    Ok(output)
}
