//! # Show-Through Removal
//!
//! Reverse-side content bleeding through thin paper. With a registered scan
//! of the back page the bleed is subtracted directly; with the front page
//! alone, faint tones are snapped to white and the rest is stretched.

use std::time::Instant;

use super::buffer::{luma, PixelBuffer, CHANNELS};
use super::options::ShowThroughParams;
use super::types::PreprocessingError;

/// Dual-side removal: `v' = clamp(v - back_fraction * (255 - back_v))` per channel.
///
/// # Errors
///
/// `InvalidInput` when the two scans differ in size or either is empty.
pub fn remove_show_through_dual(
    front: &PixelBuffer,
    back: &PixelBuffer,
    params: &ShowThroughParams,
) -> Result<PixelBuffer, PreprocessingError> {
    front.ensure_processable()?;
    back.ensure_processable()?;
    if front.dimensions() != back.dimensions() {
        return Err(PreprocessingError::invalid(format!(
            "front ({}x{}) and back ({}x{}) scans differ in size",
            front.width(),
            front.height(),
            back.width(),
            back.height()
        )));
    }
    let start_time = Instant::now();
    let fraction = params.back_fraction.clamp(0.0, 1.0);

    let output = front.map_rows(|y, src, dst| {
        let back_row = back.row(y as u32);
        for ((out, &v), &b) in dst.iter_mut().zip(src).zip(back_row) {
            let bleed = fraction * (255.0 - b as f32);
            *out = (v as f32 - bleed).round().clamp(0.0, 255.0) as u8;
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Dual-side show-through removal completed in {:.2}ms: back_fraction={}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        fraction
    );
    Ok(output)
}

/// Single-image removal: luminance above `white_threshold` becomes white,
/// everything else is stretched by `stretch_factor` around mid gray.
pub fn remove_show_through_single(
    image: &PixelBuffer,
    params: &ShowThroughParams,
) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    if !params.stretch_factor.is_finite() || params.stretch_factor < 0.0 {
        return Err(PreprocessingError::invalid(format!(
            "stretch factor must be a non-negative number, got {}",
            params.stretch_factor
        )));
    }
    let start_time = Instant::now();

    let mut table = [0u8; 256];
    for (v, entry) in table.iter_mut().enumerate() {
        *entry = (128.0 + (v as f32 - 128.0) * params.stretch_factor)
            .round()
            .clamp(0.0, 255.0) as u8;
    }

    let output = image.map_rows(|_, src, dst| {
        for (out, pixel) in dst.chunks_exact_mut(CHANNELS).zip(src.chunks_exact(CHANNELS)) {
            if luma(pixel[0], pixel[1], pixel[2]) > params.white_threshold {
                out.fill(255);
            } else {
                for (o, &v) in out.iter_mut().zip(pixel) {
                    *o = table[v as usize];
                }
            }
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Show-through removal completed in {:.2}ms: white_threshold={}, stretch={}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        params.white_threshold,
        params.stretch_factor
    );
    Ok(output)
}
