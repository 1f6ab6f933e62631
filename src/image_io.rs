//! Decoding and encoding at the file boundary.
//!
//! The pipeline itself only sees decoded [`PixelBuffer`]s; these helpers
//! exist for the CLI and for callers that start from files. Any format the
//! `image` crate reads is accepted and converted to 8-bit RGB; the output
//! format follows the file extension.

use std::path::Path;
use std::time::Instant;

use crate::errors::{error_logging, AppError, AppResult};
use crate::preprocessing::PixelBuffer;

/// Decodes `path` into an RGB pixel buffer.
pub fn load_pixel_buffer(path: impl AsRef<Path>) -> AppResult<PixelBuffer> {
    let path = path.as_ref();
    let start_time = Instant::now();

    let decoded = image::open(path).map_err(|e| {
        error_logging::log_io_error(&e, "decode", path.to_str());
        AppError::from(e)
    })?;
    let buffer = PixelBuffer::from_rgb_image(&decoded.to_rgb8())?;

    tracing::debug!(
        path = %path.display(),
        width = buffer.width(),
        height = buffer.height(),
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Image decoded"
    );
    Ok(buffer)
}

/// Encodes `buffer` to `path`, format chosen by extension.
pub fn save_pixel_buffer(buffer: &PixelBuffer, path: impl AsRef<Path>) -> AppResult<()> {
    let path = path.as_ref();
    if buffer.is_empty() {
        return Err(AppError::Validation(format!(
            "refusing to write an empty {}x{} image to {}",
            buffer.width(),
            buffer.height(),
            path.display()
        )));
    }
    buffer.to_rgb_image().save(path).map_err(|e| {
        error_logging::log_io_error(&e, "encode", path.to_str());
        AppError::from(e)
    })?;

    tracing::debug!(path = %path.display(), "Image written");
    Ok(())
}
