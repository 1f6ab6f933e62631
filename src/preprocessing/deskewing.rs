//! # Image Deskewing Module
//!
//! Text rotation detection and correction. The skew angle is found with
//! projection profile analysis and corrected with a nearest-neighbour rotation
//! about the image centre that keeps the original dimensions.

use std::time::Instant;

use super::buffer::{PixelBuffer, CHANNELS};
use super::thresholding::otsu_ink_mask;
use super::types::PreprocessingError;

/// Largest skew considered, in degrees either way.
const MAX_SKEW_DEGREES: f32 = 10.0;

/// Detection samples the ink mask down to at most this many pixels per side.
const DETECTION_SIDE: u32 = 512;

/// Rotations below this angle are skipped to avoid resampling artifacts.
pub const MIN_CORRECTION_DEGREES: f32 = 0.5;

const FILL: [u8; 3] = [255, 255, 255];

/// Detected skew of the text lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewEstimate {
    /// Slope angle of the text lines (positive = descending to the right)
    pub angle_degrees: f32,
    /// How sharply the best angle stands out from the sweep (0.0-1.0)
    pub confidence: f32,
}

/// Result of a deskew pass.
#[derive(Debug, Clone)]
pub struct DeskewResult {
    pub image: PixelBuffer,
    pub estimate: SkewEstimate,
    /// False when the angle was below the correction threshold
    pub rotated: bool,
}

/// Variance of the row projection of centred `points` after rotating by
/// `-angle`, over a profile of `rows` bins.
///
/// Text lines aligned with the projection direction give a spiky profile and
/// therefore the highest variance.
fn projection_variance(points: &[(f32, f32)], rows: usize, angle_degrees: f32) -> f64 {
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let offset = (rows / 2) as f32;
    let mut profile = vec![0u32; rows];
    for &(dx, dy) in points {
        let row = (dy * cos_a - dx * sin_a + offset).round();
        if row >= 0.0 && (row as usize) < profile.len() {
            profile[row as usize] += 1;
        }
    }
    let n = profile.len() as f64;
    let mean = profile.iter().map(|&c| c as f64).sum::<f64>() / n;
    profile.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Estimates the skew angle of a gray plane.
///
/// Sweeps -10..=10 degrees in 0.5 degree steps, then refines around the best
/// angle in 0.1 degree steps. Pages without ink report zero skew.
pub fn detect_skew(plane: &[u8], width: u32, height: u32) -> SkewEstimate {
    let flat = SkewEstimate {
        angle_degrees: 0.0,
        confidence: 0.0,
    };
    if width == 0 || height == 0 {
        return flat;
    }
    let mask = otsu_ink_mask(plane, width, height);
    let step = width.max(height).div_ceil(DETECTION_SIDE).max(1);
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let points: Vec<(f32, f32)> = (0..height)
        .step_by(step as usize)
        .flat_map(|y| (0..width).step_by(step as usize).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.get_pixel(x, y)[0] != 0)
        .map(|(x, y)| ((x as f32 - cx) / step as f32, (y as f32 - cy) / step as f32))
        .collect();
    if points.len() < 2 {
        return flat;
    }
    // Covers the half diagonal on both sides of the centre
    let rows = ((width + height) / step + 2) as usize;

    let steps = (MAX_SKEW_DEGREES * 2.0) as i32;
    let mut best_angle = 0.0f32;
    let mut best_variance = projection_variance(&points, rows, 0.0);
    let mut total_variance = 0.0f64;
    for i in -steps..=steps {
        let angle = i as f32 * 0.5;
        let variance = projection_variance(&points, rows, angle);
        total_variance += variance;
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }
    let coarse_mean = total_variance / (2 * steps + 1) as f64;

    let coarse = best_angle;
    for i in -5..=5 {
        let angle = coarse + i as f32 * 0.1;
        let variance = projection_variance(&points, rows, angle);
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    let confidence = if best_variance > 0.0 {
        (1.0 - coarse_mean / best_variance).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };
    SkewEstimate {
        angle_degrees: best_angle,
        confidence,
    }
}

/// Rotates the content by `-angle_degrees` about the centre, keeping the
/// dimensions. Uncovered corners are filled with white.
pub fn rotate(image: &PixelBuffer, angle_degrees: f32) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let width = image.width();
    let height = image.height();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    image.map_rows(|y, _, dst| {
        let dy = y as f32 + 0.5 - cy;
        for (x, out) in dst.chunks_exact_mut(CHANNELS).enumerate() {
            let dx = x as f32 + 0.5 - cx;
            let sx = (dx * cos_a - dy * sin_a + cx).floor();
            let sy = (dx * sin_a + dy * cos_a + cy).floor();
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
                out.copy_from_slice(&image.pixel(sx as u32, sy as u32));
            } else {
                out.copy_from_slice(&FILL);
            }
        }
    })
}

/// Detects and corrects text skew using projection profile analysis.
///
/// Designed for the small rotations (within 10 degrees) of flatbed scans and
/// photos. Angles under half a degree are left alone.
///
/// # Arguments
///
/// * `image` - The buffer to deskew
///
/// # Returns
///
/// The corrected (or unchanged) buffer together with the estimate.
pub fn deskew(image: &PixelBuffer) -> Result<DeskewResult, PreprocessingError> {
    image.ensure_processable()?;
    let start_time = Instant::now();

    let estimate = detect_skew(&image.gray_plane(), image.width(), image.height());
    if estimate.angle_degrees.abs() < MIN_CORRECTION_DEGREES {
        tracing::debug!(
            target: "ocr_preprocessing",
            "Skew angle {:.2}° is below threshold, skipping deskewing",
            estimate.angle_degrees
        );
        return Ok(DeskewResult {
            image: image.clone(),
            estimate,
            rotated: false,
        });
    }

    let rotated = rotate(image, estimate.angle_degrees)?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Deskewing completed in {:.2}ms: corrected {:.2}° skew (confidence {:.2})",
        start_time.elapsed().as_secs_f64() * 1000.0,
        estimate.angle_degrees,
        estimate.confidence
    );

    Ok(DeskewResult {
        image: rotated,
        estimate,
        rotated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruled_page(width: u32, height: u32, angle_degrees: f32) -> PixelBuffer {
        let mut image = PixelBuffer::filled(width, height, [255, 255, 255]).unwrap();
        let slope = angle_degrees.to_radians().tan();
        for base in (20..height - 20).step_by(16) {
            for x in 10..width - 10 {
                let y = base as f32 + (x as f32 - width as f32 / 2.0) * slope;
                if y >= 0.0 && (y as u32) < height {
                    image.set_pixel(x, y as u32, [0, 0, 0]);
                    if (y as u32) + 1 < height {
                        image.set_pixel(x, y as u32 + 1, [0, 0, 0]);
                    }
                }
            }
        }
        image
    }

    #[test]
    fn test_detect_skew_level_lines() {
        let image = ruled_page(200, 160, 0.0);
        let estimate = detect_skew(&image.gray_plane(), 200, 160);
        assert!(estimate.angle_degrees.abs() < 0.25);
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn test_detect_skew_tilted_lines() {
        let image = ruled_page(240, 200, 3.0);
        let estimate = detect_skew(&image.gray_plane(), 240, 200);
        assert!((estimate.angle_degrees - 3.0).abs() < 0.35, "{:?}", estimate);
    }

    #[test]
    fn test_uniform_page_has_no_skew() {
        let image = PixelBuffer::filled(50, 50, [128, 128, 128]).unwrap();
        let estimate = detect_skew(&image.gray_plane(), 50, 50);
        assert_eq!(estimate.angle_degrees, 0.0);
        assert_eq!(estimate.confidence, 0.0);
    }

    #[test]
    fn test_deskew_straightens_lines() {
        let image = ruled_page(240, 200, 4.0);
        let result = deskew(&image).unwrap();
        assert!(result.rotated);
        assert_eq!(result.image.dimensions(), (240, 200));
        let after = detect_skew(&result.image.gray_plane(), 240, 200);
        assert!(after.angle_degrees.abs() < 0.6, "{:?}", after);
    }

    #[test]
    fn test_rotation_zero_angle_is_identity() {
        let image = ruled_page(64, 64, 2.0);
        assert_eq!(rotate(&image, 0.0).unwrap(), image);
    }
}
