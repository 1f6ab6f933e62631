//! # Image Thresholding Module
//!
//! Binarization for OCR preprocessing: Sauvola adaptive thresholding over
//! integral tables, and Otsu's global threshold used to build ink masks for
//! the line, grid and dot-matrix stages.

use std::time::Instant;

use image::GrayImage;

use super::buffer::PixelBuffer;
use super::integral::IntegralImageTable;
use super::options::SauvolaParams;
use super::types::PreprocessingError;

/// Dynamic range of the standard deviation for 8-bit images.
const SAUVOLA_DYNAMIC_RANGE: f64 = 128.0;

/// Applies Sauvola binarization: `T = mean * (1 + k * (std / 128 - 1))`.
///
/// A pixel becomes pure black when its luminance is `<= T`, pure white
/// otherwise. Windows are clipped at the image border; a window larger than
/// the image is clamped to it.
///
/// # Arguments
///
/// * `image` - Source buffer
/// * `params` - Window side (forced odd) and sensitivity `k`
///
/// # Returns
///
/// A strictly binary buffer (0 or 255 on all three channels).
///
/// # Errors
///
/// `InvalidInput` for an empty buffer, a zero window or a non-finite `k`;
/// `ResourceExhausted` when the integral tables cannot be allocated.
pub fn apply_sauvola(
    image: &PixelBuffer,
    params: &SauvolaParams,
) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    if params.window_size == 0 {
        return Err(PreprocessingError::invalid(
            "Sauvola window size must be positive",
        ));
    }
    if !params.k.is_finite() {
        return Err(PreprocessingError::invalid(format!(
            "Sauvola k must be finite, got {}",
            params.k
        )));
    }
    let start_time = Instant::now();

    let width = image.width() as usize;
    let height = image.height() as usize;
    let window = (params.window_size | 1) as usize;
    let largest_side = width.max(height);
    let half = if window > largest_side {
        tracing::warn!(
            target: "ocr_preprocessing",
            "Sauvola window {} exceeds image side {}, clamped",
            window,
            largest_side
        );
        largest_side
    } else {
        window / 2
    };

    let plane = image.gray_plane();
    let table = IntegralImageTable::build(&plane, width, height)?;
    let k = params.k as f64;

    let output = image.map_rows(|y, _, dst| {
        let src = &plane[y * width..(y + 1) * width];
        for (x, (out, &v)) in dst.chunks_exact_mut(3).zip(src).enumerate() {
            let stats = table.window_stats(x, y, half);
            let threshold = stats.mean * (1.0 + k * (stats.std_dev() / SAUVOLA_DYNAMIC_RANGE - 1.0));
            out.fill(if (v as f64) <= threshold { 0 } else { 255 });
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "Sauvola binarization completed in {:.2}ms: window={}, k={}, dimensions={}x{}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        window,
        params.k,
        width,
        height
    );
    Ok(output)
}

/// 256-bin histogram of a gray plane.
pub fn gray_histogram(plane: &[u8]) -> [u32; 256] {
    let mut histogram = [0u32; 256];
    for &v in plane {
        histogram[v as usize] += 1;
    }
    histogram
}

/// Finds the optimal threshold using Otsu's method by maximizing between-class variance.
///
/// Pixels `<= threshold` form the dark class. Returns `None` when the
/// histogram holds a single class, where no split exists.
pub fn find_otsu_threshold(histogram: &[u32; 256]) -> Option<u8> {
    let mut cumulative_sums = [0f64; 256];
    let mut cumulative_weighted_sums = [0f64; 256];
    let mut cumulative_sum = 0f64;
    let mut cumulative_weighted_sum = 0f64;

    for i in 0..256 {
        let pixel_count = histogram[i] as f64;
        cumulative_sum += pixel_count;
        cumulative_weighted_sum += (i as f64) * pixel_count;
        cumulative_sums[i] = cumulative_sum;
        cumulative_weighted_sums[i] = cumulative_weighted_sum;
    }

    let total_pixels = cumulative_sums[255];
    if total_pixels == 0.0 {
        return None;
    }
    let total_weighted_sum = cumulative_weighted_sums[255];

    let mut max_variance = 0f64;
    let mut optimal_threshold = None;

    for threshold in 0..255 {
        let w0 = cumulative_sums[threshold] / total_pixels;
        let w1 = 1.0 - w0;
        if w0 == 0.0 || w1 <= 0.0 {
            continue;
        }

        let mu0 = cumulative_weighted_sums[threshold] / cumulative_sums[threshold];
        let mu1 = (total_weighted_sum - cumulative_weighted_sums[threshold])
            / (total_pixels - cumulative_sums[threshold]);

        let variance = w0 * w1 * (mu0 - mu1).powi(2);
        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = Some(threshold as u8);
        }
    }

    optimal_threshold
}

/// Ink mask of a gray plane: 255 where the pixel falls in Otsu's dark class,
/// 0 elsewhere. A single-class plane yields an empty mask.
pub fn otsu_ink_mask(plane: &[u8], width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if let Some(threshold) = find_otsu_threshold(&gray_histogram(plane)) {
        for (dst, &v) in mask.iter_mut().zip(plane) {
            *dst = if v <= threshold { 255 } else { 0 };
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal_gradient(width: u32, height: u32) -> PixelBuffer {
        let mut image = PixelBuffer::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let v = (x * 255 / (width - 1)) as u8;
                image.set_pixel(x, y, [v, v, v]);
            }
        }
        image
    }

    #[test]
    fn test_sauvola_output_is_binary() {
        let image = horizontal_gradient(64, 16);
        let output = apply_sauvola(&image, &SauvolaParams::DEFAULT).unwrap();
        assert!(output.data().iter().all(|&v| v == 0 || v == 255));
    }

    #[test]
    fn test_sauvola_flat_fields() {
        let light = PixelBuffer::filled(20, 20, [180, 180, 180]).unwrap();
        let output = apply_sauvola(&light, &SauvolaParams::DEFAULT).unwrap();
        assert!(output.data().iter().all(|&v| v == 255));

        let black = PixelBuffer::filled(20, 20, [0, 0, 0]).unwrap();
        let output = apply_sauvola(&black, &SauvolaParams::DEFAULT).unwrap();
        assert!(output.data().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_sauvola_separates_text_from_paper() {
        let mut image = PixelBuffer::filled(40, 40, [220, 220, 220]).unwrap();
        for y in 15..25 {
            for x in 10..12 {
                image.set_pixel(x, y, [30, 30, 30]);
            }
        }
        let output = apply_sauvola(&image, &SauvolaParams { window_size: 15, k: 0.3 }).unwrap();
        assert_eq!(output.pixel(10, 20), [0, 0, 0]);
        assert_eq!(output.pixel(30, 30), [255, 255, 255]);
    }

    #[test]
    fn test_sauvola_window_larger_than_image() {
        let image = horizontal_gradient(8, 4);
        let params = SauvolaParams {
            window_size: 101,
            k: 0.2,
        };
        let output = apply_sauvola(&image, &params).unwrap();
        assert_eq!(output.dimensions(), (8, 4));
        assert!(apply_sauvola(&image, &SauvolaParams { window_size: 0, k: 0.2 }).is_err());
    }

    #[test]
    fn test_find_otsu_threshold_basic() {
        let mut histogram = [0u32; 256];
        histogram[25] = 5000;
        histogram[225] = 5000;
        let threshold = find_otsu_threshold(&histogram).unwrap();
        assert!((25..225).contains(&threshold));
    }

    #[test]
    fn test_find_otsu_threshold_single_class() {
        let mut histogram = [0u32; 256];
        histogram[128] = 100;
        assert_eq!(find_otsu_threshold(&histogram), None);
        assert_eq!(find_otsu_threshold(&[0u32; 256]), None);
    }

    #[test]
    fn test_otsu_ink_mask_marks_dark_pixels() {
        let mut plane = vec![230u8; 100];
        plane[55] = 20;
        plane[56] = 25;
        let mask = otsu_ink_mask(&plane, 10, 10);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(6, 5)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);

        let flat = otsu_ink_mask(&[120u8; 16], 4, 4);
        assert!(flat.iter().all(|&v| v == 0));
    }
}
