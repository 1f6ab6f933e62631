//! # Contrast-Limited Adaptive Histogram Equalization
//!
//! Two phases separated by a barrier. Phase one builds a clipped histogram and
//! a lookup table per tile (tiles in parallel). Phase two maps every pixel
//! through the four nearest tile tables and blends them bilinearly (rows in
//! parallel). The luminance result is broadcast to all three channels.

use std::time::Instant;

use rayon::prelude::*;

use super::buffer::PixelBuffer;
use super::options::ClaheParams;
use super::types::PreprocessingError;

/// Absolute per-bin limit for a tile of `tile_pixels` pixels.
///
/// `clip_limit` is a multiple of the uniform bin height `tile_pixels / 256`.
pub fn clip_limit_count(clip_limit: f32, tile_pixels: usize) -> u32 {
    ((clip_limit as f64 * tile_pixels as f64 / 256.0).round() as u32).max(1)
}

/// Caps every bin at `limit` and spreads the excess over the bins that still
/// have room. Mass that fits nowhere is dropped.
pub fn clip_histogram(histogram: &mut [u32; 256], limit: u32) {
    let mut excess: u64 = 0;
    for count in histogram.iter_mut() {
        if *count > limit {
            excess += (*count - limit) as u64;
            *count = limit;
        }
    }

    while excess > 0 {
        let open = histogram.iter().filter(|&&c| c < limit).count() as u64;
        if open == 0 {
            break;
        }
        let share = (excess / open).max(1);
        for count in histogram.iter_mut() {
            if excess == 0 {
                break;
            }
            if *count < limit {
                let room = (limit - *count) as u64;
                let add = share.min(room).min(excess);
                *count += add as u32;
                excess -= add;
            }
        }
    }
}

/// Half-open tile bounds along one axis.
#[inline]
fn tile_span(index: usize, tiles: usize, extent: usize) -> (usize, usize) {
    (index * extent / tiles, (index + 1) * extent / tiles)
}

/// Phase-one output: clipped histograms and lookup tables per tile.
#[derive(Debug, Clone)]
pub struct ClaheTiles {
    tiles_x: usize,
    tiles_y: usize,
    histograms: Vec<[u32; 256]>,
    limits: Vec<u32>,
    tables: Vec<[u8; 256]>,
}

impl ClaheTiles {
    /// Builds every tile's clipped histogram and equalisation table.
    pub fn build(
        plane: &[u8],
        width: usize,
        height: usize,
        tiles_x: usize,
        tiles_y: usize,
        clip_limit: f32,
    ) -> Self {
        let results: Vec<([u32; 256], u32, [u8; 256])> = (0..tiles_x * tiles_y)
            .into_par_iter()
            .map(|index| {
                let (x0, x1) = tile_span(index % tiles_x, tiles_x, width);
                let (y0, y1) = tile_span(index / tiles_x, tiles_y, height);
                let mut histogram = [0u32; 256];
                for y in y0..y1 {
                    for &v in &plane[y * width + x0..y * width + x1] {
                        histogram[v as usize] += 1;
                    }
                }
                let limit = clip_limit_count(clip_limit, (x1 - x0) * (y1 - y0));
                clip_histogram(&mut histogram, limit);

                let total: u64 = histogram.iter().map(|&c| c as u64).sum();
                let mut table = [0u8; 256];
                let mut cumulative = 0u64;
                for (entry, &count) in table.iter_mut().zip(histogram.iter()) {
                    cumulative += count as u64;
                    *entry = if total == 0 {
                        0
                    } else {
                        ((cumulative as f64 * 255.0) / total as f64).round() as u8
                    };
                }
                (histogram, limit, table)
            })
            .collect();

        let mut histograms = Vec::with_capacity(results.len());
        let mut limits = Vec::with_capacity(results.len());
        let mut tables = Vec::with_capacity(results.len());
        for (histogram, limit, table) in results {
            histograms.push(histogram);
            limits.push(limit);
            tables.push(table);
        }
        Self {
            tiles_x,
            tiles_y,
            histograms,
            limits,
            tables,
        }
    }

    pub fn tile_grid(&self) -> (usize, usize) {
        (self.tiles_x, self.tiles_y)
    }

    /// Clipped histograms paired with their bin limits, row-major over tiles.
    pub fn clipped_histograms(&self) -> impl Iterator<Item = (&[u32; 256], u32)> {
        self.histograms.iter().zip(self.limits.iter().copied())
    }

    #[inline]
    fn table(&self, tx: usize, ty: usize) -> &[u8; 256] {
        &self.tables[ty * self.tiles_x + tx]
    }
}

/// Fractional tile coordinate of a pixel centre, as (lower index, upper index, weight).
#[inline]
fn tile_position(coord: usize, extent: usize, tiles: usize) -> (usize, usize, f32) {
    let tile_extent = extent as f32 / tiles as f32;
    let g = ((coord as f32 + 0.5) / tile_extent - 0.5).clamp(0.0, (tiles - 1) as f32);
    let lower = g.floor() as usize;
    let upper = (lower + 1).min(tiles - 1);
    (lower, upper, g - lower as f32)
}

/// Applies CLAHE to the luminance of `image`.
///
/// A tile count larger than the image's smaller side is clamped to it.
///
/// # Errors
///
/// Returns `PreprocessingError::InvalidInput` for an empty buffer, a zero
/// tile count, or a non-positive clip limit.
pub fn apply_clahe(
    image: &PixelBuffer,
    params: &ClaheParams,
) -> Result<PixelBuffer, PreprocessingError> {
    image.ensure_processable()?;
    if params.tile_count == 0 {
        return Err(PreprocessingError::invalid("CLAHE tile count must be > 0"));
    }
    if !(params.clip_limit > 0.0) || !params.clip_limit.is_finite() {
        return Err(PreprocessingError::invalid(format!(
            "invalid CLAHE clip limit: {}. Must be > 0.0",
            params.clip_limit
        )));
    }
    let start_time = Instant::now();

    let width = image.width() as usize;
    let height = image.height() as usize;
    let max_tiles = width.min(height);
    let tiles = (params.tile_count as usize).min(max_tiles);
    if tiles < params.tile_count as usize {
        tracing::warn!(
            target: "ocr_preprocessing",
            "CLAHE tile count {} exceeds image side {}, clamped",
            params.tile_count,
            max_tiles
        );
    }

    let plane = image.gray_plane();
    let lookup = ClaheTiles::build(&plane, width, height, tiles, tiles, params.clip_limit);

    let columns: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| tile_position(x, width, tiles))
        .collect();

    let output = image.map_rows(|y, _, dst| {
        let (ty0, ty1, wy) = tile_position(y, height, tiles);
        let src = &plane[y * width..(y + 1) * width];
        for (x, (out, &v)) in dst.chunks_exact_mut(3).zip(src).enumerate() {
            let (tx0, tx1, wx) = columns[x];
            let v = v as usize;
            let top = lookup.table(tx0, ty0)[v] as f32 * (1.0 - wx)
                + lookup.table(tx1, ty0)[v] as f32 * wx;
            let bottom = lookup.table(tx0, ty1)[v] as f32 * (1.0 - wx)
                + lookup.table(tx1, ty1)[v] as f32 * wx;
            let value = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
            out.fill(value);
        }
    })?;

    tracing::debug!(
        target: "ocr_preprocessing",
        "CLAHE applied in {:.2}ms: clip_limit={}, tiles={}x{}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        params.clip_limit,
        tiles,
        tiles
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn low_contrast_ramp(width: u32, height: u32) -> PixelBuffer {
        let mut image = PixelBuffer::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let v = 100 + ((x + y) % 40) as u8;
                image.set_pixel(x, y, [v, v, v]);
            }
        }
        image
    }

    #[test]
    fn test_clip_limit_scales_with_tile_area() {
        // Multiple of the uniform bin height, not an absolute count
        assert_eq!(clip_limit_count(2.0, 64 * 64), 32);
        assert_eq!(clip_limit_count(2.0, 128 * 128), 128);
        assert_eq!(clip_limit_count(4.0, 64 * 64), 64);
        // Never below one pixel per bin
        assert_eq!(clip_limit_count(0.5, 16), 1);
    }

    #[test]
    fn test_clip_histogram_respects_limit() {
        let mut histogram = [0u32; 256];
        histogram[10] = 900;
        histogram[200] = 100;
        clip_histogram(&mut histogram, 20);
        assert!(histogram.iter().all(|&c| c <= 20));
        // 1000 pixels fit into 256 * 20 slots, so nothing is lost
        assert_eq!(histogram.iter().sum::<u32>(), 1000);
    }

    #[test]
    fn test_clip_histogram_drops_mass_without_room() {
        let mut histogram = [0u32; 256];
        histogram[0] = 10_000;
        clip_histogram(&mut histogram, 2);
        assert!(histogram.iter().all(|&c| c == 2));
    }

    #[test]
    fn test_clahe_stretches_low_contrast_input() {
        let image = low_contrast_ramp(64, 64);
        let params = ClaheParams {
            clip_limit: 4.0,
            tile_count: 4,
        };
        let output = apply_clahe(&image, &params).unwrap();
        let min = output.data().iter().copied().min().unwrap();
        let max = output.data().iter().copied().max().unwrap();
        assert!(max - min > 39, "range {}..{}", min, max);
        assert_eq!(output.dimensions(), image.dimensions());
    }

    #[test]
    fn test_clahe_tile_count_is_clamped() {
        let image = low_contrast_ramp(5, 3);
        let params = ClaheParams {
            clip_limit: 2.0,
            tile_count: 16,
        };
        let output = apply_clahe(&image, &params).unwrap();
        assert_eq!(output.dimensions(), (5, 3));
    }

    #[test]
    fn test_clahe_rejects_bad_parameters() {
        let image = low_contrast_ramp(8, 8);
        let zero_tiles = ClaheParams {
            clip_limit: 2.0,
            tile_count: 0,
        };
        assert!(apply_clahe(&image, &zero_tiles).is_err());
        let zero_clip = ClaheParams {
            clip_limit: 0.0,
            tile_count: 2,
        };
        assert!(apply_clahe(&image, &zero_clip).is_err());
    }

    #[test]
    fn test_tiles_report_limits() {
        let plane: Vec<u8> = (0..32 * 32).map(|i| if i % 7 == 0 { 0 } else { 255 }).collect();
        let tiles = ClaheTiles::build(&plane, 32, 32, 4, 4, 1.5);
        assert_eq!(tiles.tile_grid(), (4, 4));
        for (histogram, limit) in tiles.clipped_histograms() {
            assert!(histogram.iter().all(|&c| c <= limit));
        }
    }
}
