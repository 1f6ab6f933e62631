//! # Image Quality Assessment Module
//!
//! Quality metrics, document condition classification and OCR quality
//! prediction. Every metric is normalised to 0.0-1.0 and computed from a
//! single pass (or a small kernel) over the luminance plane.

use std::time::Instant;

use super::buffer::{PixelBuffer, CHANNELS};
use super::deskewing::detect_skew;
use super::enhancement::LineMasks;
use super::grid::find_ink_components;
use super::moire::periodic_pattern_score;
use super::thresholding::otsu_ink_mask;
use super::types::{
    BackgroundCharacteristics, DocumentAnalysis, DocumentCondition, OcrQualityPrediction,
    ProblemArea, QualityMetrics, RecommendedAction, Rect, TextCharacteristics,
};

/// Score of the `Normal` baseline; a defect must beat it to be reported.
pub const NORMAL_BASELINE_SCORE: f32 = 0.5;

/// Blocks per axis for uniformity and illumination statistics.
const UNIFORMITY_BLOCKS: u32 = 8;

/// Blocks per axis for problem-area detection.
const PREDICTION_BLOCKS: u32 = 4;

/// Smallest side of a problem-area block, in pixels.
const MIN_PREDICTION_BLOCK: u32 = 8;

const NOISY_AREA_THRESHOLD: f32 = 0.15;
const LOW_CONTRAST_AREA_THRESHOLD: f32 = 0.25;

/// Ideal page brightness for the prediction's brightness term.
const TARGET_BRIGHTNESS: f32 = 0.8;

/// Half-open pixel region of a plane.
#[derive(Debug, Clone, Copy)]
struct Region {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl Region {
    fn whole(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
        }
    }

    fn rect(&self) -> Rect {
        Rect::new(
            self.x0 as u32,
            self.y0 as u32,
            (self.x1 - self.x0) as u32,
            (self.y1 - self.y0) as u32,
        )
    }
}

/// Splits `width x height` into an `nx x ny` grid of regions.
fn grid_regions(width: usize, height: usize, nx: usize, ny: usize) -> Vec<Region> {
    let mut regions = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            regions.push(Region {
                x0: i * width / nx,
                y0: j * height / ny,
                x1: (i + 1) * width / nx,
                y1: (j + 1) * height / ny,
            });
        }
    }
    regions
}

/// Mean of the per-pixel channel average, normalised.
pub fn calculate_brightness(image: &PixelBuffer) -> f32 {
    if image.is_empty() {
        return 0.5;
    }
    let mut total = 0u64;
    for y in 0..image.height() {
        for pixel in image.row(y).chunks_exact(CHANNELS) {
            total += pixel[0] as u64 + pixel[1] as u64 + pixel[2] as u64;
        }
    }
    (total as f64 / (image.pixel_count() as f64 * 3.0 * 255.0)) as f32
}

/// Value below which `fraction` of the histogram mass lies.
fn percentile(histogram: &[u32; 256], total: u64, fraction: f64) -> u8 {
    let target = ((total as f64 * fraction).ceil() as u64).max(1);
    let mut seen = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count as u64;
        if seen >= target {
            return value as u8;
        }
    }
    255
}

fn region_contrast(plane: &[u8], width: usize, region: Region) -> f32 {
    let mut histogram = [0u32; 256];
    for y in region.y0..region.y1 {
        for &v in &plane[y * width + region.x0..y * width + region.x1] {
            histogram[v as usize] += 1;
        }
    }
    let total = ((region.x1 - region.x0) * (region.y1 - region.y0)) as u64;
    if total == 0 {
        return 0.0;
    }
    let low = percentile(&histogram, total, 0.01);
    let high = percentile(&histogram, total, 0.99);
    (high - low) as f32 / 255.0
}

/// Robust p1..p99 luminance range.
pub fn calculate_contrast(plane: &[u8], width: usize, height: usize) -> f32 {
    region_contrast(plane, width, Region::whole(width, height))
}

/// Variance of the 4-neighbour Laplacian, scaled by 1/1000 and clamped.
pub fn calculate_sharpness(plane: &[u8], width: usize, height: usize) -> f32 {
    if width < 3 || height < 3 {
        return 0.0;
    }
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    let mut count = 0f64;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = plane[y * width + x] as f64;
            let laplacian = plane[(y - 1) * width + x] as f64
                + plane[(y + 1) * width + x] as f64
                + plane[y * width + x - 1] as f64
                + plane[y * width + x + 1] as f64
                - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1.0;
        }
    }
    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0);
    ((variance / 1000.0) as f32).clamp(0.0, 1.0)
}

/// Impulse pixels of a region: the four neighbours agree within 20 levels and
/// the pixel differs from all of them by more than 50.
fn impulse_share(plane: &[u8], width: usize, height: usize, region: Region) -> f32 {
    let y0 = region.y0.max(1);
    let y1 = region.y1.min(height.saturating_sub(1));
    let x0 = region.x0.max(1);
    let x1 = region.x1.min(width.saturating_sub(1));
    if y0 >= y1 || x0 >= x1 {
        return 0.0;
    }
    let mut impulses = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            let v = plane[y * width + x] as i16;
            let neighbours = [
                plane[(y - 1) * width + x] as i16,
                plane[(y + 1) * width + x] as i16,
                plane[y * width + x - 1] as i16,
                plane[y * width + x + 1] as i16,
            ];
            let lo = *neighbours.iter().min().unwrap_or(&0);
            let hi = *neighbours.iter().max().unwrap_or(&0);
            if hi - lo <= 20 && neighbours.iter().all(|&n| (n - v).abs() > 50) {
                impulses += 1;
            }
        }
    }
    impulses as f32 / ((y1 - y0) * (x1 - x0)) as f32
}

/// Impulse share scaled by 10 and clamped.
pub fn calculate_noise_level(plane: &[u8], width: usize, height: usize) -> f32 {
    (impulse_share(plane, width, height, Region::whole(width, height)) * 10.0).clamp(0.0, 1.0)
}

/// Standard deviation of `values`.
fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}

/// Block means over an 8x8 grid, optionally ignoring masked pixels.
fn block_means(plane: &[u8], width: usize, height: usize, skip: Option<&[u8]>) -> Vec<f32> {
    let nx = (UNIFORMITY_BLOCKS as usize).min(width);
    let ny = (UNIFORMITY_BLOCKS as usize).min(height);
    grid_regions(width, height, nx, ny)
        .into_iter()
        .filter_map(|r| {
            let mut total = 0u64;
            let mut count = 0u64;
            for y in r.y0..r.y1 {
                for x in r.x0..r.x1 {
                    let i = y * width + x;
                    if skip.is_some_and(|m| m[i] != 0) {
                        continue;
                    }
                    total += plane[i] as u64;
                    count += 1;
                }
            }
            (count > 0).then(|| total as f32 / count as f32)
        })
        .collect()
}

/// `1 - std(block means) / 64`, clamped.
pub fn calculate_uniformity(plane: &[u8], width: usize, height: usize) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    (1.0 - std_dev(&block_means(plane, width, height, None)) / 64.0).clamp(0.0, 1.0)
}

/// Computes all five metrics.
pub fn calculate_metrics(image: &PixelBuffer) -> QualityMetrics {
    if image.is_empty() {
        return QualityMetrics::default();
    }
    let width = image.width() as usize;
    let height = image.height() as usize;
    let plane = image.gray_plane();
    QualityMetrics {
        brightness: calculate_brightness(image),
        contrast: calculate_contrast(&plane, width, height),
        sharpness: calculate_sharpness(&plane, width, height),
        noise_level: calculate_noise_level(&plane, width, height),
        uniformity: calculate_uniformity(&plane, width, height),
    }
}

/// Maps metrics to an estimated OCR accuracy.
pub fn estimate_accuracy(metrics: &QualityMetrics) -> f32 {
    let brightness_score =
        (1.0 - (metrics.brightness - TARGET_BRIGHTNESS).abs() / TARGET_BRIGHTNESS).clamp(0.0, 1.0);
    let score = 0.35 * metrics.contrast
        + 0.25 * (4.0 * metrics.sharpness).min(1.0)
        + 0.2 * (1.0 - metrics.noise_level)
        + 0.1 * metrics.uniformity
        + 0.1 * brightness_score;
    score.clamp(0.0, 1.0)
}

/// Picks the follow-up pass for a low prediction: noise first, then the
/// first recommendation, then text enhancement.
pub fn choose_retry_action(prediction: &OcrQualityPrediction) -> RecommendedAction {
    if prediction.problematic_areas.iter().any(|a| a.noisy) {
        RecommendedAction::ReduceNoise
    } else {
        prediction
            .recommended_actions
            .first()
            .copied()
            .unwrap_or(RecommendedAction::EnhanceText)
    }
}

/// Per-condition detector scores.
struct ConditionEvidence {
    moire: f32,
    show_through: f32,
    dot_matrix: f32,
    aging: f32,
    grid: f32,
    skew: f32,
    illumination: f32,
}

impl ConditionEvidence {
    fn score(&self, condition: DocumentCondition) -> f32 {
        match condition {
            DocumentCondition::Normal => NORMAL_BASELINE_SCORE,
            DocumentCondition::MoirePattern => self.moire,
            DocumentCondition::ShowThrough => self.show_through,
            DocumentCondition::DotMatrix => self.dot_matrix,
            DocumentCondition::AgedDocument => self.aging,
            DocumentCondition::GridBackground => self.grid,
            DocumentCondition::SkewedDocument => self.skew,
            DocumentCondition::PoorIllumination => self.illumination,
            DocumentCondition::InkBleed | DocumentCondition::Watermarked => 0.0,
        }
    }
}

/// Stateless analyzer; one instance can serve any number of pipeline runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Computes the metrics, the ink and paper characteristics, and the
    /// dominant condition (highest score, declaration order on ties).
    ///
    /// A zero-area buffer yields the default (Normal) analysis.
    pub fn analyze(&self, image: &PixelBuffer) -> DocumentAnalysis {
        if image.is_empty() {
            return DocumentAnalysis::default();
        }
        let start_time = Instant::now();

        let (w, h) = image.dimensions();
        let width = w as usize;
        let height = h as usize;
        let plane = image.gray_plane();
        let metrics = calculate_metrics(image);
        let mask = otsu_ink_mask(&plane, w, h);
        let ink = mask.as_raw();
        let ink_pixels = ink.iter().filter(|&&v| v != 0).count();
        let pixel_count = width * height;

        let components = find_ink_components(&mask);
        let mut short_sides: Vec<u32> = components
            .iter()
            .map(|c| c.bounds.width.min(c.bounds.height))
            .collect();
        short_sides.sort_unstable();
        let text_characteristics = TextCharacteristics {
            ink_ratio: ink_pixels as f32 / pixel_count as f32,
            estimated_stroke_width: short_sides.get(short_sides.len() / 2).copied().unwrap_or(0) as f32,
            component_count: components.len(),
        };

        let mut paper_luma = 0u64;
        let mut cast = 0f64;
        let mut paper_pixels = 0u64;
        for y in 0..h {
            for (x, pixel) in image.row(y).chunks_exact(CHANNELS).enumerate() {
                if ink[y as usize * width + x] != 0 {
                    continue;
                }
                paper_luma += plane[y as usize * width + x] as u64;
                cast += (pixel[0] as f64 + pixel[1] as f64) / 2.0 - pixel[2] as f64;
                paper_pixels += 1;
            }
        }
        let paper_means = block_means(&plane, width, height, Some(ink));
        let background_characteristics = if paper_pixels == 0 {
            BackgroundCharacteristics::default()
        } else {
            BackgroundCharacteristics {
                mean_luminance: (paper_luma as f64 / paper_pixels as f64 / 255.0) as f32,
                yellow_cast: (cast / paper_pixels as f64 / 255.0) as f32,
                variation: (std_dev(&paper_means) / 64.0).clamp(0.0, 1.0),
            }
        };

        let skew = detect_skew(&plane, w, h);
        let evidence = ConditionEvidence {
            moire: periodic_pattern_score(&plane, width, height),
            show_through: show_through_score(&plane, width, &background_characteristics),
            dot_matrix: dot_matrix_score(&components),
            aging: aging_score(&background_characteristics),
            grid: grid_score(&plane, w, h, ink_pixels),
            skew: skew_score(skew.angle_degrees, skew.confidence),
            illumination: (background_characteristics.variation * 2.5).clamp(0.0, 1.0),
        };

        let condition_scores: Vec<(DocumentCondition, f32)> = DocumentCondition::ALL
            .iter()
            .map(|&c| (c, evidence.score(c)))
            .collect();
        let mut condition = DocumentCondition::Normal;
        let mut best = f32::NEG_INFINITY;
        for &(candidate, score) in &condition_scores {
            if score > best {
                best = score;
                condition = candidate;
            }
        }

        tracing::debug!(
            target: "ocr_preprocessing",
            "Document analysis completed in {:.2}ms: condition={}, score={:.3}, contrast={:.3}, noise={:.3}",
            start_time.elapsed().as_secs_f64() * 1000.0,
            condition.as_str(),
            best,
            metrics.contrast,
            metrics.noise_level
        );

        DocumentAnalysis {
            condition,
            metrics,
            text_characteristics,
            background_characteristics,
            skew_angle_degrees: skew.angle_degrees,
            condition_scores,
        }
    }

    /// Predicts OCR accuracy of a (processed) image and flags weak blocks.
    pub fn predict_ocr_quality(&self, image: &PixelBuffer) -> OcrQualityPrediction {
        let metrics = calculate_metrics(image);
        let mut problematic_areas = Vec::new();

        if !image.is_empty() {
            let (w, h) = image.dimensions();
            let width = w as usize;
            let height = h as usize;
            let plane = image.gray_plane();
            let mask = otsu_ink_mask(&plane, w, h);
            let ink = mask.as_raw();
            let nx = PREDICTION_BLOCKS.min(w / MIN_PREDICTION_BLOCK).max(1) as usize;
            let ny = PREDICTION_BLOCKS.min(h / MIN_PREDICTION_BLOCK).max(1) as usize;

            for region in grid_regions(width, height, nx, ny) {
                let noise = (impulse_share(&plane, width, height, region) * 10.0).clamp(0.0, 1.0);
                let area = (region.x1 - region.x0) * (region.y1 - region.y0);
                let inked = (region.y0..region.y1)
                    .map(|y| ink[y * width + region.x0..y * width + region.x1].iter().filter(|&&v| v != 0).count())
                    .sum::<usize>();
                let has_ink = inked * 50 >= area;
                let noisy = noise > NOISY_AREA_THRESHOLD;
                let low_contrast = has_ink && region_contrast(&plane, width, region) < LOW_CONTRAST_AREA_THRESHOLD;
                if noisy || low_contrast {
                    problematic_areas.push(ProblemArea {
                        region: region.rect(),
                        noisy,
                        low_contrast,
                    });
                }
            }
        }

        let mut recommended_actions = Vec::new();
        if metrics.contrast < 0.5 || problematic_areas.iter().any(|a| a.low_contrast) {
            recommended_actions.push(RecommendedAction::IncreaseContrast);
        }
        if metrics.noise_level > NOISY_AREA_THRESHOLD || problematic_areas.iter().any(|a| a.noisy) {
            recommended_actions.push(RecommendedAction::ReduceNoise);
        }
        if metrics.sharpness < 0.125 {
            recommended_actions.push(RecommendedAction::EnhanceText);
        }
        if metrics.brightness < 0.6 {
            recommended_actions.push(RecommendedAction::WhitenBackground);
        }

        OcrQualityPrediction {
            estimated_accuracy: estimate_accuracy(&metrics),
            problematic_areas,
            recommended_actions,
            metrics,
        }
    }
}

/// Depth range below the paper level that counts as a faint tone.
const FAINT_MIN_DEPTH: f32 = 20.0;
const FAINT_MAX_DEPTH: f32 = 110.0;
/// Largest step to the right and lower neighbours inside a faint patch.
const FAINT_FLATNESS: u8 = 8;
const SHOW_THROUGH_GAIN: f32 = 16.0;

/// Flat faint patches on an otherwise bright, even page.
///
/// Bleed-through appears as smooth areas a little darker than the paper.
/// A pixel counts only when its right and lower neighbours carry nearly the
/// same tone, which rules out halftone screens and the rims of dark text.
fn show_through_score(plane: &[u8], width: usize, background: &BackgroundCharacteristics) -> f32 {
    if background.mean_luminance < 0.75 || background.variation > 0.2 || plane.is_empty() || width == 0 {
        return 0.0;
    }
    let paper = background.mean_luminance * 255.0;
    let is_faint = |v: u8| {
        let depth = paper - v as f32;
        (FAINT_MIN_DEPTH..=FAINT_MAX_DEPTH).contains(&depth)
    };
    let height = plane.len() / width;
    let mut flat_faint = 0usize;
    for y in 0..height.saturating_sub(1) {
        for x in 0..width - 1 {
            let v = plane[y * width + x];
            if is_faint(v)
                && v.abs_diff(plane[y * width + x + 1]) <= FAINT_FLATNESS
                && v.abs_diff(plane[(y + 1) * width + x]) <= FAINT_FLATNESS
            {
                flat_faint += 1;
            }
        }
    }
    (flat_faint as f32 / plane.len() as f32 * SHOW_THROUGH_GAIN).clamp(0.0, 1.0)
}

/// Share of tiny ink blobs, given enough blobs to judge.
fn dot_matrix_score(components: &[super::grid::InkComponent]) -> f32 {
    if components.len() < 20 {
        return 0.0;
    }
    let tiny = components.iter().filter(|c| c.area <= 4).count();
    tiny as f32 / components.len() as f32
}

/// Yellowed paper on a light page.
fn aging_score(background: &BackgroundCharacteristics) -> f32 {
    if background.mean_luminance < 0.6 {
        return 0.0;
    }
    (background.yellow_cast * 6.0).clamp(0.0, 1.0)
}

/// Long, thin axis-aligned ink runs in both directions. Pixels inside runs
/// of both orientations belong to solid blobs and are ignored.
fn grid_score(plane: &[u8], width: u32, height: u32, ink_pixels: usize) -> f32 {
    if ink_pixels == 0 {
        return 0.0;
    }
    let lines = LineMasks::detect(plane, width, height);
    let mut horizontal = 0usize;
    let mut vertical = 0usize;
    for (&h, &v) in lines.horizontal.iter().zip(&lines.vertical) {
        match (h, v) {
            (true, false) => horizontal += 1,
            (false, true) => vertical += 1,
            _ => {}
        }
    }
    let line_share = (horizontal + vertical) as f32 / ink_pixels as f32;
    if horizontal > 0 && vertical > 0 {
        (0.4 + line_share).clamp(0.0, 1.0)
    } else {
        (line_share * 0.5).clamp(0.0, 1.0)
    }
}

fn skew_score(angle_degrees: f32, confidence: f32) -> f32 {
    let angle = angle_degrees.abs();
    if angle < 1.0 {
        return 0.0;
    }
    ((0.45 + angle / 10.0).min(1.0) * (0.5 + confidence / 2.0)).clamp(0.0, 1.0)
}
