//! # Grid-Line Removal
//!
//! Ruled lines and form grids confuse OCR layout analysis. Candidates come
//! from a Hough transform over the Otsu ink mask and are snapped to the
//! actual ink band. Text is located with connected components computed with
//! the candidate bands masked out, and a line is erased only when no text box
//! touches it. Strokes that cross an erased line are bridged afterwards.

use std::time::Instant;

use image::{GrayImage, Luma};
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::buffer::PixelBuffer;
use super::options::GridParams;
use super::thresholding::otsu_ink_mask;
use super::types::{PreprocessingError, Rect};

/// Rows/columns a Hough line is allowed to sit from the real ink band.
const SNAP_RANGE: i64 = 2;

/// A band row/column joins the line when this share of its span is ink.
const BAND_COVERAGE: f32 = 0.6;

/// Widest band grown on either side of the line's core row/column.
const MAX_BAND_GROWTH: u32 = 8;

/// Gaps up to this length do not break an ink run.
const RUN_GAP_TOLERANCE: u32 = 2;

/// Connected ink blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InkComponent {
    pub bounds: Rect,
    pub area: u32,
}

/// Labels 8-connected ink blobs of a mask (ink = non-zero).
pub fn find_ink_components(mask: &GrayImage) -> Vec<InkComponent> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut boxes: Vec<(u32, u32, u32, u32, u32)> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if boxes.len() < label {
            boxes.resize(label, (u32::MAX, u32::MAX, 0, 0, 0));
        }
        let entry = &mut boxes[label - 1];
        entry.0 = entry.0.min(x);
        entry.1 = entry.1.min(y);
        entry.2 = entry.2.max(x);
        entry.3 = entry.3.max(y);
        entry.4 += 1;
    }
    boxes
        .into_iter()
        .filter(|b| b.4 > 0)
        .map(|(x0, y0, x1, y1, area)| InkComponent {
            bounds: Rect::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1),
            area,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrientation {
    Horizontal,
    Vertical,
}

/// Ink band of one detected line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLine {
    pub orientation: LineOrientation,
    /// Pixels covered by the line
    pub band: Rect,
}

/// Outcome of grid-line removal.
#[derive(Debug, Clone)]
pub struct GridRemovalResult {
    pub image: PixelBuffer,
    pub removed: Vec<GridLine>,
    pub protected: Vec<GridLine>,
    pub text_regions: Vec<Rect>,
}

/// Read-only view of the ink mask along one orientation, so horizontal and
/// vertical lines share the same scanning code.
struct AxisView<'a> {
    mask: &'a GrayImage,
    orientation: LineOrientation,
}

impl AxisView<'_> {
    /// Length along the line direction.
    fn length(&self) -> u32 {
        match self.orientation {
            LineOrientation::Horizontal => self.mask.width(),
            LineOrientation::Vertical => self.mask.height(),
        }
    }

    /// Number of parallel rows/columns.
    fn lanes(&self) -> u32 {
        match self.orientation {
            LineOrientation::Horizontal => self.mask.height(),
            LineOrientation::Vertical => self.mask.width(),
        }
    }

    fn ink(&self, lane: u32, along: u32) -> bool {
        let (x, y) = match self.orientation {
            LineOrientation::Horizontal => (along, lane),
            LineOrientation::Vertical => (lane, along),
        };
        self.mask.get_pixel(x, y)[0] != 0
    }

    /// Longest run in a lane, bridging short gaps. Returns `(start, end)`.
    fn longest_run(&self, lane: u32) -> (u32, u32) {
        let mut best = (0, 0);
        let mut start = None;
        let mut last_ink = 0;
        for along in 0..self.length() {
            if self.ink(lane, along) {
                if start.is_none() {
                    start = Some(along);
                }
                last_ink = along;
            } else if let Some(s) = start {
                if along - last_ink > RUN_GAP_TOLERANCE {
                    if last_ink + 1 - s > best.1 - best.0 {
                        best = (s, last_ink + 1);
                    }
                    start = None;
                }
            }
        }
        if let Some(s) = start {
            if last_ink + 1 - s > best.1 - best.0 {
                best = (s, last_ink + 1);
            }
        }
        best
    }

    fn coverage(&self, lane: u32, span: (u32, u32)) -> f32 {
        let inked = (span.0..span.1).filter(|&a| self.ink(lane, a)).count();
        inked as f32 / (span.1 - span.0).max(1) as f32
    }

    fn band_rect(&self, lanes: (u32, u32), span: (u32, u32)) -> Rect {
        match self.orientation {
            LineOrientation::Horizontal => Rect::new(span.0, lanes.0, span.1 - span.0, lanes.1 - lanes.0),
            LineOrientation::Vertical => Rect::new(lanes.0, span.0, lanes.1 - lanes.0, span.1 - span.0),
        }
    }

    /// Snaps an approximate lane to the real ink band.
    fn snap(&self, approx: i64, min_length: u32) -> Option<GridLine> {
        let lanes = self.lanes() as i64;
        let (lane, span) = (approx - SNAP_RANGE..=approx + SNAP_RANGE)
            .filter(|&l| l >= 0 && l < lanes)
            .map(|l| (l as u32, self.longest_run(l as u32)))
            .max_by(|a, b| {
                let la = a.1 .1 - a.1 .0;
                let lb = b.1 .1 - b.1 .0;
                // Prefer the first lane on ties
                la.cmp(&lb).then(b.0.cmp(&a.0))
            })?;
        if span.1 - span.0 < min_length {
            return None;
        }

        let mut first = lane;
        while first > 0 && lane - first < MAX_BAND_GROWTH && self.coverage(first - 1, span) >= BAND_COVERAGE {
            first -= 1;
        }
        let mut last = lane + 1;
        while last < self.lanes()
            && last - lane <= MAX_BAND_GROWTH
            && self.coverage(last, span) >= BAND_COVERAGE
        {
            last += 1;
        }

        Some(GridLine {
            orientation: self.orientation,
            band: self.band_rect((first, last), span),
        })
    }
}

fn intersects(a: &Rect, b: &Rect) -> bool {
    a.x < b.right() && b.x < a.right() && a.y < b.bottom() && b.y < a.bottom()
}

/// Classifies a Hough line as near-horizontal or near-vertical with its
/// approximate lane. Other angles are ignored.
fn axis_candidate(line: &PolarLine) -> Option<(LineOrientation, i64)> {
    let r = line.r.round() as i64;
    match line.angle_in_degrees {
        89..=91 => Some((LineOrientation::Horizontal, r)),
        0 | 1 => Some((LineOrientation::Vertical, r)),
        179 => Some((LineOrientation::Vertical, -r)),
        _ => None,
    }
}

/// Detects axis-aligned ruled lines on an ink mask.
pub fn detect_grid_lines(mask: &GrayImage, params: &GridParams) -> Vec<GridLine> {
    let (width, height) = mask.dimensions();
    let min_length = ((params.min_line_fraction * width.min(height) as f32).round() as u32).max(1);
    let options = LineDetectionOptions {
        vote_threshold: min_length.max(20),
        suppression_radius: 8,
    };

    let mut lines: Vec<GridLine> = Vec::new();
    for polar in detect_lines(mask, options) {
        let Some((orientation, approx)) = axis_candidate(&polar) else {
            continue;
        };
        let view = AxisView { mask, orientation };
        if let Some(line) = view.snap(approx, min_length) {
            if !lines.iter().any(|l| l.orientation == line.orientation && intersects(&l.band, &line.band)) {
                lines.push(line);
            }
        }
    }
    lines
}

/// Text boxes: ink components outside line bands that look like glyphs.
fn find_text_regions(mask: &GrayImage, lines: &[GridLine], params: &GridParams) -> Vec<Rect> {
    let mut text_mask = mask.clone();
    for line in lines {
        for y in line.band.y..line.band.bottom() {
            for x in line.band.x..line.band.right() {
                text_mask.put_pixel(x, y, Luma([0]));
            }
        }
    }
    let (width, height) = mask.dimensions();
    let max_extent = ((params.max_text_fraction * width.min(height) as f32) as u32).max(8);
    find_ink_components(&text_mask)
        .into_iter()
        .filter(|c| c.area >= params.min_text_area && c.bounds.width.max(c.bounds.height) <= max_extent)
        .map(|c| c.bounds)
        .collect()
}

/// Per-channel median of the non-ink pixels.
fn paper_color(image: &PixelBuffer, mask: &GrayImage) -> [u8; 3] {
    let mut histograms = [[0u32; 256]; 3];
    let mut total = 0u32;
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] == 0 {
            let pixel = image.pixel(x, y);
            for c in 0..3 {
                histograms[c][pixel[c] as usize] += 1;
            }
            total += 1;
        }
    }
    if total == 0 {
        return [255, 255, 255];
    }
    let mut color = [255u8; 3];
    for c in 0..3 {
        let mut seen = 0;
        for (v, &count) in histograms[c].iter().enumerate() {
            seen += count;
            if seen * 2 > total {
                color[c] = v as u8;
                break;
            }
        }
    }
    color
}

fn lerp(a: [u8; 3], b: [u8; 3], t: f32) -> [u8; 3] {
    let mut out = [0u8; 3];
    for c in 0..3 {
        out[c] = (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
    }
    out
}

/// Paints a line band with the paper color.
fn erase_band(output: &mut PixelBuffer, line: &GridLine, paper: [u8; 3]) {
    let band = line.band;
    for y in band.y..band.bottom() {
        for x in band.x..band.right() {
            output.set_pixel(x, y, paper);
        }
    }
}

/// Bridges strokes that crossed an erased band: where the pixels on both
/// sides of the band are ink (and not themselves erased), the band is filled
/// by interpolating between them. Returns the number of bridged positions.
fn bridge_crossings(
    output: &mut PixelBuffer,
    source: &PixelBuffer,
    mask: &GrayImage,
    erased: &[bool],
    line: &GridLine,
) -> usize {
    let width = source.width();
    let is_stroke = |x: u32, y: u32| mask.get_pixel(x, y)[0] != 0 && !erased[(y * width + x) as usize];
    let band = line.band;
    let mut bridged = 0;
    match line.orientation {
        LineOrientation::Horizontal => {
            if band.y == 0 || band.bottom() >= source.height() {
                return 0;
            }
            let (above, below) = (band.y - 1, band.bottom());
            let span = (below - above) as f32;
            for x in band.x..band.right() {
                if is_stroke(x, above) && is_stroke(x, below) {
                    let (a, b) = (source.pixel(x, above), source.pixel(x, below));
                    for y in band.y..band.bottom() {
                        output.set_pixel(x, y, lerp(a, b, (y - above) as f32 / span));
                    }
                    bridged += 1;
                }
            }
        }
        LineOrientation::Vertical => {
            if band.x == 0 || band.right() >= width {
                return 0;
            }
            let (left, right) = (band.x - 1, band.right());
            let span = (right - left) as f32;
            for y in band.y..band.bottom() {
                if is_stroke(left, y) && is_stroke(right, y) {
                    let (a, b) = (source.pixel(left, y), source.pixel(right, y));
                    for x in band.x..band.right() {
                        output.set_pixel(x, y, lerp(a, b, (x - left) as f32 / span));
                    }
                    bridged += 1;
                }
            }
        }
    }
    bridged
}

/// Removes grid lines that do not touch any text region.
///
/// # Errors
///
/// `InvalidInput` for an empty buffer or a non-positive line fraction.
pub fn remove_grid_lines(image: &PixelBuffer, params: &GridParams) -> Result<GridRemovalResult, PreprocessingError> {
    image.ensure_processable()?;
    if !(params.min_line_fraction > 0.0) || !(params.max_text_fraction > 0.0) {
        return Err(PreprocessingError::invalid(
            "grid removal needs positive line and text fractions",
        ));
    }
    let start_time = Instant::now();

    let (width, height) = image.dimensions();
    let mask = otsu_ink_mask(&image.gray_plane(), width, height);
    let lines = detect_grid_lines(&mask, params);
    let text_regions: Vec<Rect> = find_text_regions(&mask, &lines, params)
        .into_iter()
        .map(|r| r.expanded(params.text_margin, width, height))
        .collect();

    let mut output = image.clone();
    let paper = paper_color(image, &mask);
    let (protected, removed): (Vec<GridLine>, Vec<GridLine>) = lines
        .into_iter()
        .partition(|line| text_regions.iter().any(|t| intersects(t, &line.band)));

    let mut erased = vec![false; image.pixel_count()];
    for line in &removed {
        erase_band(&mut output, line, paper);
        for y in line.band.y..line.band.bottom() {
            for x in line.band.x..line.band.right() {
                erased[(y * width + x) as usize] = true;
            }
        }
    }
    let repaired: usize = removed
        .iter()
        .map(|line| bridge_crossings(&mut output, image, &mask, &erased, line))
        .sum();

    tracing::debug!(
        target: "ocr_preprocessing",
        "Grid-line removal completed in {:.2}ms: removed={}, protected={}, text_regions={}, repaired={}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        removed.len(),
        protected.len(),
        text_regions.len(),
        repaired
    );

    Ok(GridRemovalResult {
        image: output,
        removed,
        protected,
        text_regions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INK: [u8; 3] = [20, 20, 20];

    fn form_page() -> PixelBuffer {
        let mut image = PixelBuffer::filled(120, 120, [250, 250, 250]).unwrap();
        for x in 0..120 {
            image.set_pixel(x, 60, INK);
            image.set_pixel(x, 61, INK);
        }
        for y in 0..120 {
            image.set_pixel(30, y, INK);
        }
        image
    }

    fn draw_block(image: &mut PixelBuffer, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.set_pixel(x, y, INK);
            }
        }
    }

    #[test]
    fn test_find_ink_components() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(1, 1, Luma([255]));
        mask.put_pixel(2, 2, Luma([255]));
        mask.put_pixel(7, 7, Luma([255]));
        let mut components = find_ink_components(&mask);
        components.sort_by_key(|c| c.bounds.x);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].bounds, Rect::new(1, 1, 2, 2));
        assert_eq!(components[0].area, 2);
    }

    #[test]
    fn test_lines_away_from_text_are_removed() {
        let mut image = form_page();
        for i in 0..4 {
            draw_block(&mut image, 80 + i * 5, 20, 3, 5);
        }
        let result = remove_grid_lines(&image, &GridParams::DEFAULT).unwrap();
        assert_eq!(result.removed.len(), 2);
        assert!(result.protected.is_empty());
        assert_eq!(result.image.pixel(10, 60), [250, 250, 250]);
        assert_eq!(result.image.pixel(30, 100), [250, 250, 250]);
        // Glyphs survive
        assert_eq!(result.image.pixel(81, 22), INK);
    }

    #[test]
    fn test_line_touching_text_is_protected() {
        let mut image = form_page();
        draw_block(&mut image, 50, 55, 3, 11);
        let result = remove_grid_lines(&image, &GridParams::DEFAULT).unwrap();

        assert_eq!(result.protected.len(), 1);
        assert_eq!(result.protected[0].orientation, LineOrientation::Horizontal);
        assert_eq!(result.image.pixel(10, 60), INK);
        assert_eq!(result.image.pixel(51, 58), INK);
        // The vertical rule has no text on it
        assert_eq!(result.image.pixel(30, 100), [250, 250, 250]);
    }

    #[test]
    fn test_thin_stroke_crossing_removed_line_is_bridged() {
        let mut image = form_page();
        for y in 58..64 {
            image.set_pixel(90, y, INK);
        }
        let result = remove_grid_lines(&image, &GridParams::DEFAULT).unwrap();
        assert!(result.protected.is_empty());
        assert_eq!(result.image.pixel(90, 60), INK);
        assert_eq!(result.image.pixel(89, 60), [250, 250, 250]);
    }

    #[test]
    fn test_blank_page_has_no_lines() {
        let image = PixelBuffer::filled(50, 50, [255, 255, 255]).unwrap();
        let result = remove_grid_lines(&image, &GridParams::DEFAULT).unwrap();
        assert!(result.removed.is_empty());
        assert_eq!(result.image, image);
    }
}
