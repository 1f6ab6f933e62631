//! # Integral Image Tables
//!
//! Summed-area tables over a gray plane, giving O(1) window sums, means and
//! variances. Both tables carry an extra zero row and column so that window
//! queries need no edge special-casing.

use super::types::PreprocessingError;

/// Prefix sums and prefix sums of squares, `(width + 1) * (height + 1)` each.
#[derive(Debug, Clone)]
pub struct IntegralImageTable {
    width: usize,
    height: usize,
    sums: Vec<u64>,
    squares: Vec<u64>,
}

/// Windowed statistics returned by [`IntegralImageTable::window_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
}

impl WindowStats {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

fn try_table(len: usize) -> Result<Vec<u64>, PreprocessingError> {
    let mut table = Vec::new();
    table.try_reserve_exact(len).map_err(|e| {
        PreprocessingError::exhausted(format!(
            "cannot allocate integral table of {} entries: {}",
            len, e
        ))
    })?;
    table.resize(len, 0);
    Ok(table)
}

impl IntegralImageTable {
    /// Builds both tables in a single pass over `plane` (row-major, `width * height`).
    pub fn build(plane: &[u8], width: usize, height: usize) -> Result<Self, PreprocessingError> {
        if plane.len() != width * height {
            return Err(PreprocessingError::invalid(format!(
                "plane holds {} values, expected {}x{}",
                plane.len(),
                width,
                height
            )));
        }
        let table_width = width + 1;
        let len = table_width
            .checked_mul(height + 1)
            .ok_or_else(|| PreprocessingError::exhausted("integral table size overflows"))?;
        let mut sums = try_table(len)?;
        let mut squares = try_table(len)?;

        for y in 0..height {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            let above = y * table_width;
            let current = (y + 1) * table_width;
            for x in 0..width {
                let v = plane[y * width + x] as u64;
                row_sum += v;
                row_sq += v * v;
                sums[current + x + 1] = sums[above + x + 1] + row_sum;
                squares[current + x + 1] = squares[above + x + 1] + row_sq;
            }
        }

        Ok(Self {
            width,
            height,
            sums,
            squares,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn rect_total(table: &[u64], stride: usize, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0]
    }

    /// Sum over the half-open window `[x0, x1) x [y0, y1)`.
    #[inline]
    pub fn sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        Self::rect_total(&self.sums, self.width + 1, x0, y0, x1, y1)
    }

    /// Sum of squares over the half-open window `[x0, x1) x [y0, y1)`.
    #[inline]
    pub fn sum_of_squares(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        Self::rect_total(&self.squares, self.width + 1, x0, y0, x1, y1)
    }

    /// Mean and variance of the window centred on `(x, y)` with the given
    /// half size, clipped to the image bounds.
    #[inline]
    pub fn window_stats(&self, x: usize, y: usize, half: usize) -> WindowStats {
        let x0 = x.saturating_sub(half);
        let y0 = y.saturating_sub(half);
        let x1 = (x + half + 1).min(self.width);
        let y1 = (y + half + 1).min(self.height);
        let count = ((x1 - x0) * (y1 - y0)) as u64;
        let sum = self.sum(x0, y0, x1, y1) as f64;
        let sq = self.sum_of_squares(x0, y0, x1, y1) as f64;
        let n = count as f64;
        let mean = sum / n;
        let variance = (sq / n - mean * mean).max(0.0);
        WindowStats {
            mean,
            variance,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sums_match_brute_force() {
        let width = 7;
        let height = 5;
        let plane: Vec<u8> = (0..width * height).map(|i| (i * 37 % 251) as u8).collect();
        let table = IntegralImageTable::build(&plane, width, height).unwrap();

        let brute = |x0: usize, y0: usize, x1: usize, y1: usize| {
            let mut s = 0u64;
            let mut q = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    let v = plane[y * width + x] as u64;
                    s += v;
                    q += v * v;
                }
            }
            (s, q)
        };

        for &(x0, y0, x1, y1) in &[(0, 0, 7, 5), (2, 1, 5, 4), (6, 4, 7, 5), (0, 3, 3, 5)] {
            let (s, q) = brute(x0, y0, x1, y1);
            assert_eq!(table.sum(x0, y0, x1, y1), s);
            assert_eq!(table.sum_of_squares(x0, y0, x1, y1), q);
        }
    }

    #[test]
    fn test_window_stats_clip_at_borders() {
        let plane = vec![10u8; 16];
        let table = IntegralImageTable::build(&plane, 4, 4).unwrap();
        let corner = table.window_stats(0, 0, 2);
        assert_eq!(corner.count, 9);
        assert_eq!(corner.mean, 10.0);
        assert_eq!(corner.variance, 0.0);

        let oversized = table.window_stats(1, 1, 50);
        assert_eq!(oversized.count, 16);
    }

    #[test]
    fn test_window_variance_of_checkerboard() {
        let plane: Vec<u8> = (0..16).map(|i| if (i / 4 + i % 4) % 2 == 0 { 0 } else { 200 }).collect();
        let table = IntegralImageTable::build(&plane, 4, 4).unwrap();
        let stats = table.window_stats(1, 1, 1);
        assert_eq!(stats.count, 9);
        // 5 zeros and 4 values of 200 around an even-parity centre
        let mean = 800.0 / 9.0;
        assert!((stats.mean - mean).abs() < 1e-9);
        assert!(stats.std_dev() > 90.0);
    }

    #[test]
    fn test_rejects_mismatched_plane() {
        assert!(IntegralImageTable::build(&[0u8; 5], 2, 3).is_err());
    }
}
