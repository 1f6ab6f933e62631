//! # Transform Property Tests
//!
//! Invariants every preprocessing transform must keep: dimensions, binary
//! output ranges, identities and the CLAHE clip bound.

#[cfg(test)]
mod tests {
    use docprep::preprocessing::buffer::luma;
    use docprep::preprocessing::clahe::ClaheTiles;
    use docprep::preprocessing::{
        adjust_contrast, apply_clahe, apply_sauvola, deskew, enhance_dot_matrix, enhance_lines,
        enhance_text, median_filter, remove_grid_lines, remove_moire, remove_show_through_dual,
        remove_show_through_single, to_grayscale, whiten_background, ClaheParams,
        DotMatrixParams, GridParams, MoireParams, PixelBuffer, SauvolaParams, ShowThroughParams,
        PARALLEL_THRESHOLD_PIXELS,
    };

    /// Horizontal gradient with a few dark strokes, in colour
    fn sample_page(width: u32, height: u32) -> PixelBuffer {
        let mut image = PixelBuffer::new(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                let v = (40 + x * 200 / width.max(1)) as u8;
                image.set_pixel(x, y, [v, v.saturating_sub(10), v / 2 + 60]);
            }
        }
        for y in (height / 4..height - 2).step_by(9) {
            for x in 2..width - 2 {
                if (x / 5) % 2 == 0 {
                    image.set_pixel(x, y, [15, 15, 15]);
                }
            }
        }
        image
    }

    /// Every stage keeps the dimensions of its input
    #[test]
    fn test_dimension_preservation() {
        let image = sample_page(47, 33);
        let back = PixelBuffer::filled(47, 33, [250, 250, 250]).unwrap();
        let outputs = vec![
            ("grayscale", to_grayscale(&image).unwrap()),
            ("whiten", whiten_background(&image, 180).unwrap()),
            ("contrast", adjust_contrast(&image, 40.0).unwrap()),
            ("clahe", apply_clahe(&image, &ClaheParams::DEFAULT).unwrap()),
            ("sauvola", apply_sauvola(&image, &SauvolaParams::DEFAULT).unwrap()),
            ("lines", enhance_lines(&image, 3).unwrap()),
            ("text", enhance_text(&image, 60).unwrap()),
            ("median", median_filter(&image, 4).unwrap()),
            ("moire", remove_moire(&image, &MoireParams::DEFAULT).unwrap()),
            (
                "show_through_single",
                remove_show_through_single(&image, &ShowThroughParams::DEFAULT).unwrap(),
            ),
            (
                "show_through_dual",
                remove_show_through_dual(&image, &back, &ShowThroughParams::DEFAULT).unwrap(),
            ),
            ("grid", remove_grid_lines(&image, &GridParams::DEFAULT).unwrap().image),
            ("dot_matrix", enhance_dot_matrix(&image, &DotMatrixParams::DEFAULT).unwrap()),
            ("deskew", deskew(&image).unwrap().image),
        ];
        for (name, output) in outputs {
            assert_eq!(output.dimensions(), (47, 33), "{}", name);
            assert_eq!(output.data().len(), output.stride() as usize * 33, "{}", name);
        }
    }

    /// Sauvola output is strictly binary on a gradient
    #[test]
    fn test_sauvola_output_is_binary() {
        let output = apply_sauvola(&sample_page(120, 80), &SauvolaParams::DEFAULT).unwrap();
        assert!(output.data().iter().all(|&v| v == 0 || v == 255));
        assert!(output.data().contains(&0));
        assert!(output.data().contains(&255));
    }

    /// Whitening snaps everything at or above the threshold and nothing else
    #[test]
    fn test_whitening_on_gradient() {
        let image = sample_page(120, 40);
        let output = whiten_background(&image, 150).unwrap();
        for y in 0..40 {
            for x in 0..120 {
                let [r, g, b] = image.pixel(x, y);
                if luma(r, g, b) >= 150 {
                    assert_eq!(output.pixel(x, y), [255, 255, 255]);
                } else {
                    assert_eq!(output.pixel(x, y), [r, g, b]);
                }
            }
        }
    }

    #[test]
    fn test_grayscale_is_idempotent() {
        let once = to_grayscale(&sample_page(64, 48)).unwrap();
        let twice = to_grayscale(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_contrast_is_identity() {
        let image = sample_page(64, 48);
        assert_eq!(adjust_contrast(&image, 0.0).unwrap(), image);
    }

    /// Salt and pepper in a flat field: noise gone, border band untouched
    #[test]
    fn test_median_removes_salt_and_pepper() {
        let clean = PixelBuffer::filled(50, 50, [128, 128, 128]).unwrap();
        let mut noisy = clean.clone();
        let mut seed = 17u32;
        for i in 0..60 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let x = (seed >> 8) % 50;
            let y = (seed >> 20) % 50;
            let value = if i % 2 == 0 { 0 } else { 255 };
            noisy.set_pixel(x, y, [value; 3]);
        }

        for window in [3u32, 5] {
            let output = median_filter(&noisy, window).unwrap();
            let radius = window / 2;
            for y in 0..50 {
                for x in 0..50 {
                    let border = x < radius || y < radius || x >= 50 - radius || y >= 50 - radius;
                    if border {
                        assert_eq!(output.pixel(x, y), noisy.pixel(x, y));
                    } else if sparse(&noisy, x, y, radius) {
                        assert_eq!(output.pixel(x, y), [128, 128, 128], "({}, {}) w={}", x, y, window);
                    }
                }
            }
        }
    }

    /// Noise pixels are a minority of the window centred on (x, y)
    fn sparse(image: &PixelBuffer, x: u32, y: u32, radius: u32) -> bool {
        let mut noise = 0;
        for ny in y - radius..=y + radius {
            for nx in x - radius..=x + radius {
                if image.pixel(nx, ny) != [128, 128, 128] {
                    noise += 1;
                }
            }
        }
        let side = 2 * radius + 1;
        noise * 2 < side * side
    }

    /// Flat field: std is zero, so T = mean * (1 - k)
    #[test]
    fn test_sauvola_uniform_field() {
        let params = SauvolaParams::DEFAULT;
        let bright = PixelBuffer::filled(30, 30, [200, 200, 200]).unwrap();
        let output = apply_sauvola(&bright, &params).unwrap();
        // 200 > 200 * (1 - k)
        assert!(output.data().iter().all(|&v| v == 255));

        let black = PixelBuffer::filled(30, 30, [0, 0, 0]).unwrap();
        let output = apply_sauvola(&black, &params).unwrap();
        // 0 <= 0 * (1 - k)
        assert!(output.data().iter().all(|&v| v == 0));
    }

    /// No processed tile histogram bin exceeds its clip limit
    #[test]
    fn test_clahe_clip_invariant() {
        let image = sample_page(96, 64);
        let plane = image.gray_plane();
        for clip_limit in [0.5f32, 1.0, 2.0, 4.0, 40.0] {
            let tiles = ClaheTiles::build(&plane, 96, 64, 4, 4, clip_limit);
            assert_eq!(tiles.tile_grid(), (4, 4));
            for (histogram, limit) in tiles.clipped_histograms() {
                assert!(histogram.iter().all(|&count| count <= limit), "clip {}", clip_limit);
            }
        }
    }

    /// Above the parallel threshold every row still gets the per-pixel rule
    #[test]
    fn test_large_image_parallel_path() {
        let side = ((PARALLEL_THRESHOLD_PIXELS as f64).sqrt() as u32) + 20;
        let image = sample_page(side, side);
        assert!(image.pixel_count() >= PARALLEL_THRESHOLD_PIXELS);

        let output = whiten_background(&image, 150).unwrap();
        let gray = to_grayscale(&image).unwrap();
        for y in 0..side {
            for x in 0..side {
                let [r, g, b] = image.pixel(x, y);
                let expected = if luma(r, g, b) >= 150 { [255; 3] } else { [r, g, b] };
                assert_eq!(output.pixel(x, y), expected);
                assert_eq!(gray.pixel(x, y), [luma(r, g, b); 3]);
            }
        }
    }

    /// Zero-size buffers are rejected by every entry point
    #[test]
    fn test_empty_buffer_is_invalid_input() {
        let empty = PixelBuffer::new(0, 0).unwrap();
        assert!(to_grayscale(&empty).is_err());
        assert!(median_filter(&empty, 3).is_err());
        assert!(apply_sauvola(&empty, &SauvolaParams::DEFAULT).is_err());
        assert!(apply_clahe(&empty, &ClaheParams::DEFAULT).is_err());
        assert!(remove_moire(&empty, &MoireParams::DEFAULT).is_err());
    }
}
