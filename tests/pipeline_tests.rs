//! # Pipeline Tests Module
//!
//! End-to-end runs of the preprocessing pipeline: the reference scenarios,
//! auto mode, the bounded quality retry, cancellation and error reporting.

#[cfg(test)]
mod tests {
    use docprep::config::PipelineSettings;
    use docprep::pipeline::{planned_stages, Pipeline, PipelineError, PipelineState};
    use docprep::preprocessing::adjustments::contrast_factor;
    use docprep::preprocessing::{
        DocumentCondition, MoireParams, PixelBuffer, PreprocessingError, PreprocessingOptions,
        ProcessingMode, StageKind,
    };
    use tokio_util::sync::CancellationToken;

    fn manual(options: PreprocessingOptions) -> ProcessingMode {
        ProcessingMode::Manual(options)
    }

    /// Bars of dark ink on light paper, spaced irregularly
    fn text_page(width: u32, height: u32, paper: u8, ink: u8) -> PixelBuffer {
        let mut image = PixelBuffer::filled(width, height, [paper; 3]).unwrap();
        let mut seed = 3u32;
        let mut top = 6;
        while top + 8 < height {
            let mut left = 5;
            while left + 4 < width {
                for y in top..top + 7 {
                    for x in left..left + 3 {
                        image.set_pixel(x, y, [ink; 3]);
                    }
                }
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                left += 6 + (seed >> 16) % 7;
            }
            top += 18 + (seed >> 20) % 5;
        }
        image
    }

    /// Scenario A: white page through background whitening is unchanged
    #[test]
    fn test_white_page_survives_whitening() {
        let image = PixelBuffer::filled(100, 100, [255, 255, 255]).unwrap();
        let options = PreprocessingOptions {
            convert_background_to_white: true,
            background_threshold: 200,
            ..PreprocessingOptions::DISABLED
        };
        let output = Pipeline::default().run(&image, &manual(options)).unwrap();
        assert_eq!(output.image, image);
        assert_eq!(output.stages_applied, vec![StageKind::BackgroundWhitening]);
    }

    /// Scenario B: flat gray(100) at contrast 50 matches the formula exactly
    #[test]
    fn test_contrast_on_flat_gray_matches_formula() {
        let image = PixelBuffer::filled(100, 100, [100, 100, 100]).unwrap();
        let options = PreprocessingOptions {
            adjust_contrast: true,
            contrast_level: 50.0,
            ..PreprocessingOptions::DISABLED
        };
        let output = Pipeline::default().run(&image, &manual(options)).unwrap();

        let factor = contrast_factor(50.0);
        let expected = (factor * (100.0 - 128.0) + 128.0).round().clamp(0.0, 255.0) as u8;
        assert_eq!(expected, 86);
        assert!(output.image.data().iter().all(|&v| v == expected));
    }

    /// Scenario C: isolated specks in a flat field are removed, nothing else moves
    #[test]
    fn test_median_removes_isolated_specks() {
        let clean = PixelBuffer::filled(40, 40, [150, 150, 150]).unwrap();
        let mut noisy = clean.clone();
        for (x, y) in [(10, 10), (12, 10), (14, 10), (10, 12), (14, 14), (25, 30)] {
            noisy.set_pixel(x, y, [0, 0, 0]);
        }
        let options = PreprocessingOptions {
            remove_noise: true,
            noise_window: 3,
            ..PreprocessingOptions::DISABLED
        };
        let output = Pipeline::default().run(&noisy, &manual(options)).unwrap();
        assert_eq!(output.image, clean);
    }

    /// A solid 3x3 speck needs a window wider than the speck
    #[test]
    fn test_median_window_five_removes_solid_speck() {
        let clean = PixelBuffer::filled(40, 40, [150, 150, 150]).unwrap();
        let mut noisy = clean.clone();
        for y in 19..22 {
            for x in 19..22 {
                noisy.set_pixel(x, y, [0, 0, 0]);
            }
        }
        let options = PreprocessingOptions {
            remove_noise: true,
            noise_window: 5,
            ..PreprocessingOptions::DISABLED
        };
        let output = Pipeline::default().run(&noisy, &manual(options)).unwrap();
        assert_eq!(output.image, clean);
    }

    /// Scenario D: every flag off is a byte-identical pass-through
    #[test]
    fn test_disabled_options_pass_through() {
        let image = text_page(64, 48, 230, 40);
        let output = Pipeline::default()
            .run(&image, &manual(PreprocessingOptions::DISABLED))
            .unwrap();
        assert_eq!(output.image.data(), image.data());
        assert!(output.stages_applied.is_empty());
        assert!(output.prediction.is_none());
        assert!(output.retry_action.is_none());
        assert_eq!(
            output.states,
            vec![PipelineState::Idle, PipelineState::ProfileSelected, PipelineState::Done]
        );
    }

    #[test]
    fn test_auto_mode_selects_profile_from_analysis() {
        let image = text_page(160, 120, 245, 25);
        let output = Pipeline::default().run(&image, &ProcessingMode::Auto).unwrap();
        let analysis = output.analysis.as_ref().unwrap();
        assert_eq!(analysis.condition, DocumentCondition::Normal);
        assert_eq!(output.options, PreprocessingOptions::DEFAULT);
        assert_eq!(output.states[1], PipelineState::Analyzing);
        assert_eq!(output.image.dimensions(), (160, 120));
    }

    #[test]
    fn test_low_quality_triggers_exactly_one_retry() {
        let image = text_page(96, 96, 140, 120);
        let options = PreprocessingOptions::DEFAULT;
        let output = Pipeline::default().run(&image, &manual(options)).unwrap();

        let planned = planned_stages(&options);
        assert!(output.retry_action.is_some());
        assert_eq!(output.stages_applied.len(), planned.len() + 1);
        assert_eq!(&output.stages_applied[..planned.len()], planned.as_slice());
        assert_eq!(
            output.states.iter().filter(|s| **s == PipelineState::Enhancing).count(),
            1
        );
        assert_eq!(
            output.states.iter().filter(|s| **s == PipelineState::QualityChecked).count(),
            2
        );
        assert!(output.prediction.is_some());
        assert_eq!(output.states.last(), Some(&PipelineState::Done));
    }

    #[test]
    fn test_good_prediction_skips_retry() {
        let pipeline = Pipeline::new(PipelineSettings {
            quality_threshold: 0.01,
            ..PipelineSettings::default()
        });
        let image = text_page(64, 64, 240, 30);
        let output = pipeline
            .run(&image, &manual(PreprocessingOptions::DEFAULT))
            .unwrap();
        assert!(output.retry_action.is_none());
        assert!(output.prediction.is_some());
        assert!(!output.states.contains(&PipelineState::Enhancing));
        assert_eq!(
            output.stages_applied,
            planned_stages(&PreprocessingOptions::DEFAULT)
        );
    }

    #[test]
    fn test_cancelled_token_discards_run() {
        let token = CancellationToken::new();
        token.cancel();
        let image = text_page(32, 32, 240, 30);
        let err = Pipeline::default()
            .run_with_cancellation(&image, &manual(PreprocessingOptions::DEFAULT), &token)
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                completed_stages: Vec::new()
            }
        );
    }

    #[test]
    fn test_live_token_runs_to_completion() {
        let token = CancellationToken::new();
        let image = text_page(32, 32, 240, 30);
        let output = Pipeline::default()
            .run_with_cancellation(&image, &manual(PreprocessingOptions::DEFAULT), &token)
            .unwrap();
        assert_eq!(output.states.last(), Some(&PipelineState::Done));
    }

    #[test]
    fn test_zero_dimension_source_is_rejected() {
        let empty = PixelBuffer::new(0, 10).unwrap();
        let err = Pipeline::default()
            .run(&empty, &manual(PreprocessingOptions::DEFAULT))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InputRejected {
                source: PreprocessingError::InvalidInput { .. }
            }
        ));
    }

    #[test]
    fn test_invalid_options_are_rejected_before_processing() {
        let image = text_page(32, 32, 240, 30);
        let options = PreprocessingOptions {
            remove_noise: true,
            noise_window: 0,
            ..PreprocessingOptions::DISABLED
        };
        let err = Pipeline::default().run(&image, &manual(options)).unwrap_err();
        assert!(matches!(err, PipelineError::InputRejected { .. }));
    }

    #[test]
    fn test_failing_stage_is_named() {
        let image = text_page(32, 32, 240, 30);
        let options = PreprocessingOptions {
            convert_background_to_white: true,
            remove_moire: true,
            moire: MoireParams {
                peak_ratio: 0.5,
                ..MoireParams::DEFAULT
            },
            ..PreprocessingOptions::DISABLED
        };
        let err = Pipeline::default().run(&image, &manual(options)).unwrap_err();
        match err {
            PipelineError::StageFailed { stage, source } => {
                assert_eq!(stage, StageKind::MoireRemoval);
                assert!(matches!(source, PreprocessingError::InvalidInput { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_input_is_resource_exhausted() {
        let pipeline = Pipeline::new(PipelineSettings {
            max_pixels: 50,
            ..PipelineSettings::default()
        });
        let image = PixelBuffer::filled(10, 10, [200, 200, 200]).unwrap();
        let err = pipeline
            .run(&image, &manual(PreprocessingOptions::DISABLED))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InputRejected {
                source: PreprocessingError::ResourceExhausted { .. }
            }
        ));
    }

    #[test]
    fn test_duplex_subtracts_back_side() {
        let front = PixelBuffer::filled(20, 20, [220, 220, 220]).unwrap();
        let mut back = PixelBuffer::filled(20, 20, [255, 255, 255]).unwrap();
        back.set_pixel(5, 5, [55, 55, 55]);

        let output = Pipeline::default()
            .run_duplex(&front, &back, &manual(PreprocessingOptions::DISABLED))
            .unwrap();
        assert_eq!(output.stages_applied, vec![StageKind::ShowThroughRemoval]);
        assert_eq!(output.image.pixel(0, 0), [220, 220, 220]);
        // 220 - 0.3 * 200 = 160
        assert_eq!(output.image.pixel(5, 5), [160, 160, 160]);
    }

    /// Two-pixel ruled lines tilted by `angle_degrees`
    fn tilted_rules(width: u32, height: u32, angle_degrees: f32, paper: u8, ink: u8) -> PixelBuffer {
        let mut image = PixelBuffer::filled(width, height, [paper; 3]).unwrap();
        let slope = angle_degrees.to_radians().tan();
        for base in (20..height - 20).step_by(16) {
            for x in 10..width - 10 {
                let y = base as f32 + (x as f32 - width as f32 / 2.0) * slope;
                if y >= 0.0 && (y as u32) + 1 < height {
                    image.set_pixel(x, y as u32, [ink; 3]);
                    image.set_pixel(x, y as u32 + 1, [ink; 3]);
                }
            }
        }
        image
    }

    #[test]
    fn test_duplex_subtraction_lines_up_with_deskewed_front() {
        let front = tilted_rules(240, 200, 4.0, 220, 0);
        // Bleed registered exactly under the front's rules
        let mut back = PixelBuffer::filled(240, 200, [255, 255, 255]).unwrap();
        for y in 0..200 {
            for x in 0..240 {
                if front.gray_at(x, y) == 0 {
                    back.set_pixel(x, y, [55, 55, 55]);
                }
            }
        }
        let options = PreprocessingOptions {
            correct_skew: true,
            ..PreprocessingOptions::DISABLED
        };

        let output = Pipeline::default()
            .run_duplex(&front, &back, &manual(options))
            .unwrap();
        assert_eq!(
            output.stages_applied,
            vec![StageKind::ShowThroughRemoval, StageKind::Deskew]
        );
        assert_ne!(output.image, front);
        // Paper hit by a misaligned back mark would drop to 220 - 60 = 160
        assert!(output
            .image
            .data()
            .chunks_exact(3)
            .all(|p| matches!(p[0], 0 | 220 | 255)));
    }

    #[test]
    fn test_duplex_rejects_mismatched_back() {
        let front = PixelBuffer::filled(20, 20, [220, 220, 220]).unwrap();
        let back = PixelBuffer::filled(20, 21, [255, 255, 255]).unwrap();
        let err = Pipeline::default()
            .run_duplex(&front, &back, &ProcessingMode::Auto)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InputRejected {
                source: PreprocessingError::InvalidInput { .. }
            }
        ));
    }

    #[test]
    fn test_pipeline_is_shareable_across_threads() {
        let pipeline = Pipeline::default();
        let pages = [text_page(48, 48, 240, 30), text_page(56, 40, 235, 50)];
        std::thread::scope(|scope| {
            let handles: Vec<_> = pages
                .iter()
                .map(|page| {
                    let pipeline = &pipeline;
                    scope.spawn(move || pipeline.run(page, &ProcessingMode::Auto))
                })
                .collect();
            for (handle, page) in handles.into_iter().zip(&pages) {
                let output = handle.join().unwrap().unwrap();
                assert_eq!(output.image.dimensions(), page.dimensions());
            }
        });
    }

    #[test]
    fn test_report_serializes_to_json() {
        let image = text_page(48, 48, 240, 30);
        let output = Pipeline::default().run(&image, &ProcessingMode::Auto).unwrap();
        let json = serde_json::to_value(output.report()).unwrap();
        assert_eq!(json["width"], 48);
        assert!(json["analysis"]["condition"].is_string());
        assert!(json["stages_applied"].is_array());
        assert_eq!(json["states"][0], "idle");
    }
}
