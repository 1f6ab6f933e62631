//! # Preprocessing Options
//!
//! Flat configuration surface of the pipeline: one switch and its parameters
//! per stage. Presets are compile-time constants.

use serde::{Deserialize, Serialize};

use super::types::PreprocessingError;

/// Frequency-domain moire suppression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoireParams {
    /// Normalised radius (cycles/pixel) below which frequencies are never touched
    pub low_frequency_cutoff: f32,
    /// A bin is a peak when it exceeds its neighbourhood mean by this ratio
    pub peak_ratio: f32,
    /// Sigma of the post-filter Gaussian blur
    pub blur_sigma: f32,
    /// Unsharp mask gain
    pub sharpen_amount: f32,
    /// Unsharp mask blur radius (sigma)
    pub sharpen_radius: f32,
    /// Minimum difference before the unsharp mask applies
    pub sharpen_threshold: u8,
}

impl MoireParams {
    pub const DEFAULT: MoireParams = MoireParams {
        low_frequency_cutoff: 0.08,
        peak_ratio: 4.0,
        blur_sigma: 0.8,
        sharpen_amount: 0.6,
        sharpen_radius: 1.0,
        sharpen_threshold: 3,
    };
}

impl Default for MoireParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Show-through removal parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShowThroughParams {
    /// Share of the inverted back page subtracted in dual-side mode
    pub back_fraction: f32,
    /// Luminance above which single-side mode snaps to white
    pub white_threshold: u8,
    /// Contrast stretch around mid gray for the remaining pixels
    pub stretch_factor: f32,
}

impl ShowThroughParams {
    pub const DEFAULT: ShowThroughParams = ShowThroughParams {
        back_fraction: 0.3,
        white_threshold: 200,
        stretch_factor: 1.5,
    };
}

impl Default for ShowThroughParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// CLAHE parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClaheParams {
    /// Bin limit as a multiple of the uniform bin height `tile_pixels / 256`,
    /// not an absolute count: 2.0 on a 64x64 tile caps each bin at 32.
    pub clip_limit: f32,
    /// Tiles per axis
    pub tile_count: u32,
}

impl ClaheParams {
    pub const DEFAULT: ClaheParams = ClaheParams {
        clip_limit: 2.0,
        tile_count: 8,
    };
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Sauvola binarization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SauvolaParams {
    /// Window side in pixels (forced odd)
    pub window_size: u32,
    /// Sensitivity, typically 0.2-0.5
    pub k: f32,
}

impl SauvolaParams {
    pub const DEFAULT: SauvolaParams = SauvolaParams {
        window_size: 25,
        k: 0.34,
    };
}

impl Default for SauvolaParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Grid-line removal parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// Minimum line length as a share of the image's smaller side
    pub min_line_fraction: f32,
    /// Smallest ink component (pixels) treated as text
    pub min_text_area: u32,
    /// Largest text component extent as a share of the image's smaller side
    pub max_text_fraction: f32,
    /// Margin added around text boxes for the overlap test
    pub text_margin: u32,
}

impl GridParams {
    pub const DEFAULT: GridParams = GridParams {
        min_line_fraction: 0.5,
        min_text_area: 4,
        max_text_fraction: 0.125,
        text_margin: 2,
    };
}

impl Default for GridParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Dot-matrix stroke reconstruction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DotMatrixParams {
    /// Luminance at or below which a local minimum counts as a dot
    pub darkness_threshold: u8,
    /// Dots closer than this (pixels) are joined into strokes
    pub connect_radius: u32,
    /// Minimum dot confidence (darkness share) for joining
    pub min_confidence: f32,
    /// Target stroke width after normalisation
    pub stroke_width: u32,
}

impl DotMatrixParams {
    pub const DEFAULT: DotMatrixParams = DotMatrixParams {
        darkness_threshold: 128,
        connect_radius: 3,
        min_confidence: 0.35,
        stroke_width: 3,
    };
}

impl Default for DotMatrixParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Complete pipeline configuration.
///
/// Each stage runs only when its flag is set; a disabled stage passes the
/// buffer through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    pub convert_background_to_white: bool,
    pub background_threshold: u8,
    pub adjust_contrast: bool,
    /// Contrast level in [-100, 100]
    pub contrast_level: f32,
    pub enhance_lines: bool,
    pub line_thickness: u32,
    pub enhance_text: bool,
    /// Text enhancement strength in [0, 100]
    pub text_enhancement_level: u32,
    pub remove_noise: bool,
    /// Median window side
    pub noise_window: u32,

    pub correct_skew: bool,
    pub remove_moire: bool,
    pub moire: MoireParams,
    pub remove_show_through: bool,
    pub show_through: ShowThroughParams,
    pub equalize_histogram: bool,
    pub clahe: ClaheParams,
    pub remove_grid_lines: bool,
    pub grid: GridParams,
    pub enhance_dot_matrix: bool,
    pub dot_matrix: DotMatrixParams,
    pub binarize: bool,
    pub sauvola: SauvolaParams,
    /// Run one extra enhancement pass when predicted accuracy is low
    pub retry_on_low_quality: bool,
}

impl PreprocessingOptions {
    /// Every stage disabled: the pipeline returns its input unchanged.
    pub const DISABLED: PreprocessingOptions = PreprocessingOptions {
        convert_background_to_white: false,
        background_threshold: 200,
        adjust_contrast: false,
        contrast_level: 0.0,
        enhance_lines: false,
        line_thickness: 1,
        enhance_text: false,
        text_enhancement_level: 0,
        remove_noise: false,
        noise_window: 3,
        correct_skew: false,
        remove_moire: false,
        moire: MoireParams::DEFAULT,
        remove_show_through: false,
        show_through: ShowThroughParams::DEFAULT,
        equalize_histogram: false,
        clahe: ClaheParams::DEFAULT,
        remove_grid_lines: false,
        grid: GridParams::DEFAULT,
        enhance_dot_matrix: false,
        dot_matrix: DotMatrixParams::DEFAULT,
        binarize: false,
        sauvola: SauvolaParams::DEFAULT,
        retry_on_low_quality: false,
    };

    pub const DEFAULT: PreprocessingOptions = PreprocessingOptions {
        convert_background_to_white: true,
        background_threshold: 200,
        adjust_contrast: true,
        contrast_level: 20.0,
        enhance_text: true,
        text_enhancement_level: 30,
        remove_noise: true,
        noise_window: 3,
        retry_on_low_quality: true,
        ..Self::DISABLED
    };

    pub const FOR_FADED_DOCUMENT: PreprocessingOptions = PreprocessingOptions {
        convert_background_to_white: true,
        background_threshold: 180,
        adjust_contrast: true,
        contrast_level: 50.0,
        enhance_text: true,
        text_enhancement_level: 60,
        remove_noise: true,
        noise_window: 3,
        retry_on_low_quality: true,
        ..Self::DISABLED
    };

    pub const FOR_POOR_QUALITY_FORM: PreprocessingOptions = PreprocessingOptions {
        convert_background_to_white: true,
        background_threshold: 190,
        adjust_contrast: true,
        contrast_level: 40.0,
        enhance_lines: true,
        line_thickness: 2,
        enhance_text: true,
        text_enhancement_level: 50,
        remove_noise: true,
        noise_window: 3,
        retry_on_low_quality: true,
        ..Self::DISABLED
    };

    /// True when no stage flag is set.
    pub fn is_passthrough(&self) -> bool {
        *self
            == PreprocessingOptions {
                convert_background_to_white: false,
                adjust_contrast: false,
                enhance_lines: false,
                enhance_text: false,
                remove_noise: false,
                correct_skew: false,
                remove_moire: false,
                remove_show_through: false,
                equalize_histogram: false,
                remove_grid_lines: false,
                enhance_dot_matrix: false,
                binarize: false,
                retry_on_low_quality: false,
                ..*self
            }
    }

    /// Checks parameter ranges of the enabled stages.
    pub fn validate(&self) -> Result<(), PreprocessingError> {
        if self.adjust_contrast && !(-100.0..=100.0).contains(&self.contrast_level) {
            return Err(PreprocessingError::invalid(format!(
                "contrast_level {} outside [-100, 100]",
                self.contrast_level
            )));
        }
        if self.enhance_lines && self.line_thickness == 0 {
            return Err(PreprocessingError::invalid("line_thickness must be > 0"));
        }
        if self.enhance_text && self.text_enhancement_level > 100 {
            return Err(PreprocessingError::invalid(format!(
                "text_enhancement_level {} outside [0, 100]",
                self.text_enhancement_level
            )));
        }
        if self.remove_noise && self.noise_window == 0 {
            return Err(PreprocessingError::invalid("noise_window must be > 0"));
        }
        if self.equalize_histogram
            && (self.clahe.tile_count == 0 || !(self.clahe.clip_limit > 0.0))
        {
            return Err(PreprocessingError::invalid(
                "CLAHE needs tile_count > 0 and clip_limit > 0",
            ));
        }
        if self.binarize && (self.sauvola.window_size == 0 || !self.sauvola.k.is_finite()) {
            return Err(PreprocessingError::invalid(
                "Sauvola needs window_size > 0 and a finite k",
            ));
        }
        if self.enhance_dot_matrix && self.dot_matrix.stroke_width == 0 {
            return Err(PreprocessingError::invalid(
                "dot-matrix stroke_width must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// How the pipeline obtains its options.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingMode {
    /// Analyze the document and pick the matching profile
    Auto,
    /// Use the caller's options as-is
    Manual(PreprocessingOptions),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_passthrough() {
        assert!(PreprocessingOptions::DISABLED.is_passthrough());
        assert!(!PreprocessingOptions::DEFAULT.is_passthrough());

        let tuned = PreprocessingOptions {
            background_threshold: 10,
            contrast_level: 99.0,
            ..PreprocessingOptions::DISABLED
        };
        assert!(tuned.is_passthrough());
    }

    #[test]
    fn test_presets_validate() {
        assert!(PreprocessingOptions::DEFAULT.validate().is_ok());
        assert!(PreprocessingOptions::FOR_FADED_DOCUMENT.validate().is_ok());
        assert!(PreprocessingOptions::FOR_POOR_QUALITY_FORM.validate().is_ok());
    }

    #[test]
    #[allow(unused_assignments)]
    fn test_validation_rejects_out_of_range_parameters() {
        let mut options = PreprocessingOptions::DEFAULT;

        options.contrast_level = 150.0;
        assert!(options.validate().is_err());
        options.contrast_level = 20.0;

        options.noise_window = 0;
        assert!(options.validate().is_err());
        options.noise_window = 3;

        options.text_enhancement_level = 101;
        assert!(options.validate().is_err());
        options.text_enhancement_level = 30;

        options.equalize_histogram = true;
        options.clahe.tile_count = 0;
        assert!(options.validate().is_err());
        options.clahe.tile_count = 8;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_deserialize_with_missing_fields() {
        let json = r#"{ "adjust_contrast": true, "contrast_level": 35.0 }"#;
        let options: PreprocessingOptions = serde_json::from_str(json).unwrap();
        assert!(options.adjust_contrast);
        assert_eq!(options.contrast_level, 35.0);
        // Missing fields come from Default
        assert!(options.remove_noise);
        assert_eq!(options.sauvola, SauvolaParams::DEFAULT);
    }
}
