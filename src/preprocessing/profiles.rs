//! Condition-specific preprocessing presets and the selector that maps a
//! detected [`DocumentCondition`] to one of them.

use super::options::PreprocessingOptions;
use super::types::DocumentCondition;

/// Halftone interference: notch filter first, then a light cleanup.
pub const MOIRE_PATTERN: PreprocessingOptions = PreprocessingOptions {
    remove_moire: true,
    convert_background_to_white: true,
    background_threshold: 185,
    adjust_contrast: true,
    contrast_level: 30.0,
    remove_noise: true,
    noise_window: 3,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Reverse-side bleed: faint tones snapped to white, ink pushed hard.
pub const SHOW_THROUGH: PreprocessingOptions = PreprocessingOptions {
    remove_show_through: true,
    convert_background_to_white: true,
    background_threshold: 200,
    adjust_contrast: true,
    contrast_level: 50.0,
    enhance_text: true,
    text_enhancement_level: 70,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Impact-printer output. Noise removal stays off: the median filter would
/// erase the dots the strokes are rebuilt from.
pub const DOT_MATRIX: PreprocessingOptions = PreprocessingOptions {
    convert_background_to_white: true,
    background_threshold: 190,
    adjust_contrast: true,
    contrast_level: 40.0,
    enhance_lines: true,
    line_thickness: 2,
    enhance_text: true,
    text_enhancement_level: 80,
    enhance_dot_matrix: true,
    remove_noise: false,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Yellowed, faded paper.
pub const AGED_DOCUMENT: PreprocessingOptions = PreprocessingOptions {
    convert_background_to_white: true,
    background_threshold: 170,
    adjust_contrast: true,
    contrast_level: 45.0,
    equalize_histogram: true,
    enhance_text: true,
    text_enhancement_level: 50,
    remove_noise: true,
    noise_window: 3,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Feathered strokes: a wider median and a hard binarization.
pub const INK_BLEED: PreprocessingOptions = PreprocessingOptions {
    convert_background_to_white: true,
    background_threshold: 210,
    adjust_contrast: true,
    contrast_level: 35.0,
    remove_noise: true,
    noise_window: 5,
    binarize: true,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Ruled or gridded forms.
pub const GRID_BACKGROUND: PreprocessingOptions = PreprocessingOptions {
    convert_background_to_white: true,
    background_threshold: 190,
    adjust_contrast: true,
    contrast_level: 30.0,
    remove_grid_lines: true,
    enhance_text: true,
    text_enhancement_level: 40,
    remove_noise: true,
    noise_window: 3,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

pub const SKEWED_DOCUMENT: PreprocessingOptions = PreprocessingOptions {
    correct_skew: true,
    ..PreprocessingOptions::DEFAULT
};

/// Uneven lighting. Global whitening would blank the bright side of the
/// page, so local equalization and Sauvola do the work instead.
pub const POOR_ILLUMINATION: PreprocessingOptions = PreprocessingOptions {
    equalize_histogram: true,
    enhance_text: true,
    text_enhancement_level: 40,
    remove_noise: true,
    noise_window: 3,
    binarize: true,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Faint marks behind the text.
pub const WATERMARKED: PreprocessingOptions = PreprocessingOptions {
    convert_background_to_white: true,
    background_threshold: 170,
    adjust_contrast: true,
    contrast_level: 40.0,
    enhance_text: true,
    text_enhancement_level: 40,
    remove_noise: true,
    noise_window: 3,
    retry_on_low_quality: true,
    ..PreprocessingOptions::DISABLED
};

/// Pure condition -> options lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileSelector;

impl ProfileSelector {
    /// Returns the preset for `condition`; `Normal` gets
    /// [`PreprocessingOptions::DEFAULT`].
    pub const fn select(condition: DocumentCondition) -> PreprocessingOptions {
        match condition {
            DocumentCondition::Normal => PreprocessingOptions::DEFAULT,
            DocumentCondition::MoirePattern => MOIRE_PATTERN,
            DocumentCondition::ShowThrough => SHOW_THROUGH,
            DocumentCondition::DotMatrix => DOT_MATRIX,
            DocumentCondition::AgedDocument => AGED_DOCUMENT,
            DocumentCondition::InkBleed => INK_BLEED,
            DocumentCondition::GridBackground => GRID_BACKGROUND,
            DocumentCondition::SkewedDocument => SKEWED_DOCUMENT,
            DocumentCondition::PoorIllumination => POOR_ILLUMINATION,
            DocumentCondition::Watermarked => WATERMARKED,
        }
    }
}
