//! # Shared Types for Image Preprocessing
//!
//! This module contains the shared types, structs, and enums used across
//! the preprocessing sub-modules: errors, document conditions, quality
//! metrics, analysis results and OCR quality predictions.

use serde::{Deserialize, Serialize};

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// Zero-dimension buffer, mismatched buffers or invalid stage parameters
    InvalidInput { message: String },
    /// Buffer layout inconsistent with the 3-channel contract
    UnsupportedFormat { message: String },
    /// Allocation failed or the image exceeds the configured size limit
    ResourceExhausted { message: String },
}

impl PreprocessingError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PreprocessingError::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        PreprocessingError::UnsupportedFormat {
            message: message.into(),
        }
    }

    pub(crate) fn exhausted(message: impl Into<String>) -> Self {
        PreprocessingError::ResourceExhausted {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::InvalidInput { message } => {
                write!(f, "[INVALID_INPUT] {}", message)
            }
            PreprocessingError::UnsupportedFormat { message } => {
                write!(f, "[UNSUPPORTED_FORMAT] {}", message)
            }
            PreprocessingError::ResourceExhausted { message } => {
                write!(f, "[RESOURCE_EXHAUSTED] {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Dominant defect condition of a scanned document.
///
/// Declaration order matters: when two conditions score exactly the same,
/// the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCondition {
    #[default]
    Normal,
    MoirePattern,
    ShowThrough,
    DotMatrix,
    AgedDocument,
    InkBleed,
    GridBackground,
    SkewedDocument,
    PoorIllumination,
    Watermarked,
}

impl DocumentCondition {
    /// All conditions in declaration order.
    pub const ALL: [DocumentCondition; 10] = [
        DocumentCondition::Normal,
        DocumentCondition::MoirePattern,
        DocumentCondition::ShowThrough,
        DocumentCondition::DotMatrix,
        DocumentCondition::AgedDocument,
        DocumentCondition::InkBleed,
        DocumentCondition::GridBackground,
        DocumentCondition::SkewedDocument,
        DocumentCondition::PoorIllumination,
        DocumentCondition::Watermarked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCondition::Normal => "normal",
            DocumentCondition::MoirePattern => "moire_pattern",
            DocumentCondition::ShowThrough => "show_through",
            DocumentCondition::DotMatrix => "dot_matrix",
            DocumentCondition::AgedDocument => "aged_document",
            DocumentCondition::InkBleed => "ink_bleed",
            DocumentCondition::GridBackground => "grid_background",
            DocumentCondition::SkewedDocument => "skewed_document",
            DocumentCondition::PoorIllumination => "poor_illumination",
            DocumentCondition::Watermarked => "watermarked",
        }
    }
}

/// Global image quality metrics, each normalised to 0.0-1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean of the per-pixel channel average (0.5 is mid gray)
    pub brightness: f32,
    /// Robust p1..p99 luminance range
    pub contrast: f32,
    /// Variance of the Laplacian, scaled
    pub sharpness: f32,
    /// Share of impulse (salt-and-pepper) pixels, scaled
    pub noise_level: f32,
    /// Evenness of the background (1.0 = perfectly even)
    pub uniformity: f32,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            brightness: 0.5,
            contrast: 0.0,
            sharpness: 0.0,
            noise_level: 0.0,
            uniformity: 1.0,
        }
    }
}

/// Ink-related characteristics found during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextCharacteristics {
    /// Share of pixels classified as ink
    pub ink_ratio: f32,
    /// Median short side of ink components, in pixels
    pub estimated_stroke_width: f32,
    /// Number of ink connected components
    pub component_count: usize,
}

/// Paper/background characteristics found during analysis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BackgroundCharacteristics {
    /// Mean luminance of non-ink pixels (0.0-1.0)
    pub mean_luminance: f32,
    /// Yellow cast of the paper, (R+G)/2 - B normalised
    pub yellow_cast: f32,
    /// Spread of local background brightness (0.0 = even)
    pub variation: f32,
}

/// Result of document analysis, consumed by the profile selector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub condition: DocumentCondition,
    pub metrics: QualityMetrics,
    pub text_characteristics: TextCharacteristics,
    pub background_characteristics: BackgroundCharacteristics,
    /// Detected skew angle in degrees
    pub skew_angle_degrees: f32,
    /// Score per evaluated condition, in declaration order
    pub condition_scores: Vec<(DocumentCondition, f32)>,
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Grows the rectangle by `margin` on every side, clipped to the image.
    pub fn expanded(&self, margin: u32, image_width: u32, image_height: u32) -> Rect {
        let x0 = self.x.saturating_sub(margin);
        let y0 = self.y.saturating_sub(margin);
        let x1 = (self.right() + margin).min(image_width);
        let y1 = (self.bottom() + margin).min(image_height);
        Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Follow-up enhancement suggested by the OCR quality prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    IncreaseContrast,
    ReduceNoise,
    EnhanceText,
    WhitenBackground,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::IncreaseContrast => "increase_contrast",
            RecommendedAction::ReduceNoise => "reduce_noise",
            RecommendedAction::EnhanceText => "enhance_text",
            RecommendedAction::WhitenBackground => "whiten_background",
        }
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region flagged by the OCR quality prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProblemArea {
    pub region: Rect,
    /// Local noise exceeded the threshold
    pub noisy: bool,
    /// Inked region with too little local contrast
    pub low_contrast: bool,
}

/// Predicted OCR quality of a processed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrQualityPrediction {
    /// Estimated recognition accuracy (0.0-1.0)
    pub estimated_accuracy: f32,
    pub problematic_areas: Vec<ProblemArea>,
    pub recommended_actions: Vec<RecommendedAction>,
    /// Metrics the estimate was derived from
    pub metrics: QualityMetrics,
}

/// Identifies one transform stage, used for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Deskew,
    MoireRemoval,
    ShowThroughRemoval,
    BackgroundWhitening,
    ContrastAdjustment,
    Clahe,
    LineEnhancement,
    GridLineRemoval,
    TextEnhancement,
    DotMatrixEnhancement,
    NoiseRemoval,
    Binarization,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Deskew => "deskew",
            StageKind::MoireRemoval => "moire_removal",
            StageKind::ShowThroughRemoval => "show_through_removal",
            StageKind::BackgroundWhitening => "background_whitening",
            StageKind::ContrastAdjustment => "contrast_adjustment",
            StageKind::Clahe => "clahe",
            StageKind::LineEnhancement => "line_enhancement",
            StageKind::GridLineRemoval => "grid_line_removal",
            StageKind::TextEnhancement => "text_enhancement",
            StageKind::DotMatrixEnhancement => "dot_matrix_enhancement",
            StageKind::NoiseRemoval => "noise_removal",
            StageKind::Binarization => "binarization",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_declaration_order() {
        assert_eq!(DocumentCondition::ALL[0], DocumentCondition::Normal);
        assert_eq!(DocumentCondition::ALL[9], DocumentCondition::Watermarked);
        assert_eq!(DocumentCondition::default(), DocumentCondition::Normal);
    }

    #[test]
    fn test_rect_expanded_is_clipped() {
        let rect = Rect::new(1, 2, 5, 5);
        let grown = rect.expanded(3, 8, 20);
        assert_eq!(grown, Rect::new(0, 0, 8, 10));
        assert!(grown.contains(7, 9));
        assert!(!grown.contains(8, 9));
    }

    #[test]
    fn test_error_display_prefixes() {
        let err = PreprocessingError::invalid("window size must be positive");
        assert_eq!(
            err.to_string(),
            "[INVALID_INPUT] window size must be positive"
        );
        let err = PreprocessingError::exhausted("too big");
        assert!(err.to_string().starts_with("[RESOURCE_EXHAUSTED]"));
    }

    #[test]
    fn test_recommended_action_serializes_as_string() {
        let json = serde_json::to_string(&RecommendedAction::ReduceNoise).unwrap();
        assert_eq!(json, "\"reduce_noise\"");
    }
}
