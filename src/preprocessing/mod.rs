//! # Image Preprocessing Module
//!
//! Pixel-level transforms that prepare scanned documents for OCR, together
//! with the quality analysis that classifies a page and the presets chosen
//! from that classification.
//!
//! The module is organized into focused sub-modules:
//! - `buffer`: the owned 3-channel [`PixelBuffer`] every stage consumes and produces
//! - `integral`: summed-area tables for O(1) window statistics
//! - `types`: shared types and error definitions
//! - `options`: [`PreprocessingOptions`] and per-stage parameters
//! - `profiles`: condition-specific presets and the [`ProfileSelector`]
//! - `quality`: metrics, condition classification and OCR quality prediction
//! - `adjustments`: grayscale, background whitening and contrast
//! - `filtering`: median-filter denoising
//! - `clahe`: contrast-limited adaptive histogram equalization
//! - `thresholding`: Sauvola binarization and Otsu ink masks
//! - `enhancement`: ruled-line thickening and adaptive text enhancement
//! - `moire`: frequency-domain moire removal
//! - `show_through`: reverse-side bleed removal
//! - `grid`: grid-line removal with text protection
//! - `dot_matrix`: dot-matrix stroke reconstruction
//! - `deskewing`: skew detection and correction

pub mod adjustments;
pub mod buffer;
pub mod clahe;
pub mod deskewing;
pub mod dot_matrix;
pub mod enhancement;
pub mod filtering;
pub mod grid;
pub mod integral;
pub mod moire;
pub mod options;
pub mod profiles;
pub mod quality;
pub mod show_through;
pub mod thresholding;
pub mod types;

// Re-export commonly used types and functions for convenience
pub use buffer::{PixelBuffer, CHANNELS, PARALLEL_THRESHOLD_PIXELS};
pub use integral::IntegralImageTable;
pub use options::{
    ClaheParams, DotMatrixParams, GridParams, MoireParams, PreprocessingOptions, ProcessingMode,
    SauvolaParams, ShowThroughParams,
};
pub use profiles::ProfileSelector;
pub use quality::QualityAnalyzer;
pub use types::{
    BackgroundCharacteristics, DocumentAnalysis, DocumentCondition, OcrQualityPrediction,
    PreprocessingError, ProblemArea, QualityMetrics, RecommendedAction, Rect, StageKind,
    TextCharacteristics,
};

pub use adjustments::{adjust_contrast, to_grayscale, whiten_background};
pub use clahe::apply_clahe;
pub use deskewing::deskew;
pub use dot_matrix::enhance_dot_matrix;
pub use enhancement::{enhance_lines, enhance_text};
pub use filtering::median_filter;
pub use grid::remove_grid_lines;
pub use moire::remove_moire;
pub use show_through::{remove_show_through_dual, remove_show_through_single};
pub use thresholding::apply_sauvola;
