//! # docprep
//!
//! Document-image preprocessing for OCR. A page is classified by its dominant
//! defect (moire, show-through, dot-matrix print, aging, grid background,
//! skew, poor illumination), a matching preset is chosen, and a fixed chain
//! of pixel transforms is applied to it. A quality prediction on the result
//! can trigger one extra enhancement pass.

pub mod config;
pub mod errors;
pub mod image_io;
pub mod observability;
pub mod pipeline;
pub mod preprocessing;

// Re-export types for easier access
pub use config::{AppConfig, ObservabilityConfig, PipelineSettings};
pub use errors::{AppError, AppResult};
pub use pipeline::{Pipeline, PipelineError, PipelineOutput, PipelineReport, PipelineState};
pub use preprocessing::{
    DocumentAnalysis, DocumentCondition, OcrQualityPrediction, PixelBuffer, PreprocessingError,
    PreprocessingOptions, ProcessingMode, QualityAnalyzer, StageKind,
};
