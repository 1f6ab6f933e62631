//! # Application Error Types
//!
//! Application-level errors for configuration loading, the CLI and the image
//! I/O boundary. The preprocessing stages have their own
//! [`PreprocessingError`], and the pipeline wraps it in [`PipelineError`];
//! both convert into [`AppError`] at the application edge.

use std::fmt;

use crate::pipeline::PipelineError;
use crate::preprocessing::PreprocessingError;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// Invalid user input (options file, CLI arguments)
    Validation(String),
    /// Pipeline or stage failures
    Processing(String),
    /// File system and codec errors
    Io(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Validation(msg) => write!(f, "[VALIDATION] {}", msg),
            AppError::Processing(msg) => write!(f, "[PROCESSING] {}", msg),
            AppError::Io(msg) => write!(f, "[IO] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Processing(err.to_string())
    }
}

impl From<PreprocessingError> for AppError {
    fn from(err: PreprocessingError) -> Self {
        match err {
            PreprocessingError::InvalidInput { .. } => AppError::Validation(err.to_string()),
            _ => AppError::Processing(err.to_string()),
        }
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Standardized error logging utilities for consistent error reporting across the application
pub mod error_logging {
    use tracing::error;

    use crate::preprocessing::StageKind;

    /// Log a failed pipeline stage with image context
    pub fn log_stage_error(
        error: &impl std::fmt::Display,
        stage: StageKind,
        dimensions: Option<(u32, u32)>,
        processing_duration: Option<std::time::Duration>,
    ) {
        error!(
            error = %error,
            stage = %stage,
            dimensions = ?dimensions,
            processing_duration_ms = ?processing_duration.map(|d| d.as_millis()),
            "Preprocessing stage failed"
        );
    }

    /// Log file system and codec errors with path and operation context
    pub fn log_io_error(error: &impl std::fmt::Display, operation: &str, path: Option<&str>) {
        error!(
            error = %error,
            operation = %operation,
            path = ?path,
            "Image I/O failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::StageKind;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            AppError::Config("bad threshold".into()).to_string(),
            "[CONFIG] bad threshold"
        );
        assert_eq!(AppError::Io("missing".into()).to_string(), "[IO] missing");
    }

    #[test]
    fn test_preprocessing_error_conversion() {
        let invalid = PreprocessingError::InvalidInput {
            message: "zero width".into(),
        };
        assert!(matches!(AppError::from(invalid), AppError::Validation(_)));

        let exhausted = PreprocessingError::ResourceExhausted {
            message: "too big".into(),
        };
        assert!(matches!(AppError::from(exhausted), AppError::Processing(_)));
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let err = PipelineError::StageFailed {
            stage: StageKind::Clahe,
            source: PreprocessingError::InvalidInput {
                message: "tile count".into(),
            },
        };
        let app: AppError = err.into();
        assert!(app.to_string().contains("clahe"));
    }
}
