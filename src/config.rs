//! # Unified Application Configuration
//!
//! Pipeline and observability settings loaded from environment variables
//! (a `.env` file is read first by the binary through `dotenvy`), with
//! validation returning [`AppError::Config`].

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Default predicted-accuracy threshold below which one retry pass runs.
pub const DEFAULT_QUALITY_THRESHOLD: f32 = 0.85;

/// Default upper bound on input size, in pixels.
pub const DEFAULT_MAX_PIXELS: u64 = 150_000_000;

/// Pipeline-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Predicted OCR accuracy below which the retry pass runs
    pub quality_threshold: f32,
    /// Inputs above this many pixels are rejected as `ResourceExhausted`
    pub max_pixels: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl PipelineSettings {
    /// Validate pipeline settings
    pub fn validate(&self) -> AppResult<()> {
        if !(self.quality_threshold > 0.0 && self.quality_threshold <= 1.0) {
            return Err(AppError::Config(format!(
                "Quality threshold must be in (0, 1], got {}",
                self.quality_threshold
            )));
        }
        if self.max_pixels == 0 {
            return Err(AppError::Config("Max pixels cannot be 0".to_string()));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(AppError::Config(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Observability configuration for different environments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// Log level for the docprep target
    pub log_level: String,
    /// Explicit format; when unset, development logs pretty and everything else JSON
    pub log_format: Option<LogFormat>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: None,
        }
    }
}

impl ObservabilityConfig {
    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Format actually used by the subscriber
    pub fn effective_format(&self) -> LogFormat {
        match self.log_format {
            Some(format) => format,
            None if self.is_development() => LogFormat::Pretty,
            None => LogFormat::Json,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "Invalid log level: {}",
                self.log_level
            )));
        }
        if self.environment.trim().is_empty() {
            return Err(AppError::Config("Environment cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Unified application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline configuration
    pub pipeline: PipelineSettings,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> AppResult<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid number", key))),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let pipeline = PipelineSettings {
            quality_threshold: parse_var(
                &lookup,
                "DOCPREP_QUALITY_THRESHOLD",
                DEFAULT_QUALITY_THRESHOLD,
            )?,
            max_pixels: parse_var(&lookup, "DOCPREP_MAX_PIXELS", DEFAULT_MAX_PIXELS)?,
        };

        let observability = ObservabilityConfig {
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            log_level: lookup("DOCPREP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: lookup("LOG_FORMAT").map(|v| v.parse()).transpose()?,
        };

        Ok(Self {
            pipeline,
            observability,
        })
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.pipeline.validate()?;
        self.observability.validate()?;
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: environment={}, quality_threshold={}, max_pixels={}, log_level={}",
            self.observability.environment,
            self.pipeline.quality_threshold,
            self.pipeline.max_pixels,
            self.observability.log_level
        )
    }
}
