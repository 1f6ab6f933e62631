//! Observability module for tracing and metrics setup.
//!
//! This module provides:
//! - Structured logging with configurable levels (pretty or JSON)
//! - Spans for pipeline runs and individual stages
//! - Stage and pipeline metrics through the `metrics` facade
//!
//! Metrics are recorded through the facade only; without an installed
//! recorder the calls are no-ops.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::prelude::*;

use crate::config::{LogFormat, ObservabilityConfig};
use crate::preprocessing::StageKind;

/// Initialize structured logging with tracing and configuration
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid observability configuration: {}", e))?;

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("docprep={}", config.log_level).parse()?)
        .add_directive(format!("ocr_preprocessing={}", config.log_level).parse()?);

    match config.effective_format() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
    }

    tracing::info!(
        environment = %config.environment,
        log_level = %config.log_level,
        "Tracing initialized with structured logging"
    );
    Ok(())
}

/// Create a span for a whole pipeline run
pub fn pipeline_span(mode: &str, width: u32, height: u32) -> tracing::Span {
    tracing::info_span!(
        "pipeline_run",
        mode = mode,
        width = width,
        height = height,
        component = "pipeline"
    )
}

/// Create a span for a single preprocessing stage
pub fn stage_span(stage: StageKind) -> tracing::Span {
    tracing::info_span!("preprocessing_stage", stage = stage.as_str(), component = "preprocessing")
}

/// Record stage metrics
pub fn record_stage_metrics(stage: StageKind, duration: Duration, pixels: usize) {
    metrics::counter!("preprocessing_stages_total", "stage" => stage.as_str()).increment(1);
    metrics::histogram!("preprocessing_stage_duration_seconds", "stage" => stage.as_str())
        .record(duration.as_secs_f64());
    metrics::histogram!("preprocessing_stage_pixels", "stage" => stage.as_str()).record(pixels as f64);
}

/// Record pipeline run metrics
pub fn record_pipeline_metrics(success: bool, duration: Duration, retried: bool) {
    metrics::counter!(
        "preprocessing_pipeline_runs_total",
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
    metrics::histogram!("preprocessing_pipeline_duration_seconds").record(duration.as_secs_f64());
    if retried {
        metrics::counter!("preprocessing_quality_retries_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        record_stage_metrics(StageKind::Clahe, Duration::from_millis(3), 100);
        record_pipeline_metrics(true, Duration::from_millis(10), false);
        record_pipeline_metrics(false, Duration::from_millis(10), true);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ObservabilityConfig {
            log_level: "loud".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_spans_carry_names() {
        let span = stage_span(StageKind::Binarization);
        // Disabled without a subscriber, but constructing it must not panic
        let _entered = span.enter();
        let _ = pipeline_span("auto", 10, 10);
    }
}
