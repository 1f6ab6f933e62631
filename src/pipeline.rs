//! # Preprocessing Pipeline
//!
//! Orchestrates one run over a page: optional analysis and profile selection,
//! the enabled stages in their fixed order, then (when enabled) a quality
//! check with at most one follow-up enhancement pass.
//!
//! ```text
//! Idle -> Analyzing -> ProfileSelected -> Stage(..)* -> QualityChecked
//!      -> (Enhancing -> QualityChecked)? -> Done
//! ```
//!
//! The pipeline keeps no state between runs; one instance can be shared.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineSettings;
use crate::errors::error_logging;
use crate::observability::{pipeline_span, record_pipeline_metrics, record_stage_metrics, stage_span};
use crate::preprocessing::quality::choose_retry_action;
use crate::preprocessing::{
    adjust_contrast, apply_clahe, apply_sauvola, deskew, enhance_dot_matrix, enhance_lines,
    enhance_text, median_filter, remove_grid_lines, remove_moire, remove_show_through_dual,
    remove_show_through_single, whiten_background, DocumentAnalysis, OcrQualityPrediction,
    PixelBuffer, PreprocessingError, PreprocessingOptions, ProcessingMode, ProfileSelector,
    QualityAnalyzer, RecommendedAction, StageKind,
};

/// Fixed execution order of the stages.
pub const STAGE_ORDER: [StageKind; 12] = [
    StageKind::Deskew,
    StageKind::MoireRemoval,
    StageKind::ShowThroughRemoval,
    StageKind::BackgroundWhitening,
    StageKind::ContrastAdjustment,
    StageKind::Clahe,
    StageKind::LineEnhancement,
    StageKind::GridLineRemoval,
    StageKind::TextEnhancement,
    StageKind::DotMatrixEnhancement,
    StageKind::NoiseRemoval,
    StageKind::Binarization,
];

/// Progress of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Analyzing,
    ProfileSelected,
    Stage(StageKind),
    QualityChecked,
    Enhancing,
    Done,
}

/// Errors that abort a pipeline run. No buffer is returned with any of them.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The source, back scan or options failed validation before any stage ran
    InputRejected { source: PreprocessingError },
    /// A stage failed; the remaining chain was skipped
    StageFailed {
        stage: StageKind,
        source: PreprocessingError,
    },
    /// The cancellation token fired between stages
    Cancelled { completed_stages: Vec<StageKind> },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InputRejected { source } => {
                write!(f, "input rejected: {}", source)
            }
            PipelineError::StageFailed { stage, source } => {
                write!(f, "stage '{}' failed: {}", stage, source)
            }
            PipelineError::Cancelled { completed_stages } => {
                write!(
                    f,
                    "pipeline cancelled after {} stage(s)",
                    completed_stages.len()
                )
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::InputRejected { source } | PipelineError::StageFailed { source, .. } => {
                Some(source)
            }
            PipelineError::Cancelled { .. } => None,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Final buffer, same dimensions as the source
    pub image: PixelBuffer,
    /// Present in Auto mode
    pub analysis: Option<DocumentAnalysis>,
    /// Options the stages ran with
    pub options: PreprocessingOptions,
    /// Final prediction, present when the quality check ran
    pub prediction: Option<OcrQualityPrediction>,
    /// Stages in execution order, including a retry pass
    pub stages_applied: Vec<StageKind>,
    /// Follow-up enhancement chosen by the quality check
    pub retry_action: Option<RecommendedAction>,
    /// Every state the run passed through
    pub states: Vec<PipelineState>,
}

/// Serializable summary of a run, without the pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub width: u32,
    pub height: u32,
    pub analysis: Option<DocumentAnalysis>,
    pub options: PreprocessingOptions,
    pub prediction: Option<OcrQualityPrediction>,
    pub stages_applied: Vec<StageKind>,
    pub retry_action: Option<RecommendedAction>,
    pub states: Vec<PipelineState>,
}

impl PipelineOutput {
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            width: self.image.width(),
            height: self.image.height(),
            analysis: self.analysis.clone(),
            options: self.options,
            prediction: self.prediction.clone(),
            stages_applied: self.stages_applied.clone(),
            retry_action: self.retry_action,
            states: self.states.clone(),
        }
    }
}

/// Stages enabled by `options`, in execution order.
pub fn planned_stages(options: &PreprocessingOptions) -> Vec<StageKind> {
    STAGE_ORDER
        .iter()
        .copied()
        .filter(|stage| match stage {
            StageKind::Deskew => options.correct_skew,
            StageKind::MoireRemoval => options.remove_moire,
            StageKind::ShowThroughRemoval => options.remove_show_through,
            StageKind::BackgroundWhitening => options.convert_background_to_white,
            StageKind::ContrastAdjustment => options.adjust_contrast,
            StageKind::Clahe => options.equalize_histogram,
            StageKind::LineEnhancement => options.enhance_lines,
            StageKind::GridLineRemoval => options.remove_grid_lines,
            StageKind::TextEnhancement => options.enhance_text,
            StageKind::DotMatrixEnhancement => options.enhance_dot_matrix,
            StageKind::NoiseRemoval => options.remove_noise,
            StageKind::Binarization => options.binarize,
        })
        .collect()
}

/// Stages of a duplex run. The back scan is registered to the unaltered
/// front, so the subtraction moves ahead of every other stage, deskew
/// included.
pub fn planned_duplex_stages(options: &PreprocessingOptions) -> Vec<StageKind> {
    let mut stages = planned_stages(options);
    if let Some(i) = stages.iter().position(|&s| s == StageKind::ShowThroughRemoval) {
        let stage = stages.remove(i);
        stages.insert(0, stage);
    }
    stages
}

/// Runs one stage. `back` is the registered reverse side, if any.
fn apply_stage(
    stage: StageKind,
    input: &PixelBuffer,
    options: &PreprocessingOptions,
    back: Option<&PixelBuffer>,
) -> Result<PixelBuffer, PreprocessingError> {
    match stage {
        StageKind::Deskew => Ok(deskew(input)?.image),
        StageKind::MoireRemoval => remove_moire(input, &options.moire),
        StageKind::ShowThroughRemoval => match back {
            Some(back) => remove_show_through_dual(input, back, &options.show_through),
            None => remove_show_through_single(input, &options.show_through),
        },
        StageKind::BackgroundWhitening => whiten_background(input, options.background_threshold),
        StageKind::ContrastAdjustment => adjust_contrast(input, options.contrast_level),
        StageKind::Clahe => apply_clahe(input, &options.clahe),
        StageKind::LineEnhancement => enhance_lines(input, options.line_thickness),
        StageKind::GridLineRemoval => Ok(remove_grid_lines(input, &options.grid)?.image),
        StageKind::TextEnhancement => enhance_text(input, options.text_enhancement_level),
        StageKind::DotMatrixEnhancement => enhance_dot_matrix(input, &options.dot_matrix),
        StageKind::NoiseRemoval => median_filter(input, options.noise_window),
        StageKind::Binarization => apply_sauvola(input, &options.sauvola),
    }
}

/// Stage and options for the follow-up pass, stronger than the first pass
/// where that stage already ran.
fn retry_plan(
    action: RecommendedAction,
    options: &PreprocessingOptions,
) -> (StageKind, PreprocessingOptions) {
    let mut tuned = *options;
    let stage = match action {
        RecommendedAction::IncreaseContrast => {
            tuned.contrast_level = if options.adjust_contrast {
                (options.contrast_level + 20.0).min(100.0)
            } else {
                30.0
            };
            StageKind::ContrastAdjustment
        }
        RecommendedAction::ReduceNoise => {
            tuned.noise_window = if options.remove_noise {
                options.noise_window.max(3)
            } else {
                3
            };
            StageKind::NoiseRemoval
        }
        RecommendedAction::EnhanceText => {
            tuned.text_enhancement_level = if options.enhance_text {
                (options.text_enhancement_level + 20).min(100)
            } else {
                50
            };
            StageKind::TextEnhancement
        }
        RecommendedAction::WhitenBackground => {
            tuned.background_threshold = if options.convert_background_to_white {
                options.background_threshold.saturating_sub(20)
            } else {
                180
            };
            StageKind::BackgroundWhitening
        }
    };
    (stage, tuned)
}

/// Bookkeeping shared by the stage loop and the retry pass.
struct RunState<'a> {
    cancel: Option<&'a CancellationToken>,
    states: Vec<PipelineState>,
    stages_applied: Vec<StageKind>,
}

impl RunState<'_> {
    fn check_cancelled(&self) -> Result<(), PipelineError> {
        match self.cancel {
            Some(token) if token.is_cancelled() => {
                tracing::info!(
                    completed = self.stages_applied.len(),
                    "Pipeline cancelled between stages"
                );
                Err(PipelineError::Cancelled {
                    completed_stages: self.stages_applied.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn run_stage(
        &mut self,
        stage: StageKind,
        input: &PixelBuffer,
        options: &PreprocessingOptions,
        back: Option<&PixelBuffer>,
    ) -> Result<PixelBuffer, PipelineError> {
        self.check_cancelled()?;
        self.states.push(PipelineState::Stage(stage));
        let span = stage_span(stage);
        let _enter = span.enter();
        let start_time = Instant::now();

        let output = apply_stage(stage, input, options, back).map_err(|source| {
            error_logging::log_stage_error(
                &source,
                stage,
                Some(input.dimensions()),
                Some(start_time.elapsed()),
            );
            PipelineError::StageFailed { stage, source }
        })?;

        record_stage_metrics(stage, start_time.elapsed(), input.pixel_count());
        self.stages_applied.push(stage);
        Ok(output)
    }
}

/// Document preprocessing pipeline.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    settings: PipelineSettings,
    analyzer: QualityAnalyzer,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            analyzer: QualityAnalyzer::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs the pipeline on `source`.
    pub fn run(
        &self,
        source: &PixelBuffer,
        mode: &ProcessingMode,
    ) -> Result<PipelineOutput, PipelineError> {
        self.execute(source, None, mode, None)
    }

    /// Like [`Pipeline::run`], checking `cancel` before every stage.
    pub fn run_with_cancellation(
        &self,
        source: &PixelBuffer,
        mode: &ProcessingMode,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        self.execute(source, None, mode, Some(cancel))
    }

    /// Runs on a front page with its registered back side. Show-through
    /// removal is always enabled, uses the dual-side subtraction and runs
    /// first, before any stage that moves pixels.
    pub fn run_duplex(
        &self,
        front: &PixelBuffer,
        back: &PixelBuffer,
        mode: &ProcessingMode,
    ) -> Result<PipelineOutput, PipelineError> {
        self.execute(front, Some(back), mode, None)
    }

    fn validate_input(
        &self,
        source: &PixelBuffer,
        back: Option<&PixelBuffer>,
    ) -> Result<(), PreprocessingError> {
        source.ensure_processable()?;
        if source.pixel_count() as u64 > self.settings.max_pixels {
            return Err(PreprocessingError::ResourceExhausted {
                message: format!(
                    "{}x{} image exceeds the limit of {} pixels",
                    source.width(),
                    source.height(),
                    self.settings.max_pixels
                ),
            });
        }
        if let Some(back) = back {
            back.ensure_processable()?;
            if back.dimensions() != source.dimensions() {
                return Err(PreprocessingError::InvalidInput {
                    message: format!(
                        "back scan is {}x{}, front is {}x{}",
                        back.width(),
                        back.height(),
                        source.width(),
                        source.height()
                    ),
                });
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        source: &PixelBuffer,
        back: Option<&PixelBuffer>,
        mode: &ProcessingMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<PipelineOutput, PipelineError> {
        let start_time = Instant::now();
        let mode_name = match (mode, back.is_some()) {
            (_, true) => "duplex",
            (ProcessingMode::Auto, false) => "auto",
            (ProcessingMode::Manual(_), false) => "manual",
        };
        let span = pipeline_span(mode_name, source.width(), source.height());
        let _enter = span.enter();

        let result = self.execute_inner(source, back, mode, cancel);
        let retried = result
            .as_ref()
            .map(|output| output.retry_action.is_some())
            .unwrap_or(false);
        record_pipeline_metrics(result.is_ok(), start_time.elapsed(), retried);

        match &result {
            Ok(output) => tracing::info!(
                mode = mode_name,
                stages = output.stages_applied.len(),
                retried = retried,
                duration_ms = %format_ms(start_time.elapsed()),
                "Pipeline run completed"
            ),
            Err(err) => tracing::warn!(mode = mode_name, error = %err, "Pipeline run failed"),
        }
        result
    }

    fn execute_inner(
        &self,
        source: &PixelBuffer,
        back: Option<&PixelBuffer>,
        mode: &ProcessingMode,
        cancel: Option<&CancellationToken>,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut run = RunState {
            cancel,
            states: vec![PipelineState::Idle],
            stages_applied: Vec::new(),
        };

        self.validate_input(source, back)
            .map_err(|source| PipelineError::InputRejected { source })?;
        run.check_cancelled()?;

        let (analysis, mut options) = match mode {
            ProcessingMode::Auto => {
                run.states.push(PipelineState::Analyzing);
                let analysis = self.analyzer.analyze(source);
                let options = ProfileSelector::select(analysis.condition);
                tracing::debug!(
                    target: "ocr_preprocessing",
                    "Selected profile for condition {}",
                    analysis.condition.as_str()
                );
                (Some(analysis), options)
            }
            ProcessingMode::Manual(options) => (None, *options),
        };
        if back.is_some() {
            options.remove_show_through = true;
        }
        options
            .validate()
            .map_err(|source| PipelineError::InputRejected { source })?;
        run.states.push(PipelineState::ProfileSelected);

        // Disabled stages pass the previous buffer through without copying it
        let plan = if back.is_some() {
            planned_duplex_stages(&options)
        } else {
            planned_stages(&options)
        };
        let mut current: Option<PixelBuffer> = None;
        for stage in plan {
            let input = current.as_ref().unwrap_or(source);
            let output = run.run_stage(stage, input, &options, back)?;
            current = Some(output);
        }
        let mut image = current.unwrap_or_else(|| source.clone());

        let mut prediction = None;
        let mut retry_action = None;
        if options.retry_on_low_quality {
            run.check_cancelled()?;
            let first = self.analyzer.predict_ocr_quality(&image);
            run.states.push(PipelineState::QualityChecked);

            if first.estimated_accuracy < self.settings.quality_threshold {
                let action = choose_retry_action(&first);
                tracing::debug!(
                    target: "ocr_preprocessing",
                    "Predicted accuracy {:.3} below {:.2}, retrying with {}",
                    first.estimated_accuracy,
                    self.settings.quality_threshold,
                    action
                );
                run.states.push(PipelineState::Enhancing);
                let (stage, tuned) = retry_plan(action, &options);
                image = run.run_stage(stage, &image, &tuned, back)?;
                prediction = Some(self.analyzer.predict_ocr_quality(&image));
                run.states.push(PipelineState::QualityChecked);
                retry_action = Some(action);
            } else {
                prediction = Some(first);
            }
        }

        run.states.push(PipelineState::Done);
        Ok(PipelineOutput {
            image,
            analysis,
            options,
            prediction,
            stages_applied: run.stages_applied,
            retry_action,
            states: run.states,
        })
    }
}

fn format_ms(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64() * 1000.0)
}
