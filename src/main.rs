use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use docprep::errors::error_logging;
use docprep::image_io::{load_pixel_buffer, save_pixel_buffer};
use docprep::observability;
use docprep::{AppConfig, AppError, AppResult, Pipeline, PreprocessingOptions, ProcessingMode};
use tracing::info;

/// Preprocess a scanned document image for OCR
#[derive(Debug, Parser)]
#[command(name = "docprep")]
#[command(about = "Document image preprocessing for OCR")]
struct CliArgs {
    /// Input image (any format the image crate decodes)
    input: PathBuf,

    /// Output image; the format follows the extension
    output: PathBuf,

    /// JSON file with manual preprocessing options; auto mode when absent
    #[arg(long, value_name = "PATH")]
    options: Option<PathBuf>,

    /// Print the analysis and quality report as JSON
    #[arg(long)]
    report: bool,
}

/// Reads manual options from JSON; missing fields take their defaults
fn load_options(path: &Path) -> AppResult<PreprocessingOptions> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        error_logging::log_io_error(&e, "read_options", path.to_str());
        AppError::from(e)
    })?;
    let options: PreprocessingOptions = serde_json::from_str(&raw)?;
    options.validate()?;
    Ok(options)
}

fn run(args: CliArgs, config: &AppConfig) -> AppResult<()> {
    let mode = match &args.options {
        Some(path) => ProcessingMode::Manual(load_options(path)?),
        None => ProcessingMode::Auto,
    };

    let source = load_pixel_buffer(&args.input)?;
    let pipeline = Pipeline::new(config.pipeline);
    let output = pipeline.run(&source, &mode)?;
    save_pixel_buffer(&output.image, &args.output)?;

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        stages = output.stages_applied.len(),
        "Document preprocessed"
    );

    if args.report {
        let report = serde_json::to_string_pretty(&output.report())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        println!("{}", report);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("failed to initialise tracing: {}", e);
        return ExitCode::FAILURE;
    }
    info!("{}", config.summary());

    match run(args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional_and_flags() {
        let parsed = CliArgs::try_parse_from([
            "docprep", "in.png", "out.png", "--report", "--options", "o.json",
        ])
        .unwrap();
        assert_eq!(parsed.input, PathBuf::from("in.png"));
        assert_eq!(parsed.output, PathBuf::from("out.png"));
        assert_eq!(parsed.options, Some(PathBuf::from("o.json")));
        assert!(parsed.report);
    }

    #[test]
    fn test_defaults_to_auto_mode_without_report() {
        let parsed = CliArgs::try_parse_from(["docprep", "in.png", "out.png"]).unwrap();
        assert!(parsed.options.is_none());
        assert!(!parsed.report);
    }

    #[test]
    fn test_parse_rejects_bad_usage() {
        assert!(CliArgs::try_parse_from(["docprep", "only-one.png"]).is_err());
        assert!(CliArgs::try_parse_from(["docprep", "a.png", "b.png", "--verbose"]).is_err());
        assert!(CliArgs::try_parse_from(["docprep", "a.png", "b.png", "--options"]).is_err());
    }
}
