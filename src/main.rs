mod cli;
mod logging;

use captag_core::captioner::{init_ort_runtime, CaptionError, CaptionerConfig, OnnxCaptioner};
use captag_core::{execute, plan, print_summary, progress, OpenCvMediaLoader, RunError};
use clap::error::ErrorKind;
use cli::CliConfig;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
enum AppError {
    #[error("captioner could not be initialised: {0}")]
    Captioner(#[from] CaptionError),
    #[error(transparent)]
    Run(#[from] RunError),
}

fn main() -> ExitCode {
    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(2),
            };
        }
    };

    logging::init(config.verbose);

    match run_captioning(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run_captioning(config: &CliConfig) -> Result<(), AppError> {
    let options = config.run_options();

    // Fails on a bad path, and returns before any model is loaded when every
    // file is already recorded.
    let plan = plan(&config.root, &options)?;
    if plan.is_empty() {
        print_summary(&plan.report, &options.output);
        return Ok(());
    }

    let captioner_config = CaptionerConfig::load_or_default(config.config.as_deref())?;
    let sampling = config.frames.unwrap_or(captioner_config.frames);

    info!(
        models = %captioner_config.models_dir.display(),
        batch = config.batch,
        frames = %sampling,
        pending = plan.pending.len(),
        "loading captioning model"
    );
    init_ort_runtime(&captioner_config.ort_library)?;
    let mut captioner = OnnxCaptioner::from_config(&captioner_config, config.batch)?;
    let loader = OpenCvMediaLoader::new(sampling);

    let progress_bar = progress::captioning_bar(plan.pending.len() as u64);
    let report = execute(plan, &options, &loader, &mut captioner, &progress_bar);
    progress_bar.finish_with_message("Captioning complete");

    print_summary(&report?, &options.output);
    Ok(())
}
