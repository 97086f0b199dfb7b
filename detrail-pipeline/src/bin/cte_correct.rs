//! Batch charge transfer efficiency correction.
//!
//! Removes parallel readout trailing from CCD exposures, writing each
//! result next to its input as `<stem>_<suffix>.fits`. Inputs may be
//! given directly or through `@list` files with one path per line.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{error, info};

use detrail_pipeline::{correct_exposure, expand_inputs, TaskConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Remove parallel readout trailing from CCD exposures"
)]
struct Args {
    #[arg(
        required = true,
        help = "Exposure files, or @list files with one path per line"
    )]
    inputs: Vec<String>,

    #[arg(long, help = "Read-noise model (0 = none, 1 = smoothing)")]
    noise_model: Option<i64>,

    #[arg(long, help = "Output suffix, producing <stem>_<suffix>.fits")]
    suffix: Option<String>,

    #[arg(
        long,
        help = "Trap calibration file, overriding the PCTETAB header key"
    )]
    pctetab: Option<PathBuf>,

    #[arg(long, help = "Task configuration JSON file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        help = "Write intermediate planes and a per-column trace next to each input"
    )]
    debug: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TaskConfig::load_from_file(path)
            .with_context(|| format!("reading task configuration {}", path.display()))?,
        None => TaskConfig::default(),
    };
    if let Some(noise_model) = args.noise_model {
        config.noise_model = noise_model;
    }
    if let Some(suffix) = args.suffix {
        config.output_suffix = suffix;
    }
    if let Some(pctetab) = args.pctetab {
        config.reference_override = Some(pctetab);
    }
    if args.debug {
        config.debug_artifacts = true;
    }

    let inputs = expand_inputs(&args.inputs)?;
    info!("correcting {} exposure(s)", inputs.len());

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    pb.set_message("correcting");

    let mut failed = 0usize;
    for input in &inputs {
        match correct_exposure(input, &config) {
            Ok(outcome) => {
                info!(
                    "{} -> {} (scale {:.3}, {} warning(s))",
                    outcome.input.display(),
                    outcome.output.display(),
                    outcome.report.cte_frac,
                    outcome.report.warnings.len()
                );
                for warning in &outcome.report.warnings {
                    info!("  {warning}");
                }
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if failed > 0 {
        bail!("{failed} of {} exposure(s) failed", inputs.len());
    }
    Ok(())
}
