//! Write the built-in trap calibration to a FITS reference file.
//!
//! Produces a complete PCTETAB-style table (trap density, charge levels,
//! time-dependent scale, epoch-windowed tail profiles) that `cte_synth`
//! and `cte_correct` can consume, for environments without access to a
//! flight calibration.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use detrail::calib::write_calibration;
use detrail::TrapCalibration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Write the built-in parallel CTE trap calibration as a FITS reference file"
)]
struct Args {
    #[arg(help = "Output path for the calibration file")]
    output: PathBuf,

    #[arg(long, help = "Detector name stamped into the table")]
    detector: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut calib = TrapCalibration::sample();
    if let Some(detector) = args.detector {
        calib.detector = detector;
    }

    write_calibration(&calib, &args.output)?;

    let (start, end) = calib.scale.domain();
    info!(
        "{}: detector {}, {} charge levels, {} epoch window(s), MJD {start:.0}..{end:.0}",
        args.output.display(),
        calib.detector,
        calib.levels.len(),
        calib.profiles.len(),
    );
    Ok(())
}
