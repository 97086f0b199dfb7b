//! Synthesize readout trailing, optionally onto generated star fields.
//!
//! With `--generate`, each input path is first created as a synthetic
//! exposure (flat sky plus point sources) before trailing is applied, so
//! a complete test scene needs nothing but a trap table:
//!
//! ```text
//! make_trap_table traps.fits
//! cte_synth --generate --pctetab traps.fits scene.fits
//! cte_correct --pctetab traps.fits scene_sim.fits
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use detrail_pipeline::exposure::{create_exposure, AmpGains, ChipData, Exposure, ExposureHeader};
use detrail_pipeline::units::SignalUnits;
use detrail_pipeline::{expand_inputs, synthesize_exposure, synthetic, TaskConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Add parallel readout trailing to pristine CCD exposures"
)]
struct Args {
    #[arg(
        required = true,
        help = "Exposure files, or @list files with one path per line"
    )]
    inputs: Vec<String>,

    #[arg(
        long,
        help = "Create each input as a synthetic star field before trailing it"
    )]
    generate: bool,

    #[arg(
        long,
        default_value = "512x128",
        value_parser = parse_shape,
        help = "Generated image shape as ROWSxCOLS"
    )]
    shape: (usize, usize),

    #[arg(long, default_value = "40", help = "Stars per generated image")]
    stars: usize,

    #[arg(long, default_value = "30.0", help = "Sky level, electrons")]
    sky: f64,

    #[arg(long, default_value = "2000.0", help = "Brightest star peak, electrons")]
    peak: f64,

    #[arg(long, default_value = "54500.0", help = "EXPSTART written on generated images, MJD")]
    expstart: f64,

    #[arg(long, default_value = "2.0", help = "ATODGN written on generated images")]
    gain: f64,

    #[arg(long, default_value = "ELECTRONS", help = "BUNIT written on generated images")]
    bunit: String,

    #[arg(
        long,
        value_parser = parse_units,
        help = "Units of the input planes, counts or electrons (default: detect from BUNIT)"
    )]
    units: Option<SignalUnits>,

    #[arg(
        long,
        help = "Trap calibration file; written into generated headers and used for trailing"
    )]
    pctetab: Option<PathBuf>,

    #[arg(long, default_value = "sim", help = "Output suffix")]
    suffix: String,

    #[arg(
        long,
        value_name = "SIGMA",
        help = "Add Gaussian read noise to the trailed output, electrons"
    )]
    read_noise: Option<f64>,

    #[arg(long, default_value = "57", help = "Random seed")]
    seed: u64,
}

fn parse_shape(raw: &str) -> std::result::Result<(usize, usize), String> {
    let (rows, cols) = raw
        .split_once('x')
        .ok_or_else(|| format!("expected ROWSxCOLS, got '{raw}'"))?;
    let rows = rows
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad row count '{rows}': {e}"))?;
    let cols = cols
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("bad column count '{cols}': {e}"))?;
    Ok((rows, cols))
}

fn parse_units(raw: &str) -> std::result::Result<SignalUnits, String> {
    SignalUnits::from_tag(raw).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.generate && args.pctetab.is_none() {
        bail!("--generate needs --pctetab so the header can point at a trap table");
    }

    let config = TaskConfig {
        units: args.units,
        output_suffix: args.suffix.clone(),
        reference_override: args.pctetab.clone(),
        ..TaskConfig::default()
    };

    let inputs = expand_inputs(&args.inputs)?;
    info!("trailing {} exposure(s)", inputs.len());

    let mut failed = 0usize;
    for (index, input) in inputs.iter().enumerate() {
        let seed = args.seed.wrapping_add(index as u64);

        if args.generate {
            let sci = synthetic::star_field(args.shape, args.sky, args.stars, args.peak, seed);
            let err = Array2::from_elem(args.shape, args.sky.sqrt().max(1.0));
            let header = ExposureHeader {
                detector: "WFC".into(),
                expstart: args.expstart,
                pctetab: args.pctetab.as_ref().map(|p| p.display().to_string()),
                gains: AmpGains::uniform(args.gain),
                bunit: args.bunit.clone(),
            };
            create_exposure(input, &header, &[ChipData { extver: 1, sci, err }])?;
            info!("generated {}", input.display());
        }

        match synthesize_exposure(input, &config) {
            Ok(outcome) => {
                if let Some(sigma) = args.read_noise {
                    add_noise(&outcome.output, sigma, seed)?;
                }
                info!(
                    "{} -> {} (scale {:.3})",
                    outcome.input.display(),
                    outcome.output.display(),
                    outcome.report.cte_frac
                );
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} exposure(s) failed", inputs.len());
    }
    Ok(())
}

fn add_noise(path: &Path, sigma: f64, seed: u64) -> Result<()> {
    let mut exposure = Exposure::edit(path)?;
    let chips = exposure.meta().chips.clone();
    for (index, chip) in chips.iter().enumerate() {
        let (mut sci, err) = exposure.read_chip(chip)?;
        synthetic::add_read_noise(&mut sci, sigma, seed.wrapping_add(index as u64));
        exposure.write_chip(chip, &sci, &err)?;
    }
    Ok(())
}
