//! Exposure-level drivers.
//!
//! [`correct_exposure`] and [`synthesize_exposure`] process one file each:
//! resolve the calibration, specialize it to the exposure epoch, run every
//! amplifier quadrant through the column model, and write the result as a
//! sibling file. Inputs are never modified; the output is a copy that is
//! removed again if anything fails partway.
//!
//! [`correct_batch`] runs a list of files with per-file error isolation:
//! one bad exposure is logged and skipped, the rest still process.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ndarray::Array2;

use detrail::calib::{EnvPathResolver, RefPathResolver, TrapCalibration};
use detrail::noise;
use detrail::sim::diag::{NullSink, TextSink};
use detrail::{
    blur_regions, correct_regions, AmpRegion, CorrectionReport, CteError, NoiseMode, TrapModel,
};

use crate::config::TaskConfig;
use crate::error::{PipelineError, Result};
use crate::exposure::{self, ChipInfo, Exposure, ExposureMeta};
use crate::quadrant;
use crate::units::{self, SignalUnits};

/// A successfully processed exposure.
#[derive(Debug)]
pub struct ExposureOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub report: CorrectionReport,
}

/// Result of a batch run. Failures carry the error that stopped each file.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<ExposureOutcome>,
    pub failed: Vec<(PathBuf, PipelineError)>,
}

/// Remove readout trailing from one exposure.
///
/// Everything that can be validated is validated before the output copy is
/// made, so a refused exposure leaves no file behind.
pub fn correct_exposure(input: &Path, config: &TaskConfig) -> Result<ExposureOutcome> {
    let mode = NoiseMode::from_flag(config.noise_model)?;
    log::info!("correcting {}", input.display());

    let exposure = Exposure::open(input)?;
    let meta = exposure.meta().clone();
    drop(exposure);

    let calib = resolve_calibration(&meta, config)?;
    check_detector(&meta, &calib)?;
    let (model, model_warnings) = calib.model_for(meta.expstart)?;

    // The model works in electrons; counts are refused rather than
    // silently rescaled since the error plane would be wrong either way.
    if config.units == Some(SignalUnits::Counts) {
        return Err(CteError::InvalidUnits("counts".into()).into());
    }
    for chip in &meta.chips {
        if resolve_units(chip, config)? == SignalUnits::Counts {
            return Err(CteError::InvalidUnits(
                chip.bunit.clone().unwrap_or_else(|| "counts".into()),
            )
            .into());
        }
    }

    let output = output_path(input, &config.output_suffix);
    fs::copy(input, &output)?;
    let pending = PendingOutput::new(&output);

    let mut report = apply_correction(input, &output, &model, mode, config)?;
    let mut warnings = model_warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;

    pending.keep();
    log::info!("wrote {}", output.display());
    Ok(ExposureOutcome {
        input: input.to_path_buf(),
        output,
        report,
    })
}

fn apply_correction(
    input: &Path,
    output: &Path,
    model: &TrapModel,
    mode: NoiseMode,
    config: &TaskConfig,
) -> Result<CorrectionReport> {
    let mut exposure = Exposure::edit(output)?;
    let chips = exposure.meta().chips.clone();

    let mut planes = Vec::with_capacity(chips.len());
    for chip in &chips {
        let (sci, err) = exposure.read_chip(chip)?;
        planes.push((chip.clone(), sci, err));
    }

    if config.debug_artifacts {
        write_noise_split(input, &planes, model, mode)?;
    }

    let mut regions = Vec::new();
    let mut placements = Vec::new();
    for (pi, (chip, sci, err)) in planes.iter().enumerate() {
        for slot in quadrant::slots_for_extver(chip.extver) {
            regions.push(AmpRegion {
                amp: slot.amp,
                sci: quadrant::extract(sci, &slot),
                err: quadrant::extract(err, &slot),
            });
            placements.push((pi, slot));
        }
    }

    let report = if config.debug_artifacts {
        let trace = fs::File::create(sibling(input, "_cte_log.txt"))?;
        let mut sink = TextSink::new(BufWriter::new(trace));
        correct_regions(&mut regions, model, mode, &mut sink)?
    } else {
        correct_regions(&mut regions, model, mode, &mut NullSink)?
    };

    for ((pi, slot), region) in placements.iter().zip(regions.iter()) {
        let (_, sci, err) = &mut planes[*pi];
        quadrant::insert(sci, slot, &region.sci);
        quadrant::insert(err, slot, &region.err);
    }
    for (chip, sci, err) in &planes {
        exposure.write_chip(chip, sci, err)?;
    }
    exposure.write_provenance(model, mode)?;
    Ok(report)
}

/// Intermediate planes of the debug bundle: the science image with read
/// noise removed, and the removed noise itself.
fn write_noise_split(
    input: &Path,
    planes: &[(ChipInfo, Array2<f64>, Array2<f64>)],
    model: &TrapModel,
    mode: NoiseMode,
) -> Result<()> {
    let mut without = Vec::new();
    let mut noise_only = Vec::new();
    for (chip, sci, _) in planes {
        let mut signal_plane = Array2::zeros(sci.dim());
        let mut noise_plane = Array2::zeros(sci.dim());
        for slot in quadrant::slots_for_extver(chip.extver) {
            let region = quadrant::extract(sci, &slot);
            let (signal, noise) = noise::decompose(&region, model.rn_clip, mode);
            quadrant::insert(&mut signal_plane, &slot, &signal);
            quadrant::insert(&mut noise_plane, &slot, &noise);
        }
        without.push((chip.extver, signal_plane));
        noise_only.push((chip.extver, noise_plane));
    }
    exposure::write_image_stack(sibling(input, "_cte_wo_tmp.fits"), &without)?;
    exposure::write_image_stack(sibling(input, "_cte_rn_tmp.fits"), &noise_only)?;
    Ok(())
}

/// Synthesize readout trailing onto one pristine exposure.
///
/// The inverse of [`correct_exposure`], typically fed simulated frames.
/// Planes stored in counts are converted to electrons around the
/// simulation using the per-amp gains; error planes are left untouched.
pub fn synthesize_exposure(input: &Path, config: &TaskConfig) -> Result<ExposureOutcome> {
    log::info!("synthesizing trailing onto {}", input.display());

    let exposure = Exposure::open(input)?;
    let meta = exposure.meta().clone();
    drop(exposure);

    let calib = resolve_calibration(&meta, config)?;
    check_detector(&meta, &calib)?;
    let (model, model_warnings) = calib.model_for(meta.expstart)?;

    let output = output_path(input, &config.output_suffix);
    fs::copy(input, &output)?;
    let pending = PendingOutput::new(&output);

    let mut exposure = Exposure::edit(&output)?;
    let chips = exposure.meta().chips.clone();
    let gains = exposure.meta().gains;

    let mut report = CorrectionReport {
        cte_frac: model.cte_frac,
        warnings: Vec::new(),
        regions: Vec::new(),
    };
    for chip in &chips {
        let chip_units = resolve_units(chip, config)?;
        let (mut sci, err) = exposure.read_chip(chip)?;

        let mut regions = Vec::new();
        let mut slots = Vec::new();
        for slot in quadrant::slots_for_extver(chip.extver) {
            let mut region_sci = quadrant::extract(&sci, &slot);
            if chip_units == SignalUnits::Counts {
                let gain = gains.for_amp(slot.amp);
                if !gain.is_finite() || gain <= 0.0 {
                    return Err(PipelineError::MalformedExposure {
                        path: output.clone(),
                        reason: format!(
                            "amp {} gain {gain} cannot be used for unit conversion",
                            slot.amp
                        ),
                    });
                }
                units::counts_to_electrons(&mut region_sci, gain);
            }
            regions.push(AmpRegion {
                amp: slot.amp,
                sci: region_sci,
                err: quadrant::extract(&err, &slot),
            });
            slots.push(slot);
        }

        let chip_report = blur_regions(&mut regions, &model)?;
        report.warnings.extend(chip_report.warnings);
        report.regions.extend(chip_report.regions);

        for (slot, region) in slots.iter().zip(regions.iter_mut()) {
            if chip_units == SignalUnits::Counts {
                units::electrons_to_counts(&mut region.sci, gains.for_amp(slot.amp));
            }
            quadrant::insert(&mut sci, slot, &region.sci);
        }
        exposure.write_chip(chip, &sci, &err)?;
    }
    exposure.write_synthesis_note(&model)?;
    let mut warnings = model_warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;

    pending.keep();
    log::info!("wrote {}", output.display());
    Ok(ExposureOutcome {
        input: input.to_path_buf(),
        output,
        report,
    })
}

/// Correct a list of exposures, isolating failures per file.
pub fn correct_batch(inputs: &[PathBuf], config: &TaskConfig) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for input in inputs {
        match correct_exposure(input, config) {
            Ok(done) => outcome.succeeded.push(done),
            Err(e) => {
                log::error!("skipping {}: {e}", input.display());
                outcome.failed.push((input.clone(), e));
            }
        }
    }
    outcome
}

/// Expand command-line inputs, reading `@listfile` arguments one path per
/// line with `#` comments.
pub fn expand_inputs(raw: &[String]) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for item in raw {
        match item.strip_prefix('@') {
            Some(list) => {
                let path = PathBuf::from(list);
                let text =
                    fs::read_to_string(&path).map_err(|e| PipelineError::BadInputList {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                for line in text.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    inputs.push(PathBuf::from(line));
                }
            }
            None => inputs.push(PathBuf::from(item)),
        }
    }
    Ok(inputs)
}

/// Units of one chip's planes: an explicit configuration tag wins,
/// otherwise the extension's `BUNIT` decides.
fn resolve_units(chip: &ChipInfo, config: &TaskConfig) -> Result<SignalUnits> {
    match config.units {
        Some(units) => Ok(units),
        None => Ok(SignalUnits::from_bunit(chip.bunit.as_deref())?),
    }
}

fn resolve_calibration(meta: &ExposureMeta, config: &TaskConfig) -> Result<TrapCalibration> {
    let path = match &config.reference_override {
        Some(path) => {
            if !path.is_file() {
                return Err(CteError::RefFileNotFound { path: path.clone() }.into());
            }
            path.clone()
        }
        None => {
            let locator = meta.pctetab.as_deref().ok_or(CteError::MissingKey {
                key: "PCTETAB".into(),
            })?;
            EnvPathResolver.resolve_existing(locator)?
        }
    };
    log::debug!("trap calibration: {}", path.display());
    Ok(TrapCalibration::read(&path)?)
}

fn check_detector(meta: &ExposureMeta, calib: &TrapCalibration) -> Result<()> {
    if meta.detector.eq_ignore_ascii_case(&calib.detector) {
        Ok(())
    } else {
        Err(CteError::UnsupportedDetector {
            image: meta.detector.clone(),
            calibration: calib.detector.clone(),
        }
        .into())
    }
}

fn output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("exposure");
    input.with_file_name(format!("{stem}_{suffix}.fits"))
}

fn sibling(input: &Path, tail: &str) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("exposure");
    input.with_file_name(format!("{stem}{tail}"))
}

/// Removes the output copy on drop unless the run completed.
struct PendingOutput {
    path: PathBuf,
    keep: bool,
}

impl PendingOutput {
    fn new(path: &Path) -> Self {
        PendingOutput {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!(
                    "could not remove partial output {}: {e}",
                    self.path.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_output_path_keeps_directory_and_adds_suffix() {
        let out = output_path(Path::new("/data/obs/j8c0d1011_raw.fits"), "cte");
        assert_eq!(out, PathBuf::from("/data/obs/j8c0d1011_raw_cte.fits"));
    }

    #[test]
    fn test_expand_inputs_mixes_paths_and_lists() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("inputs.lst");
        fs::write(&list, "# batch one\n a.fits \n\nb.fits\n# done\n").unwrap();

        let raw = vec![
            "direct.fits".to_string(),
            format!("@{}", list.display()),
        ];
        let inputs = expand_inputs(&raw).unwrap();
        assert_eq!(
            inputs,
            vec![
                PathBuf::from("direct.fits"),
                PathBuf::from("a.fits"),
                PathBuf::from("b.fits"),
            ]
        );
    }

    #[test]
    fn test_expand_inputs_reports_missing_list() {
        let raw = vec!["@/no/such/list.lst".to_string()];
        assert!(matches!(
            expand_inputs(&raw),
            Err(PipelineError::BadInputList { .. })
        ));
    }

    #[test]
    fn test_explicit_units_tag_overrides_detection() {
        // No BUNIT keyword: auto-detection falls back to electrons, so a
        // DN frame needs the explicit tag to get its gains applied.
        let chip = ChipInfo {
            extver: 1,
            sci_index: 1,
            err_index: 2,
            bunit: None,
            shape: (8, 4),
        };
        assert_eq!(
            resolve_units(&chip, &TaskConfig::default()).unwrap(),
            SignalUnits::Electrons
        );

        let tagged = TaskConfig {
            units: Some(SignalUnits::Counts),
            ..TaskConfig::default()
        };
        assert_eq!(resolve_units(&chip, &tagged).unwrap(), SignalUnits::Counts);
    }

    #[test]
    fn test_pending_output_removes_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.fits");
        fs::write(&path, b"tmp").unwrap();

        {
            let _pending = PendingOutput::new(&path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_pending_output_keep() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("final.fits");
        fs::write(&path, b"tmp").unwrap();

        let pending = PendingOutput::new(&path);
        pending.keep();
        assert!(path.exists());
    }
}
