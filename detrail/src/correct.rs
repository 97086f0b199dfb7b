//! Full-frame correction across amplifier regions.
//!
//! A frame is corrected one amplifier quadrant at a time. Each
//! [`AmpRegion`] carries the science and error planes of one quadrant,
//! oriented so that row 0 is the row read out first; the caller owns the
//! mapping between detector coordinates and that orientation.
//!
//! Per region the science plane is split into a signal and a noise
//! estimate, every signal column is corrected independently (in parallel
//! across columns), the planes are recombined, and the error plane picks
//! up an extra term of one tenth of the applied change, added in
//! quadrature.

use std::fmt;

use ndarray::Axis;
use rayon::prelude::*;

use crate::calib::TrapModel;
use crate::error::{CteError, CteWarning, Result};
use crate::noise::{self, NoiseMode};
use crate::sim::diag::{ColumnDiagnostic, DiagnosticSink};
use crate::sim::{self, ColumnOutcome};

/// Readout amplifier, one per detector quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmpId {
    A,
    B,
    C,
    D,
}

impl AmpId {
    pub fn letter(self) -> char {
        match self {
            AmpId::A => 'A',
            AmpId::B => 'B',
            AmpId::C => 'C',
            AmpId::D => 'D',
        }
    }
}

impl fmt::Display for AmpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Column diagnostics are recorded for the first of these amps present in
/// the frame, so partial readouts still produce a useful trace.
pub const AMP_LOG_PRIORITY: [AmpId; 4] = [AmpId::C, AmpId::D, AmpId::A, AmpId::B];

/// One amplifier quadrant, oriented readout-first.
///
/// `sci` holds charge in electrons with row 0 nearest the serial register
/// and columns along the parallel transfer direction. `err` is the
/// matching error plane and must have the same shape.
#[derive(Debug, Clone)]
pub struct AmpRegion {
    pub amp: AmpId,
    pub sci: ndarray::Array2<f64>,
    pub err: ndarray::Array2<f64>,
}

/// Per-quadrant summary of one correction or synthesis run.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionStats {
    pub amp: AmpId,
    /// Columns processed.
    pub columns: usize,
    /// Pixels clamped to zero after the final pass.
    pub clamped_pixels: usize,
    /// Largest absolute change applied to any pixel, electrons.
    pub max_shift: f64,
}

/// Outcome of a whole-frame run.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionReport {
    /// Epoch scale factor the run used.
    pub cte_frac: f64,
    /// Non-fatal conditions encountered, in occurrence order.
    pub warnings: Vec<CteWarning>,
    /// One entry per region, in input order.
    pub regions: Vec<RegionStats>,
}

/// Correct trailed regions in place.
///
/// Diagnostics for the designated amp (see [`AMP_LOG_PRIORITY`]) are
/// replayed into `sink` in ascending column order regardless of the
/// parallel schedule.
pub fn correct_regions(
    regions: &mut [AmpRegion],
    model: &TrapModel,
    mode: NoiseMode,
    sink: &mut dyn DiagnosticSink,
) -> Result<CorrectionReport> {
    check_shapes(regions)?;

    let mut report = CorrectionReport {
        cte_frac: model.cte_frac,
        warnings: Vec::new(),
        regions: Vec::new(),
    };

    if model.cte_frac == 0.0 {
        log::info!("trap scale factor is 0, leaving the frame unchanged");
        for region in regions.iter() {
            report.regions.push(RegionStats {
                amp: region.amp,
                columns: region.sci.ncols(),
                clamped_pixels: 0,
                max_shift: 0.0,
            });
        }
        return Ok(report);
    }

    let diag_amp = designated_amp(regions);

    for region in regions.iter_mut() {
        let observed = region.sci.clone();
        let (mut signal, noise_est) = noise::decompose(&observed, model.rn_clip, mode);

        let is_diag = diag_amp == Some(region.amp);
        let input_totals: Vec<f64> = if is_diag {
            signal.axis_iter(Axis(1)).map(|c| c.sum()).collect()
        } else {
            Vec::new()
        };

        let outcomes: Vec<ColumnOutcome> = signal
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|col| sim::correct_column(&col.to_vec(), model))
            .collect();

        let mut clamped_pixels = 0;
        let mut deepest = 0.0f64;
        for (mut col, outcome) in signal.axis_iter_mut(Axis(1)).zip(&outcomes) {
            for (dst, &v) in col.iter_mut().zip(&outcome.values) {
                *dst = v;
            }
            clamped_pixels += outcome.clamped;
            deepest = deepest.min(outcome.deepest);
        }

        let corrected = noise::recombine(&signal, &noise_est);

        let mut max_shift = 0.0f64;
        for ((s, e), (&c, &o)) in region
            .sci
            .iter_mut()
            .zip(region.err.iter_mut())
            .zip(corrected.iter().zip(observed.iter()))
        {
            let delta = c - o;
            max_shift = max_shift.max(delta.abs());
            *s = c;
            let prior = *e;
            *e = (prior * prior + (0.1 * delta.abs()).powi(2)).sqrt();
        }

        if clamped_pixels > 0 {
            let warning = CteWarning::NegativeChargeClamped {
                amp: region.amp,
                pixels: clamped_pixels,
                deepest,
            };
            log::warn!("{warning}");
            report.warnings.push(warning);
        }

        log::debug!(
            "amp {}: corrected {} columns, max shift {max_shift:.3} e-, {clamped_pixels} clamped",
            region.amp,
            outcomes.len()
        );

        if is_diag {
            for (i, outcome) in outcomes.iter().enumerate() {
                sink.column(&ColumnDiagnostic {
                    column: i,
                    input_total: input_totals[i],
                    output_total: outcome.values.iter().sum(),
                    clamped: outcome.clamped,
                    residuals: outcome.residuals.clone(),
                });
            }
        }

        report.regions.push(RegionStats {
            amp: region.amp,
            columns: outcomes.len(),
            clamped_pixels,
            max_shift,
        });
    }

    Ok(report)
}

/// Synthesize readout trailing onto pristine regions in place.
///
/// The inverse of [`correct_regions`]: charge is redistributed down each
/// column as the readout would have done. Error planes are left untouched
/// since synthesized trailing adds no measurement uncertainty.
pub fn blur_regions(regions: &mut [AmpRegion], model: &TrapModel) -> Result<CorrectionReport> {
    check_shapes(regions)?;

    let mut report = CorrectionReport {
        cte_frac: model.cte_frac,
        warnings: Vec::new(),
        regions: Vec::new(),
    };

    for region in regions.iter_mut() {
        let outcomes: Vec<ColumnOutcome> = region
            .sci
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|col| sim::blur_column(&col.to_vec(), model))
            .collect();

        let mut clamped_pixels = 0;
        let mut deepest = 0.0f64;
        let mut max_shift = 0.0f64;
        for (mut col, outcome) in region.sci.axis_iter_mut(Axis(1)).zip(&outcomes) {
            for (dst, &v) in col.iter_mut().zip(&outcome.values) {
                max_shift = max_shift.max((v - *dst).abs());
                *dst = v;
            }
            clamped_pixels += outcome.clamped;
            deepest = deepest.min(outcome.deepest);
        }

        if clamped_pixels > 0 {
            let warning = CteWarning::NegativeChargeClamped {
                amp: region.amp,
                pixels: clamped_pixels,
                deepest,
            };
            log::warn!("{warning}");
            report.warnings.push(warning);
        }

        report.regions.push(RegionStats {
            amp: region.amp,
            columns: outcomes.len(),
            clamped_pixels,
            max_shift,
        });
    }

    Ok(report)
}

fn check_shapes(regions: &[AmpRegion]) -> Result<()> {
    for region in regions {
        if region.sci.dim() != region.err.dim() {
            return Err(CteError::RegionShape {
                amp: region.amp.letter(),
                sci: region.sci.dim(),
                err: region.err.dim(),
            });
        }
    }
    Ok(())
}

fn designated_amp(regions: &[AmpRegion]) -> Option<AmpId> {
    AMP_LOG_PRIORITY
        .into_iter()
        .find(|amp| regions.iter().any(|r| r.amp == *amp))
}
