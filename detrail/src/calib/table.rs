//! FITS serialization of the trap calibration reference file.
//!
//! The on-disk layout is described in the [module docs](super). Reading
//! tolerates extra extensions and any HDU order; extensions are matched by
//! `EXTNAME` and the `CHG_LEAK<i>` family is discovered by prefix.

use std::path::Path;

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::headers::ReadsKey;
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::Array2;

use super::{ModelConstants, ScaleTable, TailProfileTable, TrapCalibration, TrapDensityTable};
use crate::error::{CteError, Result};

pub(super) fn read_calibration(path: &Path, constants: ModelConstants) -> Result<TrapCalibration> {
    let mut fptr = FitsFile::open(path)?;

    let primary = fptr.primary_hdu()?;
    let rn_clip: f64 = read_required(&mut fptr, &primary, "RN_CLIP")?;
    let sim_nit: i64 = read_required(&mut fptr, &primary, "SIM_NIT")?;
    let shft_nit: i64 = read_required(&mut fptr, &primary, "SHFT_NIT")?;
    let declared_profiles = primary.read_key::<i64>(&mut fptr, "NCHGLEAK").ok();
    let detector = primary
        .read_key::<String>(&mut fptr, "DETECTOR")
        .map(|d| d.trim().to_string())
        .unwrap_or_else(|_| "WFC".to_string());

    if sim_nit < 1 || shft_nit < 1 {
        return Err(CteError::MalformedCalibration(format!(
            "iteration counts must be at least 1, got SIM_NIT={sim_nit} SHFT_NIT={shft_nit}"
        )));
    }

    let mut density = None;
    let mut levels = None;
    let mut scale = None;
    let mut profiles = Vec::new();

    let mut index = 0;
    while let Ok(hdu) = fptr.hdu(index) {
        index += 1;
        let name = match hdu.read_key::<String>(&mut fptr, "EXTNAME") {
            Ok(name) => name,
            Err(_) => continue,
        };
        match name.trim() {
            "DTDE" => {
                density = Some(TrapDensityTable {
                    dtde: hdu.read_col(&mut fptr, "DTDE")?,
                    q: hdu.read_col(&mut fptr, "Q")?,
                });
            }
            "LEVELS" => {
                levels = Some(hdu.read_col::<f64>(&mut fptr, "LEVEL")?);
            }
            "CTE_SCALE" => {
                scale = Some(ScaleTable::new(
                    hdu.read_col(&mut fptr, "MJD")?,
                    hdu.read_col(&mut fptr, "SCALE")?,
                )?);
            }
            other if other.starts_with("CHG_LEAK") => {
                profiles.push(read_profile(&mut fptr, &hdu, other)?);
            }
            _ => {}
        }
    }

    let density = density.ok_or_else(|| {
        CteError::MalformedCalibration("calibration is missing the DTDE extension".into())
    })?;
    let levels = levels.ok_or_else(|| {
        CteError::MalformedCalibration("calibration is missing the LEVELS extension".into())
    })?;
    let scale = scale.ok_or_else(|| {
        CteError::MalformedCalibration("calibration is missing the CTE_SCALE extension".into())
    })?;

    profiles.sort_by(|a: &TailProfileTable, b| a.mjd_start.total_cmp(&b.mjd_start));
    if let Some(declared) = declared_profiles {
        if declared as usize != profiles.len() {
            return Err(CteError::MalformedCalibration(format!(
                "NCHGLEAK declares {declared} tail profiles but {} CHG_LEAK extensions are present",
                profiles.len()
            )));
        }
    }

    let calib = TrapCalibration {
        detector,
        rn_clip,
        sim_nit: sim_nit as usize,
        shft_nit: shft_nit as usize,
        levels,
        density,
        scale,
        profiles,
        constants,
    };
    calib.validate()?;
    Ok(calib)
}

fn read_profile(fptr: &mut FitsFile, hdu: &FitsHdu, name: &str) -> Result<TailProfileTable> {
    let mjd_start: f64 = read_required(fptr, hdu, "MJD1")?;
    let mjd_end: f64 = read_required(fptr, hdu, "MJD2")?;

    let node_col: Vec<i32> = hdu.read_col(fptr, "NODE")?;
    let nodes = node_col
        .iter()
        .map(|&n| usize::try_from(n))
        .collect::<std::result::Result<Vec<usize>, _>>()
        .map_err(|_| {
            CteError::MalformedCalibration(format!("{name} carries a negative NODE value"))
        })?;

    // The LOG_Q_<k> columns are discovered from the table description so a
    // file may calibrate any number of charge decades.
    let mut columns: Vec<(usize, String)> = Vec::new();
    if let HduInfo::TableInfo {
        column_descriptions,
        ..
    } = &hdu.info
    {
        for col in column_descriptions {
            if let Some(suffix) = col.name.strip_prefix("LOG_Q_") {
                let decade: usize = suffix.trim().parse().map_err(|_| {
                    CteError::MalformedCalibration(format!(
                        "{name} column {} has a non-numeric decade suffix",
                        col.name
                    ))
                })?;
                columns.push((decade, col.name.clone()));
            }
        }
    }
    columns.sort_by_key(|&(decade, _)| decade);
    if columns.is_empty() {
        return Err(CteError::MalformedCalibration(format!(
            "{name} has no LOG_Q_ columns"
        )));
    }
    if columns
        .iter()
        .enumerate()
        .any(|(k, &(decade, _))| decade != k + 1)
    {
        return Err(CteError::MalformedCalibration(format!(
            "{name} LOG_Q_ columns must cover decades 1..={} without gaps",
            columns.len()
        )));
    }

    let mut samples = Array2::zeros((nodes.len(), columns.len()));
    for (k, (_, colname)) in columns.iter().enumerate() {
        let values: Vec<f64> = hdu.read_col(fptr, colname)?;
        if values.len() != nodes.len() {
            return Err(CteError::MalformedCalibration(format!(
                "{name} column {colname} has {} rows but {} NODE rows",
                values.len(),
                nodes.len()
            )));
        }
        for (i, v) in values.into_iter().enumerate() {
            samples[[i, k]] = v;
        }
    }

    Ok(TailProfileTable {
        mjd_start,
        mjd_end,
        nodes,
        samples,
    })
}

fn read_required<T: ReadsKey>(fptr: &mut FitsFile, hdu: &FitsHdu, key: &str) -> Result<T> {
    hdu.read_key(fptr, key).map_err(|_| CteError::MissingKey {
        key: key.to_string(),
    })
}

/// Write a calibration as a reference file, replacing any existing file.
pub fn write_calibration(calib: &TrapCalibration, path: impl AsRef<Path>) -> Result<()> {
    calib.validate()?;
    let mut fptr = FitsFile::create(path).overwrite().open()?;

    let primary = fptr.primary_hdu()?;
    primary.write_key(&mut fptr, "RN_CLIP", calib.rn_clip)?;
    primary.write_key(&mut fptr, "SIM_NIT", calib.sim_nit as i64)?;
    primary.write_key(&mut fptr, "SHFT_NIT", calib.shft_nit as i64)?;
    primary.write_key(&mut fptr, "NCHGLEAK", calib.profiles.len() as i64)?;
    primary.write_key(&mut fptr, "DETECTOR", calib.detector.as_str())?;

    let descriptions = vec![
        ColumnDescription::new("DTDE")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("Q")
            .with_type(ColumnDataType::Double)
            .create()?,
    ];
    let hdu = fptr.create_table("DTDE".to_string(), &descriptions)?;
    let hdu = hdu.write_col(&mut fptr, "DTDE", &calib.density.dtde)?;
    hdu.write_col(&mut fptr, "Q", &calib.density.q)?;

    let descriptions = vec![ColumnDescription::new("LEVEL")
        .with_type(ColumnDataType::Double)
        .create()?];
    let hdu = fptr.create_table("LEVELS".to_string(), &descriptions)?;
    hdu.write_col(&mut fptr, "LEVEL", &calib.levels)?;

    let descriptions = vec![
        ColumnDescription::new("MJD")
            .with_type(ColumnDataType::Double)
            .create()?,
        ColumnDescription::new("SCALE")
            .with_type(ColumnDataType::Double)
            .create()?,
    ];
    let hdu = fptr.create_table("CTE_SCALE".to_string(), &descriptions)?;
    let hdu = hdu.write_col(&mut fptr, "MJD", &calib.scale.mjd)?;
    hdu.write_col(&mut fptr, "SCALE", &calib.scale.scale)?;

    for (i, profile) in calib.profiles.iter().enumerate() {
        let mut descriptions = vec![ColumnDescription::new("NODE")
            .with_type(ColumnDataType::Int)
            .create()?];
        for k in 1..=profile.samples.ncols() {
            descriptions.push(
                ColumnDescription::new(format!("LOG_Q_{k}"))
                    .with_type(ColumnDataType::Double)
                    .create()?,
            );
        }

        let hdu = fptr.create_table(format!("CHG_LEAK{}", i + 1), &descriptions)?;
        hdu.write_key(&mut fptr, "MJD1", profile.mjd_start)?;
        hdu.write_key(&mut fptr, "MJD2", profile.mjd_end)?;

        let nodes = profile
            .nodes
            .iter()
            .map(|&n| i32::try_from(n))
            .collect::<std::result::Result<Vec<i32>, _>>()
            .map_err(|_| {
                CteError::MalformedCalibration(format!(
                    "tail profile node {} does not fit a FITS integer column",
                    profile.nodes.len()
                ))
            })?;
        let mut hdu = hdu.write_col(&mut fptr, "NODE", &nodes)?;
        for k in 0..profile.samples.ncols() {
            let column = profile.samples.column(k).to_vec();
            hdu = hdu.write_col(&mut fptr, format!("LOG_Q_{}", k + 1), &column)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_reference_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trap_calib.fits");
        let calib = TrapCalibration::sample();

        write_calibration(&calib, &path).unwrap();
        let read = TrapCalibration::read(&path).unwrap();

        assert_eq!(read.detector, calib.detector);
        assert_eq!(read.sim_nit, calib.sim_nit);
        assert_eq!(read.shft_nit, calib.shft_nit);
        assert_relative_eq!(read.rn_clip, calib.rn_clip, epsilon = 1e-12);

        assert_eq!(read.levels.len(), calib.levels.len());
        assert_relative_eq!(read.levels[5], calib.levels[5], epsilon = 1e-12);
        assert_eq!(read.density.q.len(), calib.density.q.len());
        assert_relative_eq!(read.density.dtde[3], calib.density.dtde[3], epsilon = 1e-15);
        assert_relative_eq!(read.scale.scale_at(54_000.0).0, 0.616, epsilon = 1e-12);

        assert_eq!(read.profiles.len(), calib.profiles.len());
        assert_eq!(read.profiles[0].nodes, calib.profiles[0].nodes);
        assert_relative_eq!(read.profiles[1].mjd_end, calib.profiles[1].mjd_end);
        assert_relative_eq!(
            read.profiles[1].samples[[2, 1]],
            calib.profiles[1].samples[[2, 1]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_missing_scalar_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_rn_clip.fits");
        {
            let mut fptr = FitsFile::create(&path).overwrite().open().unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "SIM_NIT", 5i64).unwrap();
            primary.write_key(&mut fptr, "SHFT_NIT", 4i64).unwrap();
        }

        let result = TrapCalibration::read(&path);
        assert!(matches!(
            result,
            Err(CteError::MissingKey { key }) if key == "RN_CLIP"
        ));
    }

    #[test]
    fn test_missing_extension_reports_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("primary_only.fits");
        {
            let mut fptr = FitsFile::create(&path).overwrite().open().unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "RN_CLIP", 5.25f64).unwrap();
            primary.write_key(&mut fptr, "SIM_NIT", 5i64).unwrap();
            primary.write_key(&mut fptr, "SHFT_NIT", 4i64).unwrap();
        }

        let result = TrapCalibration::read(&path);
        assert!(matches!(result, Err(CteError::MalformedCalibration(_))));
    }

    #[test]
    fn test_profile_count_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad_count.fits");
        write_calibration(&TrapCalibration::sample(), &path).unwrap();
        {
            let mut fptr = FitsFile::edit(&path).unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "NCHGLEAK", 7i64).unwrap();
        }

        let result = TrapCalibration::read(&path);
        assert!(matches!(result, Err(CteError::MalformedCalibration(_))));
    }

    #[test]
    fn test_read_file_round_trips_through_model() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usable.fits");
        write_calibration(&TrapCalibration::sample(), &path).unwrap();

        let calib = TrapCalibration::read(&path).unwrap();
        let (model, warnings) = calib.model_for(54_500.0).unwrap();
        assert!(model.cte_frac > 0.6 && model.cte_frac < 1.0);
        assert!(warnings.is_empty());
    }
}
