//! Multi-extension science exposures.
//!
//! A science exposure is a FITS file with a header-only primary HDU
//! carrying the observation keywords and one `SCI`/`ERR` image pair per
//! chip, tagged with `EXTNAME`/`EXTVER`. Extensions are located by
//! scanning the whole file, so extra planes (`DQ`, sample maps) and any
//! HDU order are tolerated.
//!
//! Keywords read from the primary header:
//!
//! * `DETECTOR` and `EXPSTART` select the calibration and its epoch.
//! * `PCTETAB` names the trap calibration file as a resolver locator.
//! * `ATODGNA`..`ATODGND` carry the per-amp gains, electrons per DN,
//!   defaulting to 1.0 when absent.

use std::path::{Path, PathBuf};

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::Array2;

use detrail::{AmpId, CteError, NoiseMode, TrapModel};

use crate::error::{PipelineError, Result};

/// Per-amp gains, electrons per DN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmpGains {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl AmpGains {
    pub fn uniform(gain: f64) -> Self {
        AmpGains {
            a: gain,
            b: gain,
            c: gain,
            d: gain,
        }
    }

    pub fn for_amp(&self, amp: AmpId) -> f64 {
        match amp {
            AmpId::A => self.a,
            AmpId::B => self.b,
            AmpId::C => self.c,
            AmpId::D => self.d,
        }
    }
}

/// One chip's planes located inside the file.
#[derive(Debug, Clone)]
pub struct ChipInfo {
    pub extver: i64,
    /// HDU index of the `SCI` plane.
    pub sci_index: usize,
    /// HDU index of the matching `ERR` plane.
    pub err_index: usize,
    /// `BUNIT` of the `SCI` plane, if present.
    pub bunit: Option<String>,
    /// (rows, columns) of the `SCI` plane.
    pub shape: (usize, usize),
}

/// Observation keywords and chip layout of an opened exposure.
#[derive(Debug, Clone)]
pub struct ExposureMeta {
    pub detector: String,
    /// Exposure start, MJD.
    pub expstart: f64,
    /// Trap calibration locator from the header, if present.
    pub pctetab: Option<String>,
    pub gains: AmpGains,
    /// Chips ascending by `EXTVER`.
    pub chips: Vec<ChipInfo>,
}

/// An opened exposure file.
pub struct Exposure {
    fptr: FitsFile,
    path: PathBuf,
    meta: ExposureMeta,
}

impl Exposure {
    /// Open read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut fptr = FitsFile::open(&path)?;
        let meta = scan(&mut fptr, &path)?;
        Ok(Exposure { fptr, path, meta })
    }

    /// Open for in-place modification.
    pub fn edit(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut fptr = FitsFile::edit(&path)?;
        let meta = scan(&mut fptr, &path)?;
        Ok(Exposure { fptr, path, meta })
    }

    pub fn meta(&self) -> &ExposureMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one chip's science and error planes.
    pub fn read_chip(&mut self, chip: &ChipInfo) -> Result<(Array2<f64>, Array2<f64>)> {
        let sci = self.read_plane(chip.sci_index)?;
        let err = self.read_plane(chip.err_index)?;
        Ok((sci, err))
    }

    fn read_plane(&mut self, index: usize) -> Result<Array2<f64>> {
        let hdu = self.fptr.hdu(index)?;
        let shape = plane_shape(&hdu, &self.path, index)?;
        let data: Vec<f64> = hdu.read_image(&mut self.fptr)?;
        Ok(Array2::from_shape_vec(shape, data).map_err(CteError::from)?)
    }

    /// Write one chip's planes back in place.
    pub fn write_chip(
        &mut self,
        chip: &ChipInfo,
        sci: &Array2<f64>,
        err: &Array2<f64>,
    ) -> Result<()> {
        self.write_plane(chip.sci_index, sci)?;
        self.write_plane(chip.err_index, err)
    }

    fn write_plane(&mut self, index: usize, data: &Array2<f64>) -> Result<()> {
        let hdu = self.fptr.hdu(index)?;
        let flat: Vec<f64> = data.iter().copied().collect();
        hdu.write_image(&mut self.fptr, &flat)?;
        Ok(())
    }

    /// Record a completed correction in the primary header.
    pub fn write_provenance(&mut self, model: &TrapModel, mode: NoiseMode) -> Result<()> {
        let note = match mode {
            NoiseMode::None => "read noise left in place",
            NoiseMode::Smoothing => "read noise separated by smoothing",
        };
        let primary = self.fptr.primary_hdu()?;
        primary.write_key(&mut self.fptr, "PCTECORR", "COMPLETE")?;
        primary.write_key(&mut self.fptr, "PCTEFRAC", model.cte_frac)?;
        primary.write_key(&mut self.fptr, "PCTERNCL", model.rn_clip)?;
        primary.write_key(&mut self.fptr, "PCTESMIT", model.sim_nit as i64)?;
        primary.write_key(&mut self.fptr, "PCTESHFT", model.shft_nit as i64)?;
        primary.write_key(&mut self.fptr, "PCTENOTE", note)?;
        primary.write_key(&mut self.fptr, "CTE_NAME", "detrail-parallel")?;
        primary.write_key(&mut self.fptr, "CTE_VER", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }

    /// Record synthesized trailing in the primary header.
    ///
    /// Deliberately does not set `PCTECORR`: the file now carries trailing
    /// and is a valid input for the correction.
    pub fn write_synthesis_note(&mut self, model: &TrapModel) -> Result<()> {
        let primary = self.fptr.primary_hdu()?;
        primary.write_key(&mut self.fptr, "PCTEFRAC", model.cte_frac)?;
        primary.write_key(&mut self.fptr, "CTE_NAME", "detrail-parallel")?;
        primary.write_key(&mut self.fptr, "CTE_VER", env!("CARGO_PKG_VERSION"))?;
        Ok(())
    }
}

fn scan(fptr: &mut FitsFile, path: &Path) -> Result<ExposureMeta> {
    let primary = fptr.primary_hdu()?;
    let detector = primary
        .read_key::<String>(fptr, "DETECTOR")
        .map(|s| s.trim().to_string())
        .map_err(|_| CteError::MissingKey {
            key: "DETECTOR".into(),
        })?;
    let expstart: f64 = primary
        .read_key(fptr, "EXPSTART")
        .map_err(|_| CteError::MissingKey {
            key: "EXPSTART".into(),
        })?;
    let pctetab = primary
        .read_key::<String>(fptr, "PCTETAB")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let gains = AmpGains {
        a: primary.read_key(fptr, "ATODGNA").unwrap_or(1.0),
        b: primary.read_key(fptr, "ATODGNB").unwrap_or(1.0),
        c: primary.read_key(fptr, "ATODGNC").unwrap_or(1.0),
        d: primary.read_key(fptr, "ATODGND").unwrap_or(1.0),
    };

    let mut scis: Vec<(i64, usize, (usize, usize), Option<String>)> = Vec::new();
    let mut errs: Vec<(i64, usize)> = Vec::new();
    let mut index = 0;
    while let Ok(hdu) = fptr.hdu(index) {
        let this = index;
        index += 1;
        let name = match hdu.read_key::<String>(fptr, "EXTNAME") {
            Ok(name) => name,
            Err(_) => continue,
        };
        let extver = hdu.read_key::<i64>(fptr, "EXTVER").unwrap_or(1);
        match name.trim() {
            "SCI" => {
                let shape = plane_shape(&hdu, path, this)?;
                let bunit = hdu
                    .read_key::<String>(fptr, "BUNIT")
                    .ok()
                    .map(|s| s.trim().to_string());
                scis.push((extver, this, shape, bunit));
            }
            "ERR" => errs.push((extver, this)),
            _ => {}
        }
    }

    scis.sort_by_key(|&(extver, ..)| extver);
    let mut chips = Vec::new();
    for (extver, sci_index, shape, bunit) in scis {
        let err_index = errs
            .iter()
            .find(|&&(v, _)| v == extver)
            .map(|&(_, i)| i)
            .ok_or_else(|| PipelineError::MalformedExposure {
                path: path.to_path_buf(),
                reason: format!("SCI extver {extver} has no matching ERR extension"),
            })?;
        chips.push(ChipInfo {
            extver,
            sci_index,
            err_index,
            bunit,
            shape,
        });
    }
    if chips.is_empty() {
        return Err(PipelineError::MalformedExposure {
            path: path.to_path_buf(),
            reason: "no SCI extensions found".into(),
        });
    }

    Ok(ExposureMeta {
        detector,
        expstart,
        pctetab,
        gains,
        chips,
    })
}

fn plane_shape(hdu: &FitsHdu, path: &Path, index: usize) -> Result<(usize, usize)> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => Ok((shape[0], shape[1])),
        _ => Err(PipelineError::MalformedExposure {
            path: path.to_path_buf(),
            reason: format!("HDU {index} is not a 2-D image"),
        }),
    }
}

/// Chip payload for [`create_exposure`].
#[derive(Debug, Clone)]
pub struct ChipData {
    pub extver: i64,
    pub sci: Array2<f64>,
    pub err: Array2<f64>,
}

/// Primary-header content for [`create_exposure`].
#[derive(Debug, Clone)]
pub struct ExposureHeader {
    pub detector: String,
    pub expstart: f64,
    pub pctetab: Option<String>,
    pub gains: AmpGains,
    /// `BUNIT` written on every `SCI` plane.
    pub bunit: String,
}

/// Write a fresh exposure file, replacing any existing one.
pub fn create_exposure(
    path: impl AsRef<Path>,
    header: &ExposureHeader,
    chips: &[ChipData],
) -> Result<()> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;

    let primary = fptr.primary_hdu()?;
    primary.write_key(&mut fptr, "DETECTOR", header.detector.as_str())?;
    primary.write_key(&mut fptr, "EXPSTART", header.expstart)?;
    if let Some(tab) = &header.pctetab {
        primary.write_key(&mut fptr, "PCTETAB", tab.as_str())?;
    }
    primary.write_key(&mut fptr, "ATODGNA", header.gains.a)?;
    primary.write_key(&mut fptr, "ATODGNB", header.gains.b)?;
    primary.write_key(&mut fptr, "ATODGNC", header.gains.c)?;
    primary.write_key(&mut fptr, "ATODGND", header.gains.d)?;

    for chip in chips {
        write_image_hdu(&mut fptr, "SCI", chip.extver, &chip.sci, Some(&header.bunit))?;
        write_image_hdu(&mut fptr, "ERR", chip.extver, &chip.err, None)?;
    }
    Ok(())
}

/// Write a stack of per-chip planes as `SCI` extensions, one per extver.
///
/// Used for the intermediate planes of the debug bundle.
pub fn write_image_stack(path: impl AsRef<Path>, planes: &[(i64, Array2<f64>)]) -> Result<()> {
    let mut fptr = FitsFile::create(path).overwrite().open()?;
    for (extver, plane) in planes {
        write_image_hdu(&mut fptr, "SCI", *extver, plane, None)?;
    }
    Ok(())
}

fn write_image_hdu(
    fptr: &mut FitsFile,
    name: &str,
    extver: i64,
    data: &Array2<f64>,
    bunit: Option<&str>,
) -> Result<()> {
    let (ny, nx) = data.dim();
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[ny, nx],
    };
    let hdu = fptr.create_image(name.to_string(), &description)?;
    hdu.write_key(fptr, "EXTVER", extver)?;
    if let Some(bunit) = bunit {
        hdu.write_key(fptr, "BUNIT", bunit)?;
    }
    let flat: Vec<f64> = data.iter().copied().collect();
    hdu.write_image(fptr, &flat)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn two_chip_header(pctetab: Option<&str>) -> ExposureHeader {
        ExposureHeader {
            detector: "WFC".into(),
            expstart: 54_321.5,
            pctetab: pctetab.map(str::to_string),
            gains: AmpGains {
                a: 2.02,
                b: 1.886,
                c: 2.044,
                d: 2.01,
            },
            bunit: "ELECTRONS".into(),
        }
    }

    fn two_chips() -> Vec<ChipData> {
        vec![
            ChipData {
                extver: 1,
                sci: array![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
                err: array![[0.1, 0.2, 0.3, 0.4], [0.5, 0.6, 0.7, 0.8]],
            },
            ChipData {
                extver: 2,
                sci: array![[10.0, 20.0, 30.0, 40.0], [50.0, 60.0, 70.0, 80.0]],
                err: array![[1.0, 1.0, 1.0, 1.0], [1.0, 1.0, 1.0, 1.0]],
            },
        ]
    }

    #[test]
    fn test_create_then_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exposure.fits");
        create_exposure(&path, &two_chip_header(Some("jref$trap.fits")), &two_chips()).unwrap();

        let exposure = Exposure::open(&path).unwrap();
        let meta = exposure.meta();
        assert_eq!(meta.detector, "WFC");
        assert_relative_eq!(meta.expstart, 54_321.5);
        assert_eq!(meta.pctetab.as_deref(), Some("jref$trap.fits"));
        assert_relative_eq!(meta.gains.for_amp(AmpId::B), 1.886);
        assert_eq!(meta.chips.len(), 2);
        assert_eq!(meta.chips[0].extver, 1);
        assert_eq!(meta.chips[1].extver, 2);
        assert_eq!(meta.chips[0].shape, (2, 4));
        assert_eq!(meta.chips[0].bunit.as_deref(), Some("ELECTRONS"));
    }

    #[test]
    fn test_read_modify_write_chip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exposure.fits");
        create_exposure(&path, &two_chip_header(None), &two_chips()).unwrap();

        {
            let mut exposure = Exposure::edit(&path).unwrap();
            let chip = exposure.meta().chips[1].clone();
            let (mut sci, err) = exposure.read_chip(&chip).unwrap();
            assert_relative_eq!(sci[[1, 2]], 70.0);
            sci[[1, 2]] = 71.5;
            exposure.write_chip(&chip, &sci, &err).unwrap();
        }

        let mut exposure = Exposure::open(&path).unwrap();
        let chip = exposure.meta().chips[1].clone();
        let (sci, err) = exposure.read_chip(&chip).unwrap();
        assert_relative_eq!(sci[[1, 2]], 71.5);
        assert_relative_eq!(sci[[0, 0]], 10.0);
        assert_relative_eq!(err[[0, 3]], 1.0);
    }

    #[test]
    fn test_missing_err_plane_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sci_only.fits");
        {
            let mut fptr = FitsFile::create(&path).overwrite().open().unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "DETECTOR", "WFC").unwrap();
            primary.write_key(&mut fptr, "EXPSTART", 54_000.0).unwrap();
            let sci = array![[1.0, 2.0], [3.0, 4.0]];
            write_image_hdu(&mut fptr, "SCI", 1, &sci, None).unwrap();
        }

        let result = Exposure::open(&path);
        assert!(matches!(
            result,
            Err(PipelineError::MalformedExposure { .. })
        ));
    }

    #[test]
    fn test_missing_observation_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bare.fits");
        {
            let mut fptr = FitsFile::create(&path).overwrite().open().unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "DETECTOR", "WFC").unwrap();
        }

        let result = Exposure::open(&path);
        assert!(matches!(
            result,
            Err(PipelineError::Cte(CteError::MissingKey { key })) if key == "EXPSTART"
        ));
    }

    #[test]
    fn test_gains_default_to_unity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_gains.fits");
        {
            let mut fptr = FitsFile::create(&path).overwrite().open().unwrap();
            let primary = fptr.primary_hdu().unwrap();
            primary.write_key(&mut fptr, "DETECTOR", "WFC").unwrap();
            primary.write_key(&mut fptr, "EXPSTART", 54_000.0).unwrap();
            let plane = array![[0.0, 0.0], [0.0, 0.0]];
            write_image_hdu(&mut fptr, "SCI", 1, &plane, None).unwrap();
            write_image_hdu(&mut fptr, "ERR", 1, &plane, None).unwrap();
        }

        let exposure = Exposure::open(&path).unwrap();
        assert_eq!(exposure.meta().gains, AmpGains::uniform(1.0));
        // No BUNIT on the plane either.
        assert_eq!(exposure.meta().chips[0].bunit, None);
    }

    #[test]
    fn test_provenance_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exposure.fits");
        create_exposure(&path, &two_chip_header(None), &two_chips()).unwrap();

        let model = {
            let calib = detrail::TrapCalibration::sample();
            calib.model_for(54_500.0).unwrap().0
        };
        {
            let mut exposure = Exposure::edit(&path).unwrap();
            exposure
                .write_provenance(&model, NoiseMode::Smoothing)
                .unwrap();
        }

        let mut fptr = FitsFile::open(&path).unwrap();
        let primary = fptr.primary_hdu().unwrap();
        let done: String = primary.read_key(&mut fptr, "PCTECORR").unwrap();
        assert_eq!(done.trim(), "COMPLETE");
        let frac: f64 = primary.read_key(&mut fptr, "PCTEFRAC").unwrap();
        assert_relative_eq!(frac, model.cte_frac, epsilon = 1e-9);
        let passes: i64 = primary.read_key(&mut fptr, "PCTESMIT").unwrap();
        assert_eq!(passes, 5);
    }
}
