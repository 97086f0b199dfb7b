//! Signal unit bookkeeping.
//!
//! The trap model works in electrons. Science planes can be stored in
//! electrons or in raw DN (counts); the `BUNIT` keyword says which, unless
//! the task configuration tags the units explicitly. The correction
//! refuses counts outright, while the synthesis converts counts to
//! electrons around the simulation using the per-amp gains.

use detrail::{CteError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalUnits {
    Electrons,
    Counts,
}

impl SignalUnits {
    /// Interpret an explicit units tag from configuration. Accepts the
    /// same spellings as `BUNIT`; anything else is refused.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "ELECTRONS" | "ELECTRON" | "E-" => Ok(SignalUnits::Electrons),
            "COUNTS" | "COUNT" | "DN" => Ok(SignalUnits::Counts),
            _ => Err(CteError::InvalidUnits(tag.to_string())),
        }
    }

    /// Interpret a `BUNIT` value. A missing keyword is taken to mean
    /// electrons, which matches calibrated archive products.
    pub fn from_bunit(bunit: Option<&str>) -> Result<Self> {
        match bunit {
            None => {
                log::info!("no BUNIT keyword, assuming electrons");
                Ok(SignalUnits::Electrons)
            }
            Some(raw) => Self::from_tag(raw),
        }
    }
}

pub fn counts_to_electrons(plane: &mut Array2<f64>, gain: f64) {
    plane.mapv_inplace(|v| v * gain);
}

pub fn electrons_to_counts(plane: &mut Array2<f64>, gain: f64) {
    plane.mapv_inplace(|v| v / gain);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_bunit_spellings() {
        for raw in ["ELECTRONS", "electrons", " Electron ", "E-"] {
            assert_eq!(
                SignalUnits::from_bunit(Some(raw)).unwrap(),
                SignalUnits::Electrons
            );
        }
        for raw in ["COUNTS", "counts", "DN", "dn"] {
            assert_eq!(
                SignalUnits::from_bunit(Some(raw)).unwrap(),
                SignalUnits::Counts
            );
        }
    }

    #[test]
    fn test_absent_bunit_means_electrons() {
        assert_eq!(
            SignalUnits::from_bunit(None).unwrap(),
            SignalUnits::Electrons
        );
    }

    #[test]
    fn test_explicit_tag_spellings() {
        assert_eq!(
            SignalUnits::from_tag("electrons").unwrap(),
            SignalUnits::Electrons
        );
        assert_eq!(SignalUnits::from_tag(" dn ").unwrap(), SignalUnits::Counts);
        assert!(matches!(
            SignalUnits::from_tag("parsecs"),
            Err(CteError::InvalidUnits(u)) if u == "parsecs"
        ));
    }

    #[test]
    fn test_unknown_units_are_rejected() {
        assert!(matches!(
            SignalUnits::from_bunit(Some("FURLONGS")),
            Err(CteError::InvalidUnits(u)) if u == "FURLONGS"
        ));
    }

    #[test]
    fn test_gain_round_trip() {
        let mut plane = array![[100.0, 250.0], [0.0, 13.5]];
        let original = plane.clone();
        counts_to_electrons(&mut plane, 2.02);
        assert_relative_eq!(plane[[0, 0]], 202.0);
        electrons_to_counts(&mut plane, 2.02);
        for (&a, &b) in plane.iter().zip(original.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }
}
