//! Dense charge-trap characterization curves derived from the sparse
//! calibration samples.
//!
//! The calibration table stores trap behavior sparsely: tail profiles at a
//! handful of trailing distances and charge nodes, and the marginal trap
//! density at a handful of charge levels. The simulator needs those curves
//! densely sampled and pre-reduced to the discrete evaluation levels it
//! sweeps. This module owns that expansion:
//!
//! - [`psi::TailCurves`]: leaked and still-open fractions at every trailing
//!   distance, per charge node;
//! - [`phi::OccupancyCurve`]: per-shift trap occupancy on a dense
//!   log-spaced charge axis;
//! - [`levels::LevelTables`]: both of the above reduced onto the discrete
//!   charge levels, plus the cumulative redistributable charge per level and
//!   the effective tail length per level.

pub mod levels;
pub mod phi;
pub mod psi;

pub use levels::LevelTables;
pub use phi::OccupancyCurve;
pub use psi::TailCurves;
