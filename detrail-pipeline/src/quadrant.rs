//! Amplifier quadrant geometry.
//!
//! A wide-field sensor is read out through four amplifiers, one per
//! quadrant, each clocking charge toward its own corner. Within a stored
//! chip image the two halves therefore trail in mirrored directions, and
//! the chip stored as `EXTVER 2` is mounted upside down relative to the
//! chip stored as `EXTVER 1`.
//!
//! The column kernel wants every quadrant in a single canonical frame:
//! row 0 read out first, trails growing toward higher rows. [`extract`]
//! copies a quadrant out of a stored plane into that frame and [`insert`]
//! writes it back, both driven by the [`AmpSlot`] table:
//!
//! * `EXTVER 1`: amps C (left half, stored upright) and D (right half,
//!   mirrored left-right).
//! * `EXTVER 2`: amps A (left half, stored upside down) and B (right
//!   half, upside down and mirrored).

use detrail::AmpId;
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2};

/// Where one amp's quadrant sits in a stored chip plane and how to bring
/// it into readout orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmpSlot {
    pub amp: AmpId,
    pub left_half: bool,
    pub flip_rows: bool,
    pub flip_cols: bool,
}

/// Quadrant table for one stored chip.
pub fn slots_for_extver(extver: i64) -> [AmpSlot; 2] {
    if extver == 1 {
        [
            AmpSlot {
                amp: AmpId::C,
                left_half: true,
                flip_rows: false,
                flip_cols: false,
            },
            AmpSlot {
                amp: AmpId::D,
                left_half: false,
                flip_rows: false,
                flip_cols: true,
            },
        ]
    } else {
        [
            AmpSlot {
                amp: AmpId::A,
                left_half: true,
                flip_rows: true,
                flip_cols: false,
            },
            AmpSlot {
                amp: AmpId::B,
                left_half: false,
                flip_rows: true,
                flip_cols: true,
            },
        ]
    }
}

/// Copy a quadrant out of a stored plane into readout orientation.
pub fn extract(plane: &Array2<f64>, slot: &AmpSlot) -> Array2<f64> {
    oriented_view(plane, slot).to_owned()
}

/// Write a readout-oriented quadrant back into a stored plane.
pub fn insert(plane: &mut Array2<f64>, slot: &AmpSlot, region: &Array2<f64>) {
    oriented_view_mut(plane, slot).assign(region);
}

fn oriented_view<'a>(plane: &'a Array2<f64>, slot: &AmpSlot) -> ArrayView2<'a, f64> {
    let half = plane.ncols() / 2;
    let view = if slot.left_half {
        plane.slice(s![.., ..half])
    } else {
        plane.slice(s![.., half..])
    };
    match (slot.flip_rows, slot.flip_cols) {
        (false, false) => view,
        (true, false) => view.slice_move(s![..;-1, ..]),
        (false, true) => view.slice_move(s![.., ..;-1]),
        (true, true) => view.slice_move(s![..;-1, ..;-1]),
    }
}

fn oriented_view_mut<'a>(plane: &'a mut Array2<f64>, slot: &AmpSlot) -> ArrayViewMut2<'a, f64> {
    let half = plane.ncols() / 2;
    let view = if slot.left_half {
        plane.slice_mut(s![.., ..half])
    } else {
        plane.slice_mut(s![.., half..])
    };
    match (slot.flip_rows, slot.flip_cols) {
        (false, false) => view,
        (true, false) => view.slice_move(s![..;-1, ..]),
        (false, true) => view.slice_move(s![.., ..;-1]),
        (true, true) => view.slice_move(s![..;-1, ..;-1]),
    }
}
