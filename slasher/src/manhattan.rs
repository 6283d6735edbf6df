//! Projection of `(source, target)` pairs onto a single axis.
//!
//! Plotted in the half plane `target > source`, lines of constant `source + target` are
//! anti-diagonals. Within a band of distances `target - source`, the points that can be in a
//! surround relation with a given point occupy a contiguous range of `source + target`, which
//! reduces the 2-D dominance test to a range check over a flat bitfield.

use core::ops::Range;

use anyhow::{ensure, Result};
use bitvec::{order::Lsb0, vec::BitVec};

use crate::{attestation::Epoch, error::Error};

pub type Delta = u64;
pub type ManhattanIndex = u64;

pub fn manhattan(source: Epoch, target: Epoch) -> Result<ManhattanIndex> {
    let index = source.checked_add(target).ok_or(Error::EpochOverflow {
        source_epoch: source,
        target_epoch: target,
    })?;

    Ok(index)
}

pub fn calc_delta(source: Epoch, target: Epoch) -> Result<Delta> {
    ensure!(
        source < target,
        Error::InvalidAttestation {
            source_epoch: source,
            target_epoch: target,
        },
    );

    Ok(target - source)
}

/// Manhattan indices of points with distance at least `min_distance` that `(source, target)`
/// could surround.
///
/// A surrounded point `(s, t)` with distance `d` satisfies `source < s` and `t < target`, so its
/// index `2s + d` lies in `[2 * source + 2 + d, 2 * target - 2 - d]`. The range shrinks as `d`
/// grows, so the range for `min_distance` covers the whole band.
///
/// Bounds saturate. Indices that do not fit in a `u64` cannot be recorded in any bitfield.
#[must_use]
pub fn surroundee_range(
    source: Epoch,
    target: Epoch,
    min_distance: Delta,
) -> Range<ManhattanIndex> {
    let start = source
        .saturating_mul(2)
        .saturating_add(2)
        .saturating_add(min_distance);
    let end = target
        .saturating_mul(2)
        .saturating_sub(min_distance.saturating_add(1));

    start..end.max(start)
}

/// Manhattan indices of points with distance below `max_distance` that could surround
/// `(source, target)`.
///
/// A surrounding point `(s, t)` with distance `d` satisfies `s < source` and `target < t`, so its
/// index lies in `[2 * target + 2 - d, 2 * source - 2 + d]`. The range grows with `d`, so the
/// range for `max_distance - 1` covers the whole band.
#[must_use]
pub fn surrounder_range(
    source: Epoch,
    target: Epoch,
    max_distance: Delta,
) -> Range<ManhattanIndex> {
    let start = target
        .saturating_mul(2)
        .saturating_add(3)
        .saturating_sub(max_distance);
    let end = source
        .saturating_mul(2)
        .saturating_add(max_distance)
        .saturating_sub(2);

    start..end.max(start)
}

/// One bit per Manhattan index up to `manhattan(max_target, max_target)`.
#[derive(Clone, Debug)]
pub struct MhBitfield {
    bits: BitVec<u8, Lsb0>,
}

impl MhBitfield {
    #[must_use]
    pub fn new(max_target: Epoch) -> Self {
        Self {
            bits: BitVec::repeat(false, Self::capacity_for(max_target)),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.bits.len() as u64
    }

    pub fn check(&self, index: ManhattanIndex) -> Result<bool> {
        let position = self.position(index)?;
        Ok(self.bits[position])
    }

    pub fn set(&mut self, index: ManhattanIndex) -> Result<()> {
        let position = self.position(index)?;
        self.bits.set(position, true);
        Ok(())
    }

    pub fn check_range(&self, range: Range<ManhattanIndex>) -> Result<bool> {
        if range.is_empty() {
            return Ok(false);
        }

        let start = self.position(range.start)?;
        let end = self.position(range.end - 1)? + 1;

        Ok(self.bits[start..end].any())
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    fn position(&self, index: ManhattanIndex) -> Result<usize> {
        let capacity = self.capacity();

        ensure!(index < capacity, Error::IndexOutOfRange { index, capacity });

        Ok(usize::try_from(index)?)
    }

    fn capacity_for(max_target: Epoch) -> usize {
        usize::try_from(max_target.saturating_mul(2)).unwrap_or(usize::MAX)
    }
}
