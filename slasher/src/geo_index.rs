use anyhow::{ensure, Result};
use derivative::Derivative;
use serde::Deserialize;

use crate::{attestation::Epoch, error::Error};

pub type GeoIndex = u64;

// Interleaved coordinates are built from 32 bit halves.
const MAX_EPOCH_BITS: u32 = 32;
// Keeps the quadrant bitfield at 1 GiB or less.
const MAX_BIT_DEPTH: u32 = 32;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct GeoConfig {
    // Maximum distance in epochs between the window offset and any attestation epoch.
    #[derivative(Default(value = "54000"))]
    pub epoch_distance: u64,
    // Headroom for moving the window forward before it has to be refreshed.
    #[derivative(Default(value = "1000"))]
    pub epochs_per_refresh: u64,
    // Number of low interleaved bits dropped from every geo index.
    // Each cell of the lookup covers `2^(zoom / 2)` epochs on both axes.
    #[derivative(Default(value = "10"))]
    pub zoom: u8,
}

/// Dimensions of a geo lookup derived from a validated [`GeoConfig`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GeoLayout {
    capacity: u64,
    epochs_per_refresh: u64,
    epoch_bits: u32,
    zoom: u32,
    bit_depth: u32,
}

impl GeoLayout {
    pub fn new(config: GeoConfig) -> Result<Self> {
        let GeoConfig {
            epoch_distance,
            epochs_per_refresh,
            zoom,
        } = config;

        let invalid = Error::InvalidGeoConfiguration {
            epoch_distance,
            epochs_per_refresh,
            zoom,
        };

        ensure!(
            epoch_distance > 0
                && epochs_per_refresh > 0
                && epoch_distance % 8 == 0
                && epochs_per_refresh % 8 == 0,
            invalid.clone(),
        );

        let capacity = epoch_distance
            .checked_add(epochs_per_refresh)
            .ok_or_else(|| invalid.clone())?;

        let epoch_bits = u64::BITS - (capacity - 1).leading_zeros();
        let zoom = u32::from(zoom);

        ensure!(
            epoch_bits <= MAX_EPOCH_BITS && zoom % 2 == 0 && zoom < 2 * epoch_bits,
            invalid.clone(),
        );

        let bit_depth = 2 * epoch_bits - zoom;

        ensure!(bit_depth <= MAX_BIT_DEPTH, invalid);

        Ok(Self {
            capacity,
            epochs_per_refresh,
            epoch_bits,
            zoom,
            bit_depth,
        })
    }

    /// Number of epochs addressable from the window offset.
    #[must_use]
    pub const fn capacity(self) -> u64 {
        self.capacity
    }

    #[must_use]
    pub const fn epochs_per_refresh(self) -> u64 {
        self.epochs_per_refresh
    }

    #[must_use]
    pub const fn epoch_bits(self) -> u32 {
        self.epoch_bits
    }

    #[must_use]
    pub const fn zoom(self) -> u32 {
        self.zoom
    }

    /// Number of bits in a geo index, which is also the depth of the quadrant tree.
    #[must_use]
    pub const fn bit_depth(self) -> u32 {
        self.bit_depth
    }

    /// Number of epochs covered by one cell along each axis.
    #[must_use]
    pub const fn cell_width(self) -> u64 {
        1 << (self.zoom / 2)
    }

    /// Number of cells along each axis.
    #[must_use]
    pub const fn cells_per_axis(self) -> u64 {
        1 << (self.epoch_bits - self.zoom / 2)
    }

    pub fn geo_index(self, source: Epoch, target: Epoch, offset: Epoch) -> Result<GeoIndex> {
        let insufficient = || Error::InsufficientOffset {
            source_epoch: source,
            target_epoch: target,
            offset,
            capacity: self.capacity,
        };

        let source_offset = source.checked_sub(offset).ok_or_else(insufficient)?;
        let target_offset = target.checked_sub(offset).ok_or_else(insufficient)?;

        ensure!(
            source_offset < self.capacity && target_offset < self.capacity,
            insufficient(),
        );

        let interleaved = interleave(
            u32::try_from(source_offset)?,
            u32::try_from(target_offset)?,
        );

        Ok(interleaved >> self.zoom)
    }

    /// Geo index of the cell at `(source_cell, target_cell)`.
    #[must_use]
    pub const fn cell_index(self, source_cell: u32, target_cell: u32) -> GeoIndex {
        interleave(source_cell, target_cell)
    }

    /// Cell coordinates `(source_cell, target_cell)` of a geo index.
    #[must_use]
    pub const fn cell_of(self, index: GeoIndex) -> (u32, u32) {
        deinterleave(index)
    }
}

/// Interleaves the bits of `source` and `target`, with `source` taking the odd positions.
#[must_use]
pub const fn interleave(source: u32, target: u32) -> u64 {
    (spread(source) << 1) | spread(target)
}

/// Inverse of [`interleave`].
#[must_use]
pub const fn deinterleave(index: u64) -> (u32, u32) {
    (compact(index >> 1), compact(index))
}

#[expect(
    clippy::cast_lossless,
    reason = "`u64::from` is not usable in const functions."
)]
const fn spread(value: u32) -> u64 {
    let mut bits = value as u64;
    bits = (bits | (bits << 16)) & 0x0000_ffff_0000_ffff;
    bits = (bits | (bits << 8)) & 0x00ff_00ff_00ff_00ff;
    bits = (bits | (bits << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    bits = (bits | (bits << 2)) & 0x3333_3333_3333_3333;
    (bits | (bits << 1)) & 0x5555_5555_5555_5555
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "Only the low 32 bits are set after compaction."
)]
const fn compact(index: u64) -> u32 {
    let mut bits = index & 0x5555_5555_5555_5555;
    bits = (bits | (bits >> 1)) & 0x3333_3333_3333_3333;
    bits = (bits | (bits >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    bits = (bits | (bits >> 4)) & 0x00ff_00ff_00ff_00ff;
    bits = (bits | (bits >> 8)) & 0x0000_ffff_0000_ffff;
    ((bits | (bits >> 16)) & 0x0000_0000_ffff_ffff) as u32
}
