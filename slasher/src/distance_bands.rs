use core::ops::Range;

use anyhow::{ensure, Result};
use log::{debug, warn};

use crate::{
    attestation::{AttestationData, Epoch},
    detector::FuzzyDetector,
    error::Error,
    focus::Focus,
    manhattan::{self, Delta, ManhattanIndex, MhBitfield},
};

/// Attestations with distances in `[min_distance, max_distance)`, keyed by Manhattan index.
#[derive(Clone, Debug)]
pub struct DistanceBand {
    min_distance: Delta,
    max_distance: Delta,
    bits: MhBitfield,
}

impl DistanceBand {
    #[must_use]
    pub fn new(min_distance: Delta, max_distance: Delta, max_target: Epoch) -> Self {
        Self {
            min_distance,
            max_distance,
            bits: MhBitfield::new(max_target),
        }
    }

    #[must_use]
    pub const fn min_distance(&self) -> Delta {
        self.min_distance
    }

    #[must_use]
    pub const fn max_distance(&self) -> Delta {
        self.max_distance
    }

    #[must_use]
    pub const fn contains_delta(&self, delta: Delta) -> bool {
        self.min_distance <= delta && delta < self.max_distance
    }

    pub fn applicable(&self, source: Epoch, target: Epoch) -> Result<bool> {
        let delta = manhattan::calc_delta(source, target)?;
        Ok(self.contains_delta(delta))
    }

    pub fn add(&mut self, source: Epoch, target: Epoch) -> Result<()> {
        ensure!(
            self.applicable(source, target)?,
            Error::AttestationNotApplicable {
                source_epoch: source,
                target_epoch: target,
                min_distance: self.min_distance,
                max_distance: self.max_distance,
            },
        );

        self.bits.set(manhattan::manhattan(source, target)?)
    }

    /// Checks for any recorded attestation in `range`.
    ///
    /// Indices past the end of the bitfield cannot hold attestations, so the range is clamped.
    pub fn check_range(&self, range: Range<ManhattanIndex>) -> Result<bool> {
        let end = range.end.min(self.bits.capacity());
        self.bits.check_range(range.start.min(end)..end)
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }
}

/// Gate filter built from a stack of [`DistanceBand`]s covering consecutive distance ranges.
pub struct DistanceBands {
    bands: Vec<DistanceBand>,
    max_target: Epoch,
    // Set once an attestation could not be recorded in any band.
    // Surround candidates cannot be narrowed after that.
    overflowed: bool,
}

impl DistanceBands {
    /// Builds one band per nonzero width in `gradient`, starting at distance 0.
    pub fn new(gradient: &[Delta], max_target: Epoch) -> Result<Self> {
        let mut bands = vec![];
        let mut min_distance: Delta = 0;

        for width in gradient.iter().copied().filter(|width| *width > 0) {
            let max_distance = min_distance.saturating_add(width);
            bands.push(DistanceBand::new(min_distance, max_distance, max_target));
            min_distance = max_distance;
        }

        ensure!(!bands.is_empty(), Error::EmptyGradient);

        if min_distance <= max_target {
            warn!(
                "distance gradient ends at {min_distance}, \
                 attestations with larger distances up to {max_target} will disable filtering",
            );
        }

        Ok(Self {
            bands,
            max_target,
            overflowed: false,
        })
    }

    #[must_use]
    pub fn bands(&self) -> &[DistanceBand] {
        &self.bands
    }

    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[must_use]
    pub const fn max_target(&self) -> Epoch {
        self.max_target
    }

    fn validate(&self, attestation: &AttestationData) -> Result<Delta> {
        let delta = manhattan::calc_delta(attestation.source, attestation.target)?;

        ensure!(
            attestation.target <= self.max_target,
            Error::IndexOutOfRange {
                index: attestation.target,
                capacity: self.max_target.saturating_add(1),
            },
        );

        Ok(delta)
    }
}

impl FuzzyDetector for DistanceBands {
    fn fuzzy_check_and_add(
        &mut self,
        attestation: &AttestationData,
        focus: &Focus,
    ) -> Result<Focus> {
        let AttestationData { source, target, .. } = *attestation;

        // Validate up front so that a rejected attestation leaves every band untouched.
        let delta = self.validate(attestation)?;

        let mut surrounded = self.overflowed;
        let mut surrounding = self.overflowed;
        let mut recorded = false;

        for band in &mut self.bands {
            // Checks come before the add so that an attestation never matches itself.
            if !surrounded && delta < band.max_distance {
                let range = manhattan::surrounder_range(source, target, band.max_distance);
                surrounded = band.check_range(range)?;
            }

            if !surrounding && delta > band.min_distance {
                let range = manhattan::surroundee_range(source, target, band.min_distance);
                surrounding = band.check_range(range)?;
            }

            if band.contains_delta(delta) {
                band.add(source, target)?;
                recorded = true;
            }
        }

        if !recorded {
            warn!(
                "attestation distance is beyond every band, surround candidates will no longer \
                 be narrowed (source: {source}, target: {target}, distance: {delta})",
            );

            self.overflowed = true;
            surrounded = true;
            surrounding = true;
        }

        let narrowed = Focus {
            surrounding: if surrounding {
                focus.surrounding.clone()
            } else {
                Default::default()
            },
            surrounded_by: if surrounded {
                focus.surrounded_by.clone()
            } else {
                Default::default()
            },
            double: focus.double.clone(),
        };

        debug!(
            "distance bands narrowed focus \
             (source: {source}, target: {target}, surrounding: {}, surrounded_by: {}, double: {})",
            narrowed.surrounding.len(),
            narrowed.surrounded_by.len(),
            narrowed.double.len(),
        );

        Ok(narrowed)
    }
}
