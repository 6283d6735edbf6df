use core::ops::Range;

use anyhow::{ensure, Result};
use itertools::Itertools as _;
use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    attestation::{AttestationData, Epoch, ValidatorIndex},
    detector::{Detector, FuzzyDetector},
    error::Error,
    focus::Focus,
    status::Slash,
};

/// Gate filter in front of exact stores for contiguous groups of validators.
///
/// Lock order is the gate first, then groups in ascending index order. Group locks needed by an
/// attestation are taken before the gate is released, so every group sees attestations in the
/// order they passed the gate. Validation locks one group at a time while no other lock is held.
pub struct GroupedDetection<F, D> {
    group_size: u64,
    validator_count: u64,
    gate: Mutex<F>,
    groups: Vec<Mutex<D>>,
}

impl<F: FuzzyDetector, D: Detector> GroupedDetection<F, D> {
    /// Builds one store per group by calling `build_group` with the validator range it covers.
    pub fn new(
        group_size: u64,
        validator_count: u64,
        gate: F,
        mut build_group: impl FnMut(Range<ValidatorIndex>) -> Result<D>,
    ) -> Result<Self> {
        ensure!(group_size > 0, Error::InvalidGroupConfiguration);

        let groups = group_ranges(group_size, validator_count)
            .map(|range| build_group(range).map(Mutex::new))
            .collect::<Result<_>>()?;

        Ok(Self {
            group_size,
            validator_count,
            gate: Mutex::new(gate),
            groups,
        })
    }

    #[must_use]
    pub const fn group_size(&self) -> u64 {
        self.group_size
    }

    #[must_use]
    pub const fn validator_count(&self) -> u64 {
        self.validator_count
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_ranges(&self) -> impl Iterator<Item = Range<ValidatorIndex>> {
        group_ranges(self.group_size, self.validator_count)
    }

    pub fn check_and_add(&self, attestation: &AttestationData, focus: &Focus) -> Result<Vec<Slash>> {
        if let Some(validator_index) = focus.max_validator_index() {
            ensure!(
                validator_index < self.validator_count,
                Error::ValidatorOutOfRange {
                    validator_index,
                    validator_count: self.validator_count,
                },
            );
        }

        // Every group the attestation can reach must accept it before the gate records it.
        for group_index in focus
            .validators()
            .map(|validator_index| validator_index / self.group_size)
            .dedup()
        {
            if let Some(group) = self.groups.get(usize::try_from(group_index)?) {
                group.lock().validate(attestation)?;
            }
        }

        let mut gate = self.gate.lock();
        let narrowed = gate.fuzzy_check_and_add(attestation, focus)?;

        if narrowed.is_empty() {
            return Ok(vec![]);
        }

        let shards = self
            .groups
            .iter()
            .zip(self.group_ranges())
            .filter_map(|(group, range)| {
                let group_focus = narrowed.query_range(range);
                (!group_focus.is_empty()).then(|| (group.lock(), group_focus))
            })
            .collect::<Vec<_>>();

        drop(gate);

        debug!(
            "dispatching attestation to {} groups (source: {}, target: {})",
            shards.len(),
            attestation.source,
            attestation.target,
        );

        let mut slashes = vec![];

        for (mut group, group_focus) in shards {
            slashes.extend(group.check_and_add(attestation, &group_focus)?);
        }

        for slash in &slashes {
            info!(
                "slashable attestation found \
                 (validator: {}, type: {}, block_root: {:?}, conflicting: {:?})",
                slash.validator_index, slash.slash_type, slash.block_root, slash.conflicting,
            );
        }

        Ok(slashes)
    }

    /// Runs `maintenance` with exclusive access to the gate filter.
    pub fn maintain_gate<T>(&self, maintenance: impl FnOnce(&mut F) -> T) -> T {
        maintenance(&mut self.gate.lock())
    }

    pub fn cleanup(&self, current_epoch: Epoch, epochs_to_keep: u64) -> Result<()> {
        for group in &self.groups {
            group.lock().cleanup(current_epoch, epochs_to_keep)?;
        }

        Ok(())
    }
}

fn group_ranges(
    group_size: u64,
    validator_count: u64,
) -> impl Iterator<Item = Range<ValidatorIndex>> {
    (0..validator_count.div_ceil(group_size)).map(move |group_index| {
        let start = group_index * group_size;
        start..validator_count.min(start.saturating_add(group_size))
    })
}
