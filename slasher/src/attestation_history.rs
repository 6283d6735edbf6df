use core::ops::Bound;
use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::{
    attestation::{AttestationData, Epoch, ValidatorIndex},
    detector::Detector,
    focus::Focus,
    status::{Slash, SlashType},
};

/// Exact detection memory that keeps every attestation of every validator.
///
/// Lookups scan the recorded attestations by target, so this is only suitable for small groups
/// or as a reference to compare other detectors against.
#[derive(Default)]
pub struct AttestationHistory {
    // ValidatorIndex -> TargetEpoch -> attestations in arrival order
    history: HashMap<ValidatorIndex, BTreeMap<Epoch, Vec<AttestationData>>>,
}

impl AttestationHistory {
    #[must_use]
    pub fn attestation_count(&self) -> usize {
        self.history
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    fn find_slashings(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
        focus: &Focus,
    ) -> Vec<Slash> {
        let Some(history) = self.history.get(&validator_index) else {
            return vec![];
        };

        let mut slashings = vec![];
        let slash = |existing: &AttestationData, slash_type| {
            Slash::new(validator_index, attestation, *existing, slash_type)
        };

        if focus.double.contains(validator_index) {
            if let Some(existing) = history
                .get(&attestation.target)
                .into_iter()
                .flatten()
                .find(|existing| existing.is_double_vote(attestation))
            {
                slashings.push(slash(existing, SlashType::Double));
            }
        }

        // Surrounded attestations have targets strictly inside the incoming one.
        if focus.surrounding.contains(validator_index) {
            if let Some(existing) = history
                .range(attestation.source + 1..attestation.target)
                .flat_map(|(_, attestations)| attestations)
                .find(|existing| attestation.surrounds(existing))
            {
                slashings.push(slash(existing, SlashType::Surrounding));
            }
        }

        if focus.surrounded_by.contains(validator_index) {
            if let Some(existing) = history
                .range((Bound::Excluded(attestation.target), Bound::Unbounded))
                .flat_map(|(_, attestations)| attestations)
                .find(|existing| existing.surrounds(attestation))
            {
                slashings.push(slash(existing, SlashType::SurroundedBy));
            }
        }

        slashings
    }

    fn insert(&mut self, validator_index: ValidatorIndex, attestation: AttestationData) {
        let attestations = self
            .history
            .entry(validator_index)
            .or_default()
            .entry(attestation.target)
            .or_default();

        if !attestations.contains(&attestation) {
            attestations.push(attestation);
        }
    }
}

impl Detector for AttestationHistory {
    fn check_and_add(&mut self, attestation: &AttestationData, focus: &Focus) -> Result<Vec<Slash>> {
        attestation.validate()?;

        let mut slashings = vec![];

        for validator_index in focus.validators() {
            slashings.extend(self.find_slashings(validator_index, attestation, focus));
            self.insert(validator_index, *attestation);
        }

        Ok(slashings)
    }

    fn cleanup(&mut self, current_epoch: Epoch, epochs_to_keep: u64) -> Result<()> {
        let first_kept = current_epoch.saturating_sub(epochs_to_keep);

        self.history.retain(|_, history| {
            *history = history.split_off(&first_kept);
            !history.is_empty()
        });

        Ok(())
    }
}
