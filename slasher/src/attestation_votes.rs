use core::ops::Bound;
use std::collections::{BTreeMap, HashMap};

use crate::attestation::{AttestationData, Epoch, ValidatorIndex};

// ValidatorIndex -> TargetEpoch -> AttestationData
#[derive(Default)]
pub struct AttestationVotes {
    votes: HashMap<ValidatorIndex, BTreeMap<Epoch, AttestationData>>,
}

impl AttestationVotes {
    pub fn find(&self, validator_index: ValidatorIndex, target_epoch: Epoch) -> Option<AttestationData> {
        self.votes
            .get(&validator_index)?
            .get(&target_epoch)
            .copied()
    }

    // The first vote for a target is kept, since that is the one later votes conflict with.
    pub fn insert(&mut self, validator_index: ValidatorIndex, attestation_data: AttestationData) {
        self.votes
            .entry(validator_index)
            .or_default()
            .entry(attestation_data.target)
            .or_insert(attestation_data);
    }

    /// First recorded vote by target that `attestation` surrounds.
    pub fn find_surrounded(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Option<AttestationData> {
        if attestation.source >= attestation.target {
            return None;
        }

        self.votes
            .get(&validator_index)?
            .range(attestation.source + 1..attestation.target)
            .map(|(_, vote)| *vote)
            .find(|vote| attestation.surrounds(vote))
    }

    /// First recorded vote by target that surrounds `attestation`.
    pub fn find_surrounding(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Option<AttestationData> {
        self.votes
            .get(&validator_index)?
            .range((Bound::Excluded(attestation.target), Bound::Unbounded))
            .map(|(_, vote)| *vote)
            .find(|vote| vote.surrounds(attestation))
    }

    // Votes with targets before `first_kept` are dropped.
    pub fn cleanup(&mut self, first_kept: Epoch) {
        self.votes.retain(|_, votes| {
            *votes = votes.split_off(&first_kept);
            !votes.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.votes.values().map(BTreeMap::len).sum()
    }
}
