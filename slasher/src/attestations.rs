use anyhow::Result;

use crate::{
    attestation::{AttestationData, Epoch, ValidatorIndex},
    attestation_votes::AttestationVotes,
    detector::Detector,
    focus::Focus,
    status::{Slash, SlashType},
    targets::Targets,
};

/// Exact detection memory backed by min-max surround spans.
pub struct Attestations {
    attestation_votes: AttestationVotes,
    targets: Targets,
}

impl Attestations {
    pub fn new(max_target: Epoch) -> Result<Self> {
        Ok(Self {
            attestation_votes: AttestationVotes::default(),
            targets: Targets::new(max_target)?,
        })
    }

    pub fn update(
        &mut self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<()> {
        self.targets.update(validator_index, attestation)?;
        self.attestation_votes.insert(validator_index, *attestation);
        Ok(())
    }

    pub fn find_slashings(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
        focus: &Focus,
    ) -> Result<Vec<Slash>> {
        self.targets.validate(attestation)?;

        let mut slashings = vec![];

        if focus.double.contains(validator_index) {
            if let Some(existing) = self.check_double_vote(validator_index, attestation) {
                slashings.push(Slash::new(
                    validator_index,
                    attestation,
                    existing,
                    SlashType::Double,
                ));
            }
        }

        if focus.surrounding.contains(validator_index) {
            if let Some(existing) = self.check_surrounding(validator_index, attestation)? {
                slashings.push(Slash::new(
                    validator_index,
                    attestation,
                    existing,
                    SlashType::Surrounding,
                ));
            }
        }

        if focus.surrounded_by.contains(validator_index) {
            if let Some(existing) = self.check_surrounded_by(validator_index, attestation)? {
                slashings.push(Slash::new(
                    validator_index,
                    attestation,
                    existing,
                    SlashType::SurroundedBy,
                ));
            }
        }

        Ok(slashings)
    }

    #[must_use]
    pub fn vote_count(&self) -> usize {
        self.attestation_votes.len()
    }

    // Spans do not cover sources before the cleanup horizon. Those are checked against the votes.
    fn is_tracked(&self, attestation: &AttestationData) -> bool {
        self.targets.first_tracked_epoch() <= attestation.source
    }

    fn check_surrounding(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<Option<AttestationData>> {
        if !self.is_tracked(attestation) {
            return Ok(self
                .attestation_votes
                .find_surrounded(validator_index, attestation));
        }

        let target_epoch = self
            .targets
            .check_for_surrounding_entry(validator_index, attestation)?;

        // Spans only point at a target. The vote recorded for it has to be checked too.
        Ok(target_epoch
            .and_then(|target_epoch| self.attestation_votes.find(validator_index, target_epoch))
            .filter(|existing| attestation.surrounds(existing)))
    }

    fn check_surrounded_by(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<Option<AttestationData>> {
        if !self.is_tracked(attestation) {
            return Ok(self
                .attestation_votes
                .find_surrounding(validator_index, attestation));
        }

        let target_epoch = self
            .targets
            .check_for_surrounded_entry(validator_index, attestation)?;

        Ok(target_epoch
            .and_then(|target_epoch| self.attestation_votes.find(validator_index, target_epoch))
            .filter(|existing| existing.surrounds(attestation)))
    }

    fn check_double_vote(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Option<AttestationData> {
        self.attestation_votes
            .find(validator_index, attestation.target)
            .filter(|existing| existing.is_double_vote(attestation))
    }
}

impl Detector for Attestations {
    fn validate(&self, attestation: &AttestationData) -> Result<()> {
        self.targets.validate(attestation)
    }

    fn check_and_add(&mut self, attestation: &AttestationData, focus: &Focus) -> Result<Vec<Slash>> {
        self.validate(attestation)?;

        let mut slashings = vec![];

        for validator_index in focus.validators() {
            slashings.extend(self.find_slashings(validator_index, attestation, focus)?);
            self.update(validator_index, attestation)?;
        }

        Ok(slashings)
    }

    fn cleanup(&mut self, current_epoch: Epoch, epochs_to_keep: u64) -> Result<()> {
        let first_kept = current_epoch.saturating_sub(epochs_to_keep);

        self.attestation_votes.cleanup(first_kept);
        self.targets.prune(first_kept)
    }
}
