use anyhow::Result;

use crate::{
    attestation::{AttestationData, Epoch},
    focus::Focus,
    status::Slash,
};

/// An approximate filter shared by all validators.
///
/// Implementations may keep validators in focus that are not violating anything, but must never
/// remove one that is. The double vote set is passed through untouched.
pub trait FuzzyDetector {
    /// Narrows `focus` to what could be slashable and records the attestation.
    ///
    /// A rejected attestation must leave the filter unchanged.
    fn fuzzy_check_and_add(&mut self, attestation: &AttestationData, focus: &Focus)
        -> Result<Focus>;
}

/// Exact detection memory for one contiguous range of validators.
pub trait Detector {
    /// Rejects attestations this store cannot record.
    fn validate(&self, attestation: &AttestationData) -> Result<()> {
        attestation.validate()
    }

    /// Finds slashable offences of the validators in `focus` and records the attestation for all
    /// of them. Must never report a validator that did not violate a slashing condition.
    fn check_and_add(&mut self, attestation: &AttestationData, focus: &Focus) -> Result<Vec<Slash>>;

    /// Forgets votes with targets more than `epochs_to_keep` epochs before `current_epoch`.
    fn cleanup(&mut self, current_epoch: Epoch, epochs_to_keep: u64) -> Result<()>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn validate(&self, attestation: &AttestationData) -> Result<()> {
        (**self).validate(attestation)
    }

    fn check_and_add(&mut self, attestation: &AttestationData, focus: &Focus) -> Result<Vec<Slash>> {
        (**self).check_and_add(attestation, focus)
    }

    fn cleanup(&mut self, current_epoch: Epoch, epochs_to_keep: u64) -> Result<()> {
        (**self).cleanup(current_epoch, epochs_to_keep)
    }
}

impl<F: FuzzyDetector + ?Sized> FuzzyDetector for Box<F> {
    fn fuzzy_check_and_add(
        &mut self,
        attestation: &AttestationData,
        focus: &Focus,
    ) -> Result<Focus> {
        (**self).fuzzy_check_and_add(attestation, focus)
    }
}
