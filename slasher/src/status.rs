use derive_more::Display;

use crate::attestation::{AttestationData, ValidatorIndex, H256};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum SlashType {
    // The incoming attestation surrounds a previous one.
    Surrounding,
    // The incoming attestation is surrounded by a previous one.
    SurroundedBy,
    // The incoming attestation has the same target as a different previous one.
    Double,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slash {
    pub validator_index: ValidatorIndex,
    pub block_root: H256,
    pub slash_type: SlashType,
    pub conflicting: AttestationData,
}

impl Slash {
    #[must_use]
    pub const fn new(
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
        conflicting: AttestationData,
        slash_type: SlashType,
    ) -> Self {
        Self {
            validator_index,
            block_root: attestation.block_root,
            slash_type,
            conflicting,
        }
    }
}
