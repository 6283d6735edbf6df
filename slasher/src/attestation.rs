use anyhow::{ensure, Result};
use derive_more::Constructor;

pub use ethereum_types::H256;

use crate::error::Error;

pub type Epoch = u64;
pub type ValidatorIndex = u64;

// The part of an attestation that slashing conditions are evaluated on.
// Signatures are expected to be verified before attestations reach the slasher.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Constructor)]
pub struct AttestationData {
    pub source: Epoch,
    pub target: Epoch,
    pub block_root: H256,
}

impl AttestationData {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.source < self.target,
            Error::InvalidAttestation {
                source_epoch: self.source,
                target_epoch: self.target,
            },
        );

        Ok(())
    }

    /// `true` if `self` strictly encloses `other`.
    #[must_use]
    pub const fn surrounds(&self, other: &Self) -> bool {
        self.source < other.source && other.target < self.target
    }

    #[must_use]
    pub fn is_double_vote(&self, other: &Self) -> bool {
        self.target == other.target && self != other
    }
}
