use thiserror::Error;

use crate::attestation::{Epoch, ValidatorIndex};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid attestation: source epoch must precede target (source_epoch: {source_epoch}, target_epoch: {target_epoch})")]
    InvalidAttestation { source_epoch: Epoch, target_epoch: Epoch },
    #[error(
        "attestation does not belong to distance band \
         (source_epoch: {source_epoch}, target_epoch: {target_epoch}, band: {min_distance}..{max_distance})"
    )]
    AttestationNotApplicable {
        source_epoch: Epoch,
        target_epoch: Epoch,
        min_distance: u64,
        max_distance: u64,
    },
    #[error("bit index out of range (index: {index}, capacity: {capacity})")]
    IndexOutOfRange { index: u64, capacity: u64 },
    #[error("epochs are too large to index (source_epoch: {source_epoch}, target_epoch: {target_epoch})")]
    EpochOverflow { source_epoch: Epoch, target_epoch: Epoch },
    #[error("group size cannot be 0")]
    InvalidGroupConfiguration,
    #[error("distance gradient must contain at least one nonzero band width")]
    EmptyGradient,
    #[error(
        "insufficient offset to handle geo index within range \
         (source_epoch: {source_epoch}, target_epoch: {target_epoch}, offset: {offset}, capacity: {capacity})"
    )]
    InsufficientOffset {
        source_epoch: Epoch,
        target_epoch: Epoch,
        offset: Epoch,
        capacity: u64,
    },
    #[error(
        "cannot move geo lookup offset out of range \
         (offset: {offset}, new_offset: {new_offset}, max_offset: {max_offset})"
    )]
    OffsetOutOfRange {
        offset: Epoch,
        new_offset: Epoch,
        max_offset: Epoch,
    },
    #[error("geo lookup offset must be a multiple of 8 (new_offset: {new_offset})")]
    InvalidOffsetAlignment { new_offset: Epoch },
    #[error(
        "invalid geo lookup configuration \
         (epoch_distance: {epoch_distance}, epochs_per_refresh: {epochs_per_refresh}, zoom: {zoom})"
    )]
    InvalidGeoConfiguration {
        epoch_distance: u64,
        epochs_per_refresh: u64,
        zoom: u8,
    },
    #[error("validator is not covered by any group (validator_index: {validator_index}, validator_count: {validator_count})")]
    ValidatorOutOfRange {
        validator_index: ValidatorIndex,
        validator_count: u64,
    },
    #[error("span capacity too large to store target distances (max_target: {max_target})")]
    InvalidSpanCapacity { max_target: Epoch },
}
