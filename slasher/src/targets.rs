use core::ops::RangeInclusive;
use std::collections::HashMap;

use anyhow::{ensure, Result};
use itertools::Itertools as _;

use crate::{
    attestation::{AttestationData, Epoch, ValidatorIndex},
    error::Error,
};

// Marks epochs with no recorded attestation after them.
const NO_MIN_TARGET: u16 = u16::MAX;
// Target distances are at least 1, so 0 marks epochs with no recorded attestation before them.
const NO_MAX_TARGET: u16 = 0;

const CHUNK_SIZE: usize = 1024;

// Distances for `CHUNK_SIZE` consecutive epochs.
enum Chunk {
    Uniform(u16),
    Dense(Box<[u16]>),
}

impl Chunk {
    fn get(&self, offset: usize) -> u16 {
        match self {
            Self::Uniform(distance) => *distance,
            Self::Dense(distances) => distances[offset],
        }
    }

    fn set(&mut self, offset: usize, distance: u16) {
        match self {
            Self::Uniform(uniform) if *uniform == distance => {}
            Self::Uniform(uniform) => {
                let mut distances = vec![*uniform; CHUNK_SIZE].into_boxed_slice();
                distances[offset] = distance;
                *self = Self::Dense(distances);
            }
            Self::Dense(distances) => distances[offset] = distance,
        }
    }

    fn compact(&mut self) {
        let Self::Dense(distances) = self else {
            return;
        };

        let first = distances.first().copied();

        // Spans fill up from one end, so comparing the ends rejects partly written chunks early.
        if first == distances.last().copied() && distances.iter().all_equal() {
            if let Some(distance) = first {
                *self = Self::Uniform(distance);
            }
        }
    }

    const fn is_uniform(&self, distance: u16) -> bool {
        matches!(self, Self::Uniform(uniform) if *uniform == distance)
    }
}

// One distance per epoch. Chunks are allocated only once a distance differs from `empty`.
struct Span {
    empty: u16,
    chunks: Vec<Chunk>,
}

impl Span {
    const fn new(empty: u16) -> Self {
        Self {
            empty,
            chunks: Vec::new(),
        }
    }

    fn get(&self, epoch: usize) -> u16 {
        self.chunks
            .get(epoch / CHUNK_SIZE)
            .map_or(self.empty, |chunk| chunk.get(epoch % CHUNK_SIZE))
    }

    fn set(&mut self, epoch: usize, distance: u16) {
        let chunk_index = epoch / CHUNK_SIZE;

        if chunk_index >= self.chunks.len() {
            if distance == self.empty {
                return;
            }

            let empty = self.empty;
            self.chunks
                .resize_with(chunk_index + 1, || Chunk::Uniform(empty));
        }

        if let Some(chunk) = self.chunks.get_mut(chunk_index) {
            chunk.set(epoch % CHUNK_SIZE, distance);
        }
    }

    fn compact(&mut self, epochs: RangeInclusive<usize>) {
        let first_chunk = epochs.start() / CHUNK_SIZE;
        let last_chunk = epochs.end() / CHUNK_SIZE;

        for chunk in self
            .chunks
            .iter_mut()
            .take(last_chunk + 1)
            .skip(first_chunk)
        {
            chunk.compact();
        }
    }

    // Forgets every chunk that ends before `first_tracked`.
    fn prune(&mut self, first_tracked: usize) {
        let empty = self.empty;

        for chunk in self.chunks.iter_mut().take(first_tracked / CHUNK_SIZE) {
            *chunk = Chunk::Uniform(empty);
        }

        while self
            .chunks
            .last()
            .is_some_and(|chunk| chunk.is_uniform(empty))
        {
            self.chunks.pop();
        }
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[cfg(test)]
    fn dense_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| matches!(chunk, Chunk::Dense(_)))
            .count()
    }
}

// Min-max surround spans from https://hackmd.io/@sproul/min-max-slasher.
//
// For every tracked epoch `e`:
// - `min_targets[e]` is the smallest `target - e` among attestations with `source > e`.
// - `max_targets[e]` is the largest `target - e` among attestations with `source < e`.
struct Spans {
    min_targets: Span,
    max_targets: Span,
}

impl Spans {
    const fn new() -> Self {
        Self {
            min_targets: Span::new(NO_MIN_TARGET),
            max_targets: Span::new(NO_MAX_TARGET),
        }
    }
}

/// Surround spans of every validator.
///
/// Spans are stored in chunks of 1024 epochs that are allocated lazily. A chunk in which every
/// epoch holds the same distance takes a few bytes. Any other chunk takes 2 KiB, so a validator
/// costs at most 4 bytes per tracked epoch.
///
/// Epochs before `first_tracked_epoch` are forgotten by [`Targets::prune`]. Entries at or after
/// it only depend on attestations with targets after it, so they stay exact.
pub struct Targets {
    max_target: Epoch,
    first_tracked_epoch: Epoch,
    spans: HashMap<ValidatorIndex, Spans>,
}

impl Targets {
    pub fn new(max_target: Epoch) -> Result<Self> {
        ensure!(
            max_target < Epoch::from(NO_MIN_TARGET),
            Error::InvalidSpanCapacity { max_target },
        );

        Ok(Self {
            max_target,
            first_tracked_epoch: 0,
            spans: HashMap::new(),
        })
    }

    #[must_use]
    pub const fn first_tracked_epoch(&self) -> Epoch {
        self.first_tracked_epoch
    }

    pub fn validate(&self, attestation: &AttestationData) -> Result<()> {
        attestation.validate()?;

        ensure!(
            attestation.target <= self.max_target,
            Error::IndexOutOfRange {
                index: attestation.target,
                capacity: self.max_target + 1,
            },
        );

        Ok(())
    }

    /// Target of a recorded attestation that `attestation` surrounds, if any.
    ///
    /// Returns `None` for sources before `first_tracked_epoch`.
    pub fn check_for_surrounding_entry(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<Option<Epoch>> {
        let Some(spans) = self.tracked_spans(validator_index, attestation) else {
            return Ok(None);
        };

        let source_epoch = attestation.source;
        let min_target = spans.min_targets.get(usize::try_from(source_epoch)?);

        if min_target != NO_MIN_TARGET && source_epoch + Epoch::from(min_target) < attestation.target
        {
            return Ok(Some(source_epoch + Epoch::from(min_target)));
        }

        Ok(None)
    }

    /// Target of a recorded attestation that surrounds `attestation`, if any.
    ///
    /// Returns `None` for sources before `first_tracked_epoch`.
    pub fn check_for_surrounded_entry(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<Option<Epoch>> {
        let Some(spans) = self.tracked_spans(validator_index, attestation) else {
            return Ok(None);
        };

        let source_epoch = attestation.source;
        let max_target = spans.max_targets.get(usize::try_from(source_epoch)?);

        if max_target != NO_MAX_TARGET && source_epoch + Epoch::from(max_target) > attestation.target
        {
            return Ok(Some(source_epoch + Epoch::from(max_target)));
        }

        Ok(None)
    }

    pub fn update(
        &mut self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Result<()> {
        self.validate(attestation)?;

        let first_tracked_epoch = self.first_tracked_epoch;
        let spans = self.spans.entry(validator_index).or_insert_with(Spans::new);

        update_min_targets(&mut spans.min_targets, attestation, first_tracked_epoch)?;
        update_max_targets(&mut spans.max_targets, attestation, first_tracked_epoch)?;

        Ok(())
    }

    /// Stops tracking epochs before `first_kept`.
    pub fn prune(&mut self, first_kept: Epoch) -> Result<()> {
        if first_kept <= self.first_tracked_epoch {
            return Ok(());
        }

        let first_tracked = usize::try_from(first_kept)?;

        self.first_tracked_epoch = first_kept;

        self.spans.retain(|_, spans| {
            spans.min_targets.prune(first_tracked);
            spans.max_targets.prune(first_tracked);
            !(spans.min_targets.is_empty() && spans.max_targets.is_empty())
        });

        Ok(())
    }

    fn tracked_spans(
        &self,
        validator_index: ValidatorIndex,
        attestation: &AttestationData,
    ) -> Option<&Spans> {
        if attestation.source < self.first_tracked_epoch {
            return None;
        }

        self.spans.get(&validator_index)
    }

    #[cfg(test)]
    pub fn tracked_validators(&self) -> usize {
        self.spans.len()
    }

    #[cfg(test)]
    pub fn dense_chunks(&self) -> usize {
        self.spans
            .values()
            .map(|spans| spans.min_targets.dense_chunks() + spans.max_targets.dense_chunks())
            .sum()
    }
}

// `min_targets` can only decrease going back in time, so the walk stops at the first epoch
// that already has an equal or closer target.
fn update_min_targets(
    min_targets: &mut Span,
    attestation: &AttestationData,
    first_tracked_epoch: Epoch,
) -> Result<()> {
    let target_epoch = attestation.target;
    let mut lowest_updated = None;

    for epoch in (first_tracked_epoch..attestation.source).rev() {
        let index = usize::try_from(epoch)?;

        if target_epoch < epoch + Epoch::from(min_targets.get(index)) {
            min_targets.set(index, u16::try_from(target_epoch - epoch)?);
            lowest_updated = Some(index);
        } else {
            break;
        }
    }

    if let Some(lowest) = lowest_updated {
        min_targets.compact(lowest..=usize::try_from(attestation.source - 1)?);
    }

    Ok(())
}

// `max_targets` can only increase going forward in time. Epochs from the target on cannot be
// the source of an attestation surrounded by this one.
fn update_max_targets(
    max_targets: &mut Span,
    attestation: &AttestationData,
    first_tracked_epoch: Epoch,
) -> Result<()> {
    let target_epoch = attestation.target;
    let first_epoch = first_tracked_epoch.max(attestation.source + 1);
    let mut highest_updated = None;

    for epoch in first_epoch..target_epoch {
        let index = usize::try_from(epoch)?;

        if target_epoch > epoch + Epoch::from(max_targets.get(index)) {
            max_targets.set(index, u16::try_from(target_epoch - epoch)?);
            highest_updated = Some(index);
        } else {
            break;
        }
    }

    if let Some(highest) = highest_updated {
        max_targets.compact(usize::try_from(first_epoch)?..=highest);
    }

    Ok(())
}
