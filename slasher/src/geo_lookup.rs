//! Quadrant tree over the `(source, target)` plane stored as a single bitfield.
//!
//! Geo indices interleave source and target bits, so every index bit splits the current
//! quadrant in half along one axis, alternating between source and target. Depth `d` of the tree
//! holds one bit per `d`-bit index prefix at positions `[2^d, 2^(d + 1))`. A set bit means some
//! recorded attestation lies inside that quadrant, which lets matching skip empty subtrees.

use core::cmp::Ordering;

use anyhow::{ensure, Result};
use bitvec::{order::Lsb0, vec::BitVec};
use log::debug;

use crate::{
    attestation::{AttestationData, Epoch},
    detector::FuzzyDetector,
    error::Error,
    focus::Focus,
    geo_index::{GeoConfig, GeoIndex, GeoLayout},
};

/// Cells that may hold attestations in a surround relation with a queried attestation.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct GeoMatches {
    // Cells of recorded attestations the queried one may surround.
    pub surrounds: Vec<GeoIndex>,
    // Cells of recorded attestations the queried one may be surrounded by.
    pub surrounded_by: Vec<GeoIndex>,
}

impl GeoMatches {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surrounds.is_empty() && self.surrounded_by.is_empty()
    }
}

// A quadrant pending inspection, along with where it lies relative to the queried cell on each
// axis. `Ordering::Equal` means the quadrant still spans the queried coordinate.
#[derive(Clone, Copy)]
struct Quadrant {
    depth: u32,
    prefix: GeoIndex,
    source: Ordering,
    target: Ordering,
}

impl Quadrant {
    // A recorded attestation can surround the query only from the upper left
    // (earlier source, later target) and can be surrounded only from the lower right.
    fn may_surround_query(self) -> bool {
        self.source != Ordering::Greater && self.target != Ordering::Less
    }

    fn may_be_surrounded_by_query(self) -> bool {
        self.source != Ordering::Less && self.target != Ordering::Greater
    }
}

pub struct GeoLookup {
    layout: GeoLayout,
    bits: BitVec<u8, Lsb0>,
    offset: Epoch,
    // Set once a window move clamped recorded sources to the first source cell.
    sources_clamped: bool,
}

impl GeoLookup {
    pub fn new(config: GeoConfig, offset: Epoch) -> Result<Self> {
        let layout = GeoLayout::new(config)?;

        ensure!(
            offset % 8 == 0,
            Error::InvalidOffsetAlignment { new_offset: offset },
        );

        let length = usize::try_from(1_u64 << (layout.bit_depth() + 1))?;

        Ok(Self {
            layout,
            bits: BitVec::repeat(false, length),
            offset,
            sources_clamped: false,
        })
    }

    #[must_use]
    pub const fn layout(&self) -> GeoLayout {
        self.layout
    }

    #[must_use]
    pub const fn offset(&self) -> Epoch {
        self.offset
    }

    pub fn geo_index(&self, attestation: &AttestationData) -> Result<GeoIndex> {
        attestation.validate()?;

        self.layout
            .geo_index(attestation.source, attestation.target, self.offset)
    }

    /// Position of the quadrant holding `index` at `depth` in the bitfield.
    pub fn bit_mapping(&self, index: GeoIndex, depth: u32) -> Result<usize> {
        let bit_depth = self.layout.bit_depth();

        ensure!(
            depth <= bit_depth && index >> bit_depth == 0,
            Error::IndexOutOfRange {
                index,
                capacity: 1 << bit_depth,
            },
        );

        let level = 1 << depth;
        let level_index = index >> (bit_depth - depth);

        Ok(usize::try_from(level | level_index)?)
    }

    pub fn hit(&self, index: GeoIndex, depth: u32) -> Result<bool> {
        let position = self.bit_mapping(index, depth)?;
        Ok(self.bits[position])
    }

    pub fn add_attestation(&mut self, attestation: &AttestationData) -> Result<()> {
        let index = self.geo_index(attestation)?;
        self.mark(index)
    }

    pub fn match_attestation(&self, attestation: &AttestationData) -> Result<GeoMatches> {
        let index = self.geo_index(attestation)?;
        self.match_index(index)
    }

    /// Moves the window forward to `new_offset`.
    ///
    /// Recorded attestations with targets before `new_offset` are dropped, since no attestation
    /// inside the new window can surround them or be surrounded by them. Sources before
    /// `new_offset` are clamped to the start of the window.
    pub fn move_offset(&mut self, new_offset: Epoch) -> Result<()> {
        let previous_offset = self.offset;
        let max_offset = previous_offset.saturating_add(self.layout.epochs_per_refresh() - 8);

        ensure!(
            new_offset % 8 == 0,
            Error::InvalidOffsetAlignment { new_offset },
        );

        ensure!(
            previous_offset <= new_offset && new_offset <= max_offset,
            Error::OffsetOutOfRange {
                offset: previous_offset,
                new_offset,
                max_offset,
            },
        );

        let shift = new_offset - previous_offset;

        if shift == 0 {
            return Ok(());
        }

        let leaves = self.leaves()?;
        let mut moved = vec![];

        for leaf in leaves {
            let (cells, clamped) = self.shifted_cells(leaf, shift)?;
            moved.extend(cells);
            self.sources_clamped |= clamped;
        }

        self.bits.fill(false);
        self.offset = new_offset;

        for index in &moved {
            self.mark(*index)?;
        }

        debug!(
            "geo lookup offset moved \
             (previous_offset: {previous_offset}, new_offset: {new_offset}, cells: {})",
            moved.len(),
        );

        Ok(())
    }

    fn mark(&mut self, index: GeoIndex) -> Result<()> {
        for depth in 0..=self.layout.bit_depth() {
            let position = self.bit_mapping(index, depth)?;
            self.bits.set(position, true);
        }

        Ok(())
    }

    fn match_index(&self, index: GeoIndex) -> Result<GeoMatches> {
        let bit_depth = self.layout.bit_depth();
        // Cells are single epochs without zoom, which makes exact comparisons possible.
        let exact = self.layout.zoom() == 0;
        // Clamped sources lie at or before the first source cell, so a query in that column may
        // still be surrounded by them.
        let (query_source, _) = self.layout.cell_of(index);
        let earlier_source_in_column = self.sources_clamped && query_source == 0;

        let mut matches = GeoMatches::default();

        if !self.hit(index, 0)? {
            return Ok(matches);
        }

        let mut pending = vec![Quadrant {
            depth: 0,
            prefix: 0,
            source: Ordering::Equal,
            target: Ordering::Equal,
        }];

        while let Some(quadrant) = pending.pop() {
            if quadrant.depth == bit_depth {
                let Quadrant { source, target, .. } = quadrant;

                let (surrounds, surrounded_by) = if exact {
                    (
                        source == Ordering::Greater && target == Ordering::Less,
                        (source == Ordering::Less
                            || (source == Ordering::Equal && earlier_source_in_column))
                            && target == Ordering::Greater,
                    )
                } else {
                    (
                        quadrant.may_be_surrounded_by_query(),
                        quadrant.may_surround_query(),
                    )
                };

                if surrounds {
                    matches.surrounds.push(quadrant.prefix);
                }

                if surrounded_by {
                    matches.surrounded_by.push(quadrant.prefix);
                }

                continue;
            }

            // The bit that splits this quadrant. Odd positions belong to the source axis.
            let position = bit_depth - quadrant.depth - 1;
            let query_bit = (index >> position) & 1;
            let splits_source = position % 2 == 1;

            for child_bit in [0, 1] {
                let mut child = Quadrant {
                    depth: quadrant.depth + 1,
                    prefix: (quadrant.prefix << 1) | child_bit,
                    ..quadrant
                };

                let axis = if splits_source {
                    &mut child.source
                } else {
                    &mut child.target
                };

                if *axis == Ordering::Equal {
                    *axis = child_bit.cmp(&query_bit);
                }

                if !(child.may_surround_query() || child.may_be_surrounded_by_query()) {
                    continue;
                }

                let child_index = child.prefix << (bit_depth - child.depth);

                if self.hit(child_index, child.depth)? {
                    pending.push(child);
                }
            }
        }

        matches.surrounds.sort_unstable();
        matches.surrounded_by.sort_unstable();

        Ok(matches)
    }

    fn leaves(&self) -> Result<Vec<GeoIndex>> {
        let leaf_level = usize::try_from(1_u64 << self.layout.bit_depth())?;

        self.bits[leaf_level..]
            .iter_ones()
            .map(|position| Ok(u64::try_from(position)?))
            .collect()
    }

    // Cells covering the epochs of `leaf` once the window starts `shift` epochs later,
    // and whether any of its sources had to be clamped to the start of the window.
    fn shifted_cells(&self, leaf: GeoIndex, shift: u64) -> Result<(Vec<GeoIndex>, bool)> {
        let width = self.layout.cell_width();
        let (source_cell, target_cell) = self.layout.cell_of(leaf);

        let shifted = |cell: u32| -> Option<(u64, u64)> {
            let first_epoch = u64::from(cell) * width;
            let last_epoch = first_epoch + width - 1;
            let last = last_epoch.checked_sub(shift)? / width;
            let first = first_epoch.saturating_sub(shift) / width;
            Some((first, last))
        };

        let Some((target_first, target_last)) = shifted(target_cell) else {
            return Ok((vec![], false));
        };

        let clamped = u64::from(source_cell) * width < shift;
        let (source_first, source_last) = shifted(source_cell).unwrap_or((0, 0));
        let mut cells = vec![];

        for source in source_first..=source_last {
            for target in target_first..=target_last {
                cells.push(
                    self.layout
                        .cell_index(u32::try_from(source)?, u32::try_from(target)?),
                );
            }
        }

        Ok((cells, clamped))
    }
}

impl FuzzyDetector for GeoLookup {
    fn fuzzy_check_and_add(
        &mut self,
        attestation: &AttestationData,
        focus: &Focus,
    ) -> Result<Focus> {
        let index = self.geo_index(attestation)?;
        let matches = self.match_index(index)?;

        self.mark(index)?;

        Ok(Focus {
            surrounding: if matches.surrounds.is_empty() {
                Default::default()
            } else {
                focus.surrounding.clone()
            },
            surrounded_by: if matches.surrounded_by.is_empty() {
                Default::default()
            } else {
                focus.surrounded_by.clone()
            },
            double: focus.double.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
    use test_case::test_case;

    use crate::attestation::H256;

    use super::*;

    fn attestation(source: Epoch, target: Epoch) -> AttestationData {
        AttestationData::new(source, target, H256::zero())
    }

    // 64 epochs per axis.
    fn small_lookup(zoom: u8, offset: Epoch) -> GeoLookup {
        GeoLookup::new(
            GeoConfig {
                epoch_distance: 56,
                epochs_per_refresh: 8,
                zoom,
            },
            offset,
        )
        .expect("configuration is valid")
    }

    fn refreshable_lookup(zoom: u8) -> GeoLookup {
        GeoLookup::new(
            GeoConfig {
                epoch_distance: 96,
                epochs_per_refresh: 32,
                zoom,
            },
            0,
        )
        .expect("configuration is valid")
    }

    fn leaf_of(lookup: &GeoLookup, source: Epoch, target: Epoch) -> GeoIndex {
        lookup
            .geo_index(&attestation(source, target))
            .expect("attestation is inside the window")
    }

    #[test]
    fn default_lookup_uses_one_mebibyte() -> Result<()> {
        let lookup = GeoLookup::new(GeoConfig::default(), 0)?;

        assert_eq!(lookup.bits.len(), 1 << 23);
        assert_eq!(lookup.bits.as_raw_slice().len(), 1 << 20);

        Ok(())
    }

    #[test]
    fn add_marks_every_ancestor_quadrant() -> Result<()> {
        let mut lookup = small_lookup(0, 0);
        let index = leaf_of(&lookup, 20, 30);

        lookup.add_attestation(&attestation(20, 30))?;

        for depth in 0..=lookup.layout().bit_depth() {
            assert!(lookup.hit(index, depth)?, "depth {depth}");
        }

        assert_eq!(lookup.bits.count_ones(), 13);

        lookup.add_attestation(&attestation(20, 30))?;

        assert_eq!(lookup.bits.count_ones(), 13);

        Ok(())
    }

    #[test]
    fn bit_mapping_places_levels_consecutively() -> Result<()> {
        let lookup = small_lookup(0, 0);
        let bit_depth = lookup.layout().bit_depth();
        let last = (1 << bit_depth) - 1;

        assert_eq!(lookup.bit_mapping(0, 0)?, 1);
        assert_eq!(lookup.bit_mapping(last, 0)?, 1);
        assert_eq!(lookup.bit_mapping(0, 1)?, 2);
        assert_eq!(lookup.bit_mapping(last, 1)?, 3);
        assert_eq!(lookup.bit_mapping(last, bit_depth)?, (1 << (bit_depth + 1)) - 1);

        let error = lookup
            .bit_mapping(1 << bit_depth, 0)
            .expect_err("index is too wide");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::IndexOutOfRange {
                index: 1 << bit_depth,
                capacity: 1 << bit_depth,
            }),
        );

        Ok(())
    }

    #[test]
    fn enclosing_attestation_is_reported_as_surrounded_by() -> Result<()> {
        let mut lookup = small_lookup(0, 0);
        let outer = attestation(10, 40);
        let inner = attestation(12, 30);

        lookup.add_attestation(&outer)?;

        let matches = lookup.match_attestation(&inner)?;

        assert_eq!(matches.surrounded_by, [lookup.geo_index(&outer)?]);
        assert!(matches.surrounds.is_empty());

        Ok(())
    }

    #[test]
    fn enclosed_attestation_is_reported_as_surrounds() -> Result<()> {
        let mut lookup = small_lookup(0, 0);
        let outer = attestation(10, 40);
        let inner = attestation(12, 30);

        lookup.add_attestation(&inner)?;

        let matches = lookup.match_attestation(&outer)?;

        assert_eq!(matches.surrounds, [lookup.geo_index(&inner)?]);
        assert!(matches.surrounded_by.is_empty());

        Ok(())
    }

    #[test_case(10, 40; "same attestation")]
    #[test_case(10, 30; "same source")]
    #[test_case(12, 40; "same target")]
    #[test_case(41, 50; "disjoint after")]
    #[test_case(1, 9; "disjoint before")]
    #[test_case(5, 20; "overlapping before")]
    #[test_case(20, 45; "overlapping after")]
    fn unrelated_attestations_do_not_match_without_zoom(source: Epoch, target: Epoch) -> Result<()> {
        let mut lookup = small_lookup(0, 0);

        lookup.add_attestation(&attestation(10, 40))?;

        assert_eq!(
            lookup.match_attestation(&attestation(source, target))?,
            GeoMatches::default(),
        );

        Ok(())
    }

    #[test]
    fn zoom_reports_neighbouring_cells_as_candidates() -> Result<()> {
        let mut lookup = small_lookup(4, 0);

        // Same cell as the query, with no actual surround relation.
        lookup.add_attestation(&attestation(9, 13))?;

        let matches = lookup.match_attestation(&attestation(8, 12))?;

        assert_eq!(matches.surrounds, [lookup.geo_index(&attestation(9, 13))?]);
        assert_eq!(matches.surrounded_by, matches.surrounds);

        Ok(())
    }

    #[test_case(0; "exact")]
    #[test_case(2; "zoomed")]
    #[test_case(4; "coarse")]
    fn matches_agree_with_brute_force(zoom: u8) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(u64::from(zoom));
        let mut lookup = small_lookup(zoom, 0);
        let mut seen: Vec<AttestationData> = vec![];

        for _ in 0..500 {
            let source = rng.gen_range(0..62);
            let target = rng.gen_range(source + 1..64);
            let incoming = attestation(source, target);

            let matches = lookup.match_attestation(&incoming)?;

            let surrounds = seen
                .iter()
                .filter(|previous| incoming.surrounds(previous))
                .map(|previous| lookup.geo_index(previous))
                .collect::<Result<Vec<_>>>()?;

            let surrounded_by = seen
                .iter()
                .filter(|previous| previous.surrounds(&incoming))
                .map(|previous| lookup.geo_index(previous))
                .collect::<Result<Vec<_>>>()?;

            for index in &surrounds {
                assert!(matches.surrounds.contains(index), "{incoming:?}");
            }

            for index in &surrounded_by {
                assert!(matches.surrounded_by.contains(index), "{incoming:?}");
            }

            if zoom == 0 {
                let mut surrounds = surrounds;
                let mut surrounded_by = surrounded_by;

                surrounds.sort_unstable();
                surrounds.dedup();
                surrounded_by.sort_unstable();
                surrounded_by.dedup();

                assert_eq!(matches.surrounds, surrounds, "{incoming:?}");
                assert_eq!(matches.surrounded_by, surrounded_by, "{incoming:?}");
            }

            lookup.add_attestation(&incoming)?;
            seen.push(incoming);
        }

        Ok(())
    }

    #[test]
    fn move_offset_rejects_misaligned_offset() {
        let mut lookup = small_lookup(0, 16);

        let error = lookup.move_offset(19).expect_err("offset is misaligned");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::InvalidOffsetAlignment { new_offset: 19 }),
        );
        assert_eq!(lookup.offset(), 16);
    }

    #[test]
    fn move_offset_rejects_moving_backward_or_too_far() {
        let mut lookup = refreshable_lookup(0);

        lookup.move_offset(16).expect("offset is in range");

        for new_offset in [8, 56] {
            let error = lookup
                .move_offset(new_offset)
                .expect_err("offset is out of range");

            assert_eq!(
                error.downcast_ref::<Error>(),
                Some(&Error::OffsetOutOfRange {
                    offset: 16,
                    new_offset,
                    max_offset: 40,
                }),
            );
        }

        assert_eq!(lookup.offset(), 16);
    }

    #[test]
    fn move_offset_near_the_end_of_the_range_does_not_overflow() -> Result<()> {
        let offset = u64::MAX - 7;
        let config = GeoConfig {
            epoch_distance: 96,
            epochs_per_refresh: 32,
            zoom: 0,
        };
        let mut lookup = GeoLookup::new(config, offset)?;

        lookup.move_offset(offset)?;

        let error = lookup
            .move_offset(offset - 8)
            .expect_err("offset is out of range");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::OffsetOutOfRange {
                offset,
                new_offset: offset - 8,
                max_offset: u64::MAX,
            }),
        );

        Ok(())
    }

    #[test]
    fn new_rejects_misaligned_offset() {
        let result = GeoLookup::new(GeoConfig::default(), 12);
        let error = result.err().expect("offset is misaligned");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::InvalidOffsetAlignment { new_offset: 12 }),
        );
    }

    #[test]
    fn move_offset_shifts_by_distance_from_previous_offset() -> Result<()> {
        let mut lookup = refreshable_lookup(0);

        lookup.add_attestation(&attestation(40, 50))?;
        lookup.move_offset(8)?;
        lookup.move_offset(24)?;

        // Each move shifts by its own distance, so the recorded leaf lands at 16..26.
        assert!(lookup.hit(lookup.layout().cell_index(16, 26), lookup.layout().bit_depth())?);
        assert_eq!(lookup.leaves()?, [lookup.layout().cell_index(16, 26)]);

        let inner = attestation(41, 49);
        let matches = lookup.match_attestation(&inner)?;

        assert_eq!(matches.surrounded_by, [lookup.geo_index(&attestation(40, 50))?]);

        Ok(())
    }

    #[test]
    fn move_offset_drops_targets_before_window_and_clamps_sources() -> Result<()> {
        let mut lookup = refreshable_lookup(0);

        lookup.add_attestation(&attestation(1, 5))?;
        lookup.add_attestation(&attestation(2, 30))?;
        lookup.move_offset(8)?;

        assert_eq!(lookup.leaves()?, [lookup.layout().cell_index(0, 22)]);

        // The clamped attestation still surrounds anything inside it within the window.
        let matches = lookup.match_attestation(&attestation(9, 20))?;

        assert_eq!(matches.surrounded_by.len(), 1);

        Ok(())
    }

    #[test]
    fn attestation_before_offset_is_rejected() {
        let lookup = small_lookup(0, 16);
        let error = lookup
            .match_attestation(&attestation(8, 20))
            .expect_err("source is before offset");

        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::InsufficientOffset {
                source_epoch: 8,
                target_epoch: 20,
                offset: 16,
                capacity: 64,
            }),
        );
    }

    #[test_case(0; "exact")]
    #[test_case(8; "cells wider than the shift")]
    fn moved_lookup_keeps_every_relation_inside_window(zoom: u8) -> Result<()> {
        const NEW_OFFSET: Epoch = 24;

        let mut rng = StdRng::seed_from_u64(0x0ff5e7 + u64::from(zoom));
        let mut lookup = refreshable_lookup(zoom);
        let mut seen: Vec<AttestationData> = vec![];

        for _ in 0..200 {
            let source = rng.gen_range(0..100);
            let target = rng.gen_range(source + 1..101);
            let recorded = attestation(source, target);

            lookup.add_attestation(&recorded)?;
            seen.push(recorded);
        }

        lookup.move_offset(8)?;
        lookup.move_offset(NEW_OFFSET)?;

        for _ in 0..200 {
            let source = rng.gen_range(NEW_OFFSET..NEW_OFFSET + 100);
            let target = rng.gen_range(source + 1..NEW_OFFSET + 101);
            let incoming = attestation(source, target);

            let matches = lookup.match_attestation(&incoming)?;

            if seen.iter().any(|previous| incoming.surrounds(previous)) {
                assert!(!matches.surrounds.is_empty(), "{incoming:?}");
            }

            if seen.iter().any(|previous| previous.surrounds(&incoming)) {
                assert!(!matches.surrounded_by.is_empty(), "{incoming:?}");
            }
        }

        Ok(())
    }

    #[test]
    fn fuzzy_check_narrows_focus_by_match_direction() -> Result<()> {
        let mut lookup = small_lookup(0, 0);
        let focus = Focus::new([3, 4]);

        let narrowed = lookup.fuzzy_check_and_add(&attestation(12, 30), &focus)?;

        assert_eq!(
            narrowed,
            Focus {
                double: focus.double.clone(),
                ..Focus::default()
            },
        );

        let narrowed = lookup.fuzzy_check_and_add(&attestation(10, 40), &focus)?;

        assert_eq!(narrowed.surrounding, focus.surrounding);
        assert!(narrowed.surrounded_by.is_empty());
        assert_eq!(narrowed.double, focus.double);

        let narrowed = lookup.fuzzy_check_and_add(&attestation(11, 35), &focus)?;

        assert_eq!(narrowed.surrounding, focus.surrounding);
        assert_eq!(narrowed.surrounded_by, focus.surrounded_by);

        Ok(())
    }
}
