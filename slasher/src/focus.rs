use core::ops::Range;

use itertools::Itertools as _;

use crate::attestation::ValidatorIndex;

/// Validator indices kept sorted in ascending order without duplicates.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct ValidatorIndexSet(Vec<ValidatorIndex>);

impl ValidatorIndexSet {
    #[must_use]
    pub fn query_range(&self, range: Range<ValidatorIndex>) -> Self {
        let start = self.0.partition_point(|index| *index < range.start);
        let end = self.0.partition_point(|index| *index < range.end);

        Self(self.0.get(start..end.max(start)).unwrap_or_default().to_vec())
    }

    #[must_use]
    pub fn contains(&self, validator_index: ValidatorIndex) -> bool {
        self.0.binary_search(&validator_index).is_ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<ValidatorIndex> {
        self.0.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = ValidatorIndex> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ValidatorIndex> for ValidatorIndexSet {
    fn from_iter<I: IntoIterator<Item = ValidatorIndex>>(iter: I) -> Self {
        let mut indices = iter.into_iter().collect_vec();
        indices.sort_unstable();
        indices.dedup();
        Self(indices)
    }
}

impl<const N: usize> From<[ValidatorIndex; N]> for ValidatorIndexSet {
    fn from(indices: [ValidatorIndex; N]) -> Self {
        indices.into_iter().collect()
    }
}

impl From<Vec<ValidatorIndex>> for ValidatorIndexSet {
    fn from(indices: Vec<ValidatorIndex>) -> Self {
        indices.into_iter().collect()
    }
}

/// Validators still suspected of each kind of violation for a single attestation.
///
/// Filter stages only ever remove validators from a focus.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Focus {
    // Validators that could be surrounding one of their previous attestations.
    pub surrounding: ValidatorIndexSet,
    // Validators that could be surrounded by one of their previous attestations.
    pub surrounded_by: ValidatorIndexSet,
    // Validators that could be double voting.
    pub double: ValidatorIndexSet,
}

impl Focus {
    #[must_use]
    pub fn new(validators: impl Into<ValidatorIndexSet>) -> Self {
        let validators = validators.into();

        Self {
            surrounding: validators.clone(),
            surrounded_by: validators.clone(),
            double: validators,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surrounding.is_empty() && self.surrounded_by.is_empty() && self.double.is_empty()
    }

    #[must_use]
    pub fn query_range(&self, range: Range<ValidatorIndex>) -> Self {
        Self {
            surrounding: self.surrounding.query_range(range.clone()),
            surrounded_by: self.surrounded_by.query_range(range.clone()),
            double: self.double.query_range(range),
        }
    }

    /// Every validator named by any of the three sets, in ascending order.
    pub fn validators(&self) -> impl Iterator<Item = ValidatorIndex> + '_ {
        [&self.surrounding, &self.surrounded_by, &self.double]
            .into_iter()
            .map(ValidatorIndexSet::iter)
            .kmerge()
            .dedup()
    }

    #[must_use]
    pub fn max_validator_index(&self) -> Option<ValidatorIndex> {
        [&self.surrounding, &self.surrounded_by, &self.double]
            .into_iter()
            .filter_map(ValidatorIndexSet::last)
            .max()
    }
}
