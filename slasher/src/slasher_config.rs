use core::ops::Range;

use anyhow::Result;
use derivative::Derivative;
use serde::Deserialize;

use crate::{
    attestation::{Epoch, ValidatorIndex},
    attestations::Attestations,
    detector::{Detector, FuzzyDetector},
    distance_bands::DistanceBands,
    geo_index::GeoConfig,
    geo_lookup::GeoLookup,
    grouped_detection::GroupedDetection,
    manhattan::Delta,
};

#[derive(Clone, PartialEq, Eq, Debug, Derivative, Deserialize)]
#[derivative(Default)]
#[serde(default, deny_unknown_fields)]
pub struct SlasherConfig {
    #[derivative(Default(value = "1_048_576"))]
    pub validator_count: u64,
    #[derivative(Default(value = "4096"))]
    pub group_size: u64,
    // Band widths from the shortest distances up. The default covers every distance below 54000.
    #[derivative(Default(value = "vec![4, 12, 48, 192, 768, 3072, 12288, 37617]"))]
    pub distance_gradient: Vec<Delta>,
    #[derivative(Default(value = "54000"))]
    pub max_target: Epoch,
    #[derivative(Default(value = "54000"))]
    pub slashing_history_limit: u64,
    pub geo: GeoConfig,
}

impl SlasherConfig {
    pub fn build_distance_bands(&self) -> Result<DistanceBands> {
        DistanceBands::new(&self.distance_gradient, self.max_target)
    }

    pub fn build_geo_lookup(&self, offset: Epoch) -> Result<GeoLookup> {
        GeoLookup::new(self.geo, offset)
    }

    pub fn build_attestations(&self) -> Result<Attestations> {
        Attestations::new(self.max_target)
    }

    pub fn build_grouped_detection<F: FuzzyDetector, D: Detector>(
        &self,
        gate: F,
        build_group: impl FnMut(Range<ValidatorIndex>) -> Result<D>,
    ) -> Result<GroupedDetection<F, D>> {
        GroupedDetection::new(self.group_size, self.validator_count, gate, build_group)
    }

    /// Distance bands in front of min-max span stores.
    pub fn build_default_detection(&self) -> Result<GroupedDetection<DistanceBands, Attestations>> {
        self.build_grouped_detection(self.build_distance_bands()?, |_| self.build_attestations())
    }
}
