pub use crate::{
    attestation::{AttestationData, Epoch, ValidatorIndex, H256},
    attestation_history::AttestationHistory,
    attestations::Attestations,
    detector::{Detector, FuzzyDetector},
    distance_bands::{DistanceBand, DistanceBands},
    error::Error,
    focus::{Focus, ValidatorIndexSet},
    geo_index::{GeoConfig, GeoIndex, GeoLayout},
    geo_lookup::{GeoLookup, GeoMatches},
    grouped_detection::GroupedDetection,
    manhattan::{Delta, ManhattanIndex, MhBitfield},
    messages::{SlasherToReporter, ToSlasher},
    slasher::Slasher,
    slasher_config::SlasherConfig,
    status::{Slash, SlashType},
};

pub mod geo_index;
pub mod manhattan;

mod attestation;
mod attestation_history;
mod attestation_votes;
mod attestations;
mod detector;
mod distance_bands;
mod error;
mod focus;
mod geo_lookup;
mod grouped_detection;
mod messages;
mod slasher;
mod slasher_config;
mod status;
mod targets;
