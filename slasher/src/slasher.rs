use std::sync::Arc;

use anyhow::{Error as AnyhowError, Result};
use futures::{
    channel::mpsc::{UnboundedReceiver, UnboundedSender},
    stream::StreamExt as _,
};
use log::{debug, warn};
use thiserror::Error;

use crate::{
    attestation::{AttestationData, Epoch},
    detector::{Detector, FuzzyDetector},
    focus::Focus,
    grouped_detection::GroupedDetection,
    SlasherToReporter, ToSlasher,
};

#[derive(Debug, Error)]
enum Error {
    #[error(
        "attempted to process invalid attestation (error: {error}, attestation: {attestation:?})"
    )]
    InvalidAttestation {
        error: AnyhowError,
        attestation: AttestationData,
    },
}

pub struct Slasher<F, D> {
    detection: Arc<GroupedDetection<F, D>>,
    slashing_history_limit: u64,
    slasher_to_reporter_tx: UnboundedSender<SlasherToReporter>,
    to_slasher_rx: UnboundedReceiver<ToSlasher>,
}

impl<F: FuzzyDetector, D: Detector> Slasher<F, D> {
    #[must_use]
    pub const fn new(
        detection: Arc<GroupedDetection<F, D>>,
        slashing_history_limit: u64,
        slasher_to_reporter_tx: UnboundedSender<SlasherToReporter>,
        to_slasher_rx: UnboundedReceiver<ToSlasher>,
    ) -> Self {
        Self {
            detection,
            slashing_history_limit,
            slasher_to_reporter_tx,
            to_slasher_rx,
        }
    }

    /// Processes messages until every sender has been dropped.
    pub async fn run(mut self) -> Result<()> {
        while let Some(message) = self.to_slasher_rx.next().await {
            match message {
                ToSlasher::Attestation { attestation, focus } => {
                    if let Err(error) = self.process_attestation(&attestation, &focus) {
                        warn!("{}", Error::InvalidAttestation { error, attestation });
                    }
                }
                ToSlasher::Epoch(epoch) => self.cleanup(epoch)?,
            }
        }

        Ok(())
    }

    fn process_attestation(&self, attestation: &AttestationData, focus: &Focus) -> Result<()> {
        debug!(
            "processing attestation record (source: {}, target: {}, block_root: {:?})",
            attestation.source, attestation.target, attestation.block_root,
        );

        for slash in self.detection.check_and_add(attestation, focus)? {
            SlasherToReporter::Slash(slash).send(&self.slasher_to_reporter_tx);
        }

        Ok(())
    }

    fn cleanup(&self, current_epoch: Epoch) -> Result<()> {
        let epochs_to_keep = self.slashing_history_limit;

        if epochs_to_keep >= current_epoch {
            return Ok(());
        }

        self.detection.cleanup(current_epoch, epochs_to_keep)
    }
}
