use futures::channel::mpsc::UnboundedSender;
use log::warn;

use crate::{
    attestation::{AttestationData, Epoch},
    focus::Focus,
    status::Slash,
};

pub enum ToSlasher {
    Attestation {
        attestation: AttestationData,
        focus: Focus,
    },
    // Prunes history relative to the given epoch.
    Epoch(Epoch),
}

impl ToSlasher {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            warn!("send to slasher failed because the receiver was dropped");
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub enum SlasherToReporter {
    Slash(Slash),
}

impl SlasherToReporter {
    pub fn send(self, tx: &UnboundedSender<Self>) {
        if tx.unbounded_send(self).is_err() {
            warn!("send to reporter failed because the receiver was dropped");
        }
    }
}
