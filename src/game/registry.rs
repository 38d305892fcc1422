//! Connection registry: live output channels keyed by participant

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::world::ParticipantId;

/// A serialized snapshot, shared by every recipient of one tick
pub type Frame = Arc<str>;

/// Why a frame could not be handed to a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The participant's writer is gone; treat as a disconnect
    #[error("output channel closed")]
    Closed,
    /// The participant is not keeping up; this frame is skipped
    #[error("output channel full")]
    Full,
}

/// Sending half of one participant's outbound frame stream.
/// Delivery never waits, so one slow socket cannot hold up a tick.
#[derive(Debug, Clone)]
pub struct OutputChannel {
    tx: mpsc::Sender<Frame>,
}

impl OutputChannel {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }

    /// Create a channel along with the receiver its writer drains
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        })
    }
}

/// Outcome of fanning one frame out to every channel
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: Vec<ParticipantId>,
    pub disconnected: Vec<ParticipantId>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: HashMap<ParticipantId, OutputChannel>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: ParticipantId, channel: OutputChannel) {
        self.channels.insert(participant, channel);
    }

    pub fn remove(&mut self, participant: &ParticipantId) -> Option<OutputChannel> {
        self.channels.remove(participant)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.channels.keys()
    }

    /// Hand the same frame to every channel. Failures are reported per
    /// participant and never stop delivery to the rest.
    pub fn deliver_all(&self, frame: &Frame) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (participant, channel) in &self.channels {
            match channel.deliver(frame) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => report.skipped.push(*participant),
                Err(DeliveryError::Closed) => report.disconnected.push(*participant),
            }
        }
        report
    }
}
