//! World simulation modules

pub mod physics;
pub mod queue;
pub mod registry;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use registry::{Frame, OutputChannel};
pub use simulation::{GameWorld, Membership, WorldError, WorldHandle};
pub use world::{Directions, ParticipantId, PlayerState, Position, Snapshot};

/// Directions received from one participant in one inbound message.
/// Consumed by the first tick that drains the input queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub participant: ParticipantId,
    pub directions: Directions,
}

impl CommandBatch {
    pub fn new(participant: ParticipantId, directions: Directions) -> Self {
        Self {
            participant,
            directions,
        }
    }
}
