//! Pub/sub bridge for sharing input across server processes

pub mod broker;

pub use broker::{BusPublisher, RedisBus};

use futures::{Stream, StreamExt};
use tracing::{debug, error};

use crate::game::{CommandBatch, WorldError, WorldHandle};
use crate::ws::protocol::{BusEnvelope, DecodeError};

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Failed to encode bus message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode bus message: {0}")]
    Decode(#[from] DecodeError),

    #[error("Bus subscription closed")]
    SubscriptionClosed,

    #[error("World stopped while relaying bus input")]
    WorldStopped(#[from] WorldError),
}

/// Failure to hand a batch to the simulation
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Per-message failure; the connection may continue
    #[error(transparent)]
    Bus(BusError),

    /// The world is gone; nothing more can be submitted
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Where ingress sends decoded input
#[derive(Debug, Clone)]
pub enum InputRouter {
    /// Enqueue directly on this process's world
    Local(WorldHandle),
    /// Publish to the bus; the subscriber feeds the world
    Bus(BusPublisher),
}

impl InputRouter {
    pub async fn submit(&self, batch: CommandBatch) -> Result<(), SubmitError> {
        match self {
            Self::Local(world) => Ok(world.enqueue(batch)?),
            Self::Bus(publisher) => publisher.publish(&batch).await.map_err(SubmitError::Bus),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Bus(_) => "distributed",
        }
    }
}

/// Feed every bus message into the world's input queue.
///
/// Only returns on a fatal condition: an unreadable or undecodable payload,
/// the subscription ending, or the world stopping. Any of them leaves this
/// process out of sync with its peers.
pub async fn run_subscriber<S>(messages: S, world: WorldHandle) -> BusError
where
    S: Stream<Item = Result<String, BusError>>,
{
    let mut messages = std::pin::pin!(messages);

    while let Some(message) = messages.next().await {
        let payload = match message {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Unreadable bus message, subscriber exiting");
                return e;
            }
        };

        let envelope = match BusEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Undecodable bus message, subscriber exiting");
                return e.into();
            }
        };

        debug!(participant_id = %envelope.id, "Bus input received");
        if let Err(e) = world.enqueue(envelope.into_batch()) {
            error!(error = %e, "World stopped, bus subscriber exiting");
            return BusError::WorldStopped(e);
        }
    }

    error!("Bus subscription stream ended");
    BusError::SubscriptionClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Directions, GameWorld, OutputChannel, Position};
    use std::time::Duration;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    fn spawn_world() -> WorldHandle {
        let (world, handle) = GameWorld::new(Duration::from_secs(3600));
        tokio::spawn(world.run());
        handle
    }

    #[tokio::test]
    async fn subscriber_enqueues_until_stream_ends() {
        let world = spawn_world();
        let id = Uuid::new_v4();
        let (channel, _rx) = OutputChannel::bounded(8);
        assert_ok!(world.register(id, channel).await);

        let good = BusEnvelope {
            id,
            inputs: vec!["up".into(), "right".into()],
        }
        .encode()
        .unwrap();

        let fatal = run_subscriber(futures::stream::iter(vec![Ok(good)]), world.clone()).await;
        assert!(matches!(fatal, BusError::SubscriptionClosed));

        let snapshot = assert_ok!(world.step().await);
        assert_eq!(snapshot[&id], Position::new(401, 299));
    }

    #[tokio::test]
    async fn undecodable_message_is_fatal() {
        let world = spawn_world();
        let id = Uuid::new_v4();
        let (channel, _rx) = OutputChannel::bounded(8);
        assert_ok!(world.register(id, channel).await);

        let later = BusEnvelope {
            id,
            inputs: vec!["left".into()],
        }
        .encode()
        .unwrap();

        // The stream stays open, so only the bad payload can end the loop
        let messages = futures::stream::iter(vec![Ok("garbage".to_string()), Ok(later)])
            .chain(futures::stream::pending());

        let fatal = tokio::time::timeout(
            Duration::from_secs(5),
            run_subscriber(messages, world.clone()),
        )
        .await
        .expect("subscriber kept running after a bad payload");
        assert!(matches!(fatal, BusError::Decode(_)));

        let snapshot = assert_ok!(world.step().await);
        assert_eq!(snapshot[&id], Position::SPAWN);
    }

    #[tokio::test]
    async fn unreadable_message_is_fatal() {
        let world = spawn_world();
        let unreadable = serde_json::from_str::<u8>("x").unwrap_err();

        let messages = futures::stream::iter(vec![Err(BusError::Encode(unreadable))])
            .chain(futures::stream::pending());

        let fatal = tokio::time::timeout(Duration::from_secs(5), run_subscriber(messages, world))
            .await
            .expect("subscriber kept running after a read failure");
        assert!(matches!(fatal, BusError::Encode(_)));
    }

    #[tokio::test]
    async fn subscriber_fails_when_world_stops() {
        let (world, handle) = GameWorld::new(Duration::from_secs(3600));
        drop(world);

        let payload = BusEnvelope {
            id: Uuid::new_v4(),
            inputs: vec!["left".into()],
        }
        .encode()
        .unwrap();

        let fatal = run_subscriber(futures::stream::iter(vec![Ok(payload)]), handle).await;
        assert!(matches!(fatal, BusError::WorldStopped(WorldError::Closed)));
    }

    #[tokio::test]
    async fn local_router_enqueues_on_world() {
        let world = spawn_world();
        let id = Uuid::new_v4();
        let (channel, _rx) = OutputChannel::bounded(8);
        assert_ok!(world.register(id, channel).await);

        let router = InputRouter::Local(world.clone());
        assert_eq!(router.mode(), "local");
        assert_ok!(
            router
                .submit(CommandBatch::new(id, Directions::from_tokens(["left"])))
                .await
        );

        let snapshot = assert_ok!(world.step().await);
        assert_eq!(snapshot[&id], Position::new(399, 300));
    }
}
