//! Redis pub/sub transport

use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{info, trace};

use crate::config::BusConfig;
use crate::game::CommandBatch;
use crate::ws::protocol::BusEnvelope;

use super::BusError;

/// Connection factory for the shared input topic
pub struct RedisBus {
    client: redis::Client,
    channel: String,
}

impl RedisBus {
    /// Validate the URL; no network traffic happens until a connection is requested
    pub fn open(config: &BusConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            channel: config.channel.clone(),
        })
    }

    pub async fn publisher(&self) -> Result<BusPublisher, BusError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        info!(channel = %self.channel, "Bus publisher connected");
        Ok(BusPublisher {
            conn,
            channel: self.channel.clone(),
        })
    }

    /// Subscribe to the topic and yield each raw payload
    pub async fn subscribe(
        &self,
    ) -> Result<impl Stream<Item = Result<String, BusError>> + Send + 'static, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Bus subscriber connected");

        Ok(pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().map_err(BusError::from)))
    }
}

/// Publishes command batches to the shared topic
#[derive(Clone)]
pub struct BusPublisher {
    conn: MultiplexedConnection,
    channel: String,
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl BusPublisher {
    pub async fn publish(&self, batch: &CommandBatch) -> Result<(), BusError> {
        let payload = BusEnvelope::from(batch)
            .encode()
            .map_err(BusError::Encode)?;

        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        trace!(participant_id = %batch.participant, receivers, "Published input");
        Ok(())
    }
}
