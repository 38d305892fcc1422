//! Wire types for client and bus messages

use serde::{Deserialize, Serialize};

use crate::game::{CommandBatch, Directions, ParticipantId};

/// Inbound payload could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a client message: a JSON array of direction strings.
/// Unknown strings are ignored and `null` counts as an empty array;
/// anything else that is not a string array fails.
pub fn decode_client_input(payload: &[u8]) -> Result<Directions, DecodeError> {
    let tokens: Option<Vec<String>> = serde_json::from_slice(payload)?;
    Ok(Directions::from_tokens(tokens.unwrap_or_default()))
}

/// Input relayed over the pub/sub bus. The sender identity is always
/// carried in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub id: ParticipantId,
    pub inputs: Vec<String>,
}

impl BusEnvelope {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn into_batch(self) -> CommandBatch {
        CommandBatch::new(self.id, Directions::from_tokens(self.inputs))
    }
}

impl From<&CommandBatch> for BusEnvelope {
    fn from(batch: &CommandBatch) -> Self {
        Self {
            id: batch.participant,
            inputs: batch.directions.to_tokens(),
        }
    }
}

/// Body of `GET /` for liveness probes
pub const LIVENESS_BODY: &str = "ok";
