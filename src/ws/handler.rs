//! WebSocket upgrade handler and per-connection ingress loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::bus::{InputRouter, SubmitError};
use crate::game::{CommandBatch, Frame, OutputChannel, ParticipantId, WorldHandle};
use crate::ws::protocol::decode_client_input;

/// Why a connection's ingress loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressExit {
    /// Client closed the socket or the stream ended
    Closed,
    /// Transport-level read failure
    ReadError,
    /// Payload was not a JSON array of strings
    DecodeError,
    /// The socket writer stopped (write failure or unregistered)
    WriterStopped,
    /// The world actor is gone
    WorldStopped,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    serve_participant(
        Uuid::new_v4(),
        ws_sink,
        ws_stream,
        &state.world,
        &state.inputs,
        state.config.output_buffer,
    )
    .await;
}

/// Register a participant, run its session, and unregister it whichever
/// half stops first. Returns `None` if the world refused the registration.
pub async fn serve_participant<Si, St>(
    participant: ParticipantId,
    ws_sink: Si,
    ws_stream: St,
    world: &WorldHandle,
    inputs: &InputRouter,
    output_buffer: usize,
) -> Option<IngressExit>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (channel, frames) = OutputChannel::bounded(output_buffer);

    // Unregisters on every exit path once dropped
    let (spawn, membership) = match world.join(participant, channel).await {
        Ok(joined) => joined,
        Err(e) => {
            error!(participant_id = %participant, error = %e, "Failed to register participant");
            return None;
        }
    };

    info!(
        participant_id = %participant,
        x = spawn.position.x,
        y = spawn.position.y,
        "Participant joined"
    );

    let exit = run_session(participant, ws_sink, ws_stream, frames, inputs).await;

    drop(membership);
    info!(participant_id = %participant, reason = ?exit, "Participant left");
    Some(exit)
}

/// Run the reader and writer halves until either one stops
async fn run_session<Si, St>(
    participant: ParticipantId,
    ws_sink: Si,
    ws_stream: St,
    frames: mpsc::Receiver<Frame>,
    inputs: &InputRouter,
) -> IngressExit
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut writer = tokio::spawn(write_frames(participant, ws_sink, frames));

    let exit = tokio::select! {
        _ = &mut writer => IngressExit::WriterStopped,
        exit = ingress_loop(participant, ws_stream, inputs) => exit,
    };

    writer.abort();
    exit
}

/// Forward broadcast frames to the socket
async fn write_frames<Si>(
    participant: ParticipantId,
    mut ws_sink: Si,
    mut frames: mpsc::Receiver<Frame>,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    while let Some(frame) = frames.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
            debug!(participant_id = %participant, error = %e, "WebSocket send failed");
            return;
        }
    }

    debug!(participant_id = %participant, "Output channel closed");
    let _ = ws_sink.close().await;
}

/// Decode each inbound message into a command batch and submit it.
/// Stops on close, read error or the first undecodable payload.
pub async fn ingress_loop<S>(
    participant: ParticipantId,
    mut ws_stream: S,
    inputs: &InputRouter,
) -> IngressExit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(result) = ws_stream.next().await {
        let payload = match result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(participant_id = %participant, "Received ping/pong");
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(participant_id = %participant, "Client initiated close");
                return IngressExit::Closed;
            }
            Err(e) => {
                warn!(participant_id = %participant, error = %e, "WebSocket read error");
                return IngressExit::ReadError;
            }
        };

        let directions = match decode_client_input(&payload) {
            Ok(directions) => directions,
            Err(e) => {
                warn!(participant_id = %participant, error = %e, "Malformed client message, closing");
                return IngressExit::DecodeError;
            }
        };

        match inputs.submit(CommandBatch::new(participant, directions)).await {
            Ok(()) => {}
            Err(SubmitError::Bus(e)) => {
                // Input is lost; the connection stays up
                warn!(participant_id = %participant, error = %e, "Failed to publish input");
            }
            Err(SubmitError::World(e)) => {
                error!(participant_id = %participant, error = %e, "Input rejected");
                return IngressExit::WorldStopped;
            }
        }
    }

    IngressExit::Closed
}
