//! WebSocket ingress and wire protocol

pub mod handler;
pub mod protocol;
