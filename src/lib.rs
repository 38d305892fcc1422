//! Authoritative position synchronization server.
//!
//! Connections submit directional input over WebSocket; a single world
//! actor applies it on a fixed tick and broadcasts the resulting snapshot
//! to every participant. In distributed mode input is relayed through a
//! Redis pub/sub topic so several processes consume the same stream.

pub mod app;
pub mod bus;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
