//! Application state shared across routes

use std::sync::Arc;

use crate::bus::InputRouter;
use crate::config::Config;
use crate::game::WorldHandle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The world actor on this process
    pub world: WorldHandle,
    /// Where ingress sends decoded input (local queue or bus)
    pub inputs: InputRouter,
}

impl AppState {
    pub fn new(config: Config, world: WorldHandle, inputs: InputRouter) -> Self {
        Self {
            config: Arc::new(config),
            world,
            inputs,
        }
    }
}
