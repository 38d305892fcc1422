//! Pending directional input, drained once per tick

use super::CommandBatch;

/// Unbounded buffer of command batches in arrival order
#[derive(Debug, Default)]
pub struct InputQueue {
    pending: Vec<CommandBatch>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, batch: CommandBatch) {
        self.pending.push(batch);
    }

    /// Take every queued batch, leaving the queue empty
    pub fn drain_all(&mut self) -> Vec<CommandBatch> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
