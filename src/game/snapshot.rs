//! Snapshot encoding and broadcast bookkeeping

use std::sync::Arc;

use super::registry::Frame;
use super::world::Snapshot;

/// Serialize a snapshot once; the result is shared by every recipient
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(snapshot).map(Arc::from)
}

/// Running broadcast stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::Position;
    use uuid::Uuid;

    #[test]
    fn encodes_identity_keyed_object() {
        let id = Uuid::nil();
        let mut snapshot = Snapshot::new();
        snapshot.insert(id, Position::new(402, 300));

        let frame = encode_snapshot(&snapshot).unwrap();
        assert_eq!(
            &*frame,
            r#"{"00000000-0000-0000-0000-000000000000":{"x":402,"y":300}}"#
        );
    }

    #[test]
    fn empty_world_encodes_empty_object() {
        assert_eq!(&*encode_snapshot(&Snapshot::new()).unwrap(), "{}");
    }

    #[test]
    fn stats_track_average_players() {
        let mut stats = SnapshotStats::default();
        stats.record(2, 100);
        stats.record(4, 300);
        assert_eq!(stats.total_snapshots, 2);
        assert_eq!(stats.total_bytes, 400);
        assert!((stats.avg_players_per_snapshot - 3.0).abs() < f32::EPSILON);
    }
}
