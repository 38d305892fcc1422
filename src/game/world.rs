//! Authoritative world model: participant identity -> player state

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::physics::PhysicsSystem;
use super::CommandBatch;

/// Opaque participant identity, assigned when a connection is accepted
pub type ParticipantId = Uuid;

/// Full world snapshot as sent to clients (ordered by identity)
pub type Snapshot = BTreeMap<ParticipantId, Position>;

/// Playfield width (inclusive upper bound for x)
pub const WORLD_WIDTH: i32 = 800;
/// Playfield height (inclusive upper bound for y)
pub const WORLD_HEIGHT: i32 = 600;

/// A single movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Parse a wire token. Unknown tokens yield `None`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Set of active directions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directions {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl Directions {
    /// Build a set from wire tokens, silently skipping unknown ones
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut directions = Self::default();
        for token in tokens {
            if let Some(direction) = Direction::from_token(token.as_ref()) {
                directions.insert(direction);
            }
        }
        directions
    }

    pub fn insert(&mut self, direction: Direction) {
        match direction {
            Direction::Up => self.up = true,
            Direction::Down => self.down = true,
            Direction::Left => self.left = true,
            Direction::Right => self.right = true,
        }
    }

    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    /// Merge another set into this one
    pub fn union(&mut self, other: Directions) {
        self.up |= other.up;
        self.down |= other.down;
        self.left |= other.left;
        self.right |= other.right;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(move |d| self.contains(*d))
    }

    /// Canonical wire tokens for this set
    pub fn to_tokens(&self) -> Vec<String> {
        self.iter().map(|d| d.as_str().to_string()).collect()
    }
}

/// Integer position on the playfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Where every participant enters the world
    pub const SPAWN: Position = Position { x: 400, y: 300 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Simulated state of one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerState {
    pub position: Position,
    /// Intent for the current tick only; reset before input is applied
    pub active_directions: Directions,
}

impl PlayerState {
    pub fn spawn() -> Self {
        Self {
            position: Position::SPAWN,
            active_directions: Directions::default(),
        }
    }
}

/// Mapping of every registered participant to their state
#[derive(Debug, Default)]
pub struct World {
    players: HashMap<ParticipantId, PlayerState>,
}

impl World {
    /// Insert a participant at the spawn point. An existing entry is reset.
    pub fn spawn(&mut self, participant: ParticipantId) -> PlayerState {
        let state = PlayerState::spawn();
        self.players.insert(participant, state.clone());
        state
    }

    pub fn remove(&mut self, participant: &ParticipantId) -> Option<PlayerState> {
        self.players.remove(participant)
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<&PlayerState> {
        self.players.get(participant)
    }

    pub fn get_mut(&mut self, participant: &ParticipantId) -> Option<&mut PlayerState> {
        self.players.get_mut(participant)
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.players.contains_key(participant)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParticipantId> {
        self.players.keys()
    }

    /// Drop last tick's intent for every participant
    pub fn clear_directions(&mut self) {
        for player in self.players.values_mut() {
            player.active_directions.clear();
        }
    }

    /// Merge a batch into its participant's intent.
    /// Returns false when the participant has left the world.
    pub fn apply(&mut self, batch: &CommandBatch) -> bool {
        match self.players.get_mut(&batch.participant) {
            Some(player) => {
                player.active_directions.union(batch.directions);
                true
            }
            None => false,
        }
    }

    /// Move every participant by its active directions, then clamp to bounds
    pub fn advance(&mut self) {
        for player in self.players.values_mut() {
            let moved = PhysicsSystem::translate(player.position, &player.active_directions);
            player.position = PhysicsSystem::clamp_to_bounds(moved);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.players
            .iter()
            .map(|(id, player)| (*id, player.position))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tokens_are_ignored() {
        let directions = Directions::from_tokens(["up", "jump", "LEFT", "left"]);
        assert!(directions.up);
        assert!(directions.left);
        assert!(!directions.down);
        assert!(!directions.right);
    }

    #[test]
    fn union_merges_flags() {
        let mut a = Directions::from_tokens(["left"]);
        a.union(Directions::from_tokens(["up"]));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![Direction::Up, Direction::Left]);
    }

    #[test]
    fn spawn_places_participant_at_center() {
        let mut world = World::default();
        let id = Uuid::new_v4();
        let state = world.spawn(id);
        assert_eq!(state.position, Position::new(400, 300));
        assert!(state.active_directions.is_empty());
        assert!(world.contains(&id));
    }

    #[test]
    fn apply_for_departed_participant_is_discarded() {
        let mut world = World::default();
        let batch = CommandBatch::new(Uuid::new_v4(), Directions::from_tokens(["up"]));
        assert!(!world.apply(&batch));
        assert!(world.is_empty());
    }

    #[test]
    fn snapshot_serializes_only_coordinates() {
        let mut world = World::default();
        let id = Uuid::new_v4();
        world.spawn(id);
        world.get_mut(&id).unwrap().active_directions.insert(Direction::Up);

        let json = serde_json::to_value(world.snapshot()).unwrap();
        assert_eq!(json, serde_json::json!({ id.to_string(): { "x": 400, "y": 300 } }));
    }
}
