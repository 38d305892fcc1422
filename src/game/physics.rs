//! Axis-aligned movement and playfield bounds

use super::world::{Direction, Directions, Position, WORLD_HEIGHT, WORLD_WIDTH};

/// Units moved per active direction per tick
pub const STEP: i32 = 1;

/// Physics system for advancing participant positions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Apply one step per active direction.
    /// Opposing directions are both applied; they are not special-cased.
    pub fn translate(position: Position, directions: &Directions) -> Position {
        let mut x = position.x;
        let mut y = position.y;

        for direction in directions.iter() {
            match direction {
                Direction::Left => x = x.saturating_sub(STEP),
                Direction::Right => x = x.saturating_add(STEP),
                Direction::Up => y = y.saturating_sub(STEP),
                Direction::Down => y = y.saturating_add(STEP),
            }
        }

        Position { x, y }
    }

    /// Clamp each axis independently to the playfield
    pub fn clamp_to_bounds(position: Position) -> Position {
        Position {
            x: position.x.clamp(0, WORLD_WIDTH),
            y: position.y.clamp(0, WORLD_HEIGHT),
        }
    }

    pub fn in_bounds(position: Position) -> bool {
        (0..=WORLD_WIDTH).contains(&position.x) && (0..=WORLD_HEIGHT).contains(&position.y)
    }
}
