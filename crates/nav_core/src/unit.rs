//! Unit records as the movement core sees them.
//!
//! Units are owned by the simulation layer; the core reads identity,
//! position and movement stats, and updates only path, facing and
//! reservation-related state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::grid::Cell;
use crate::math::{Fixed, Vec2Fixed};

/// Unique identifier for units tracked by the core.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct UnitId(pub u64);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// One of the eight compass directions a unit can face.
///
/// Units snap to eight headings; the rendering layer maps each heading to
/// a sprite row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Facing {
    /// +x
    #[default]
    East,
    /// +x, +y
    Southeast,
    /// +y
    South,
    /// -x, +y
    Southwest,
    /// -x
    West,
    /// -x, -y
    Northwest,
    /// -y
    North,
    /// +x, -y
    Northeast,
}

impl Facing {
    /// Derive a facing from a cell-step delta. Zero delta keeps no
    /// meaning here; callers skip the update when the unit did not move.
    #[must_use]
    pub fn from_step(dx: i32, dy: i32) -> Option<Self> {
        match (dx.signum(), dy.signum()) {
            (1, 0) => Some(Self::East),
            (1, 1) => Some(Self::Southeast),
            (0, 1) => Some(Self::South),
            (-1, 1) => Some(Self::Southwest),
            (-1, 0) => Some(Self::West),
            (-1, -1) => Some(Self::Northwest),
            (0, -1) => Some(Self::North),
            (1, -1) => Some(Self::Northeast),
            _ => None,
        }
    }
}

/// Per-unit movement state tracked by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    /// Unit identifier.
    pub id: UnitId,
    /// Current world position.
    pub position: Vec2Fixed,
    /// Current heading.
    pub facing: Facing,
    /// Movement speed in world units per tick.
    #[serde(with = "crate::math::fixed_serde")]
    pub speed: Fixed,
    /// Sight radius in world units.
    #[serde(with = "crate::math::fixed_serde")]
    pub sight_radius: Fixed,
    /// Remaining waypoints of the current path, front = next cell.
    pub path: VecDeque<Cell>,
    /// Final destination of the current path, kept for repathing.
    pub goal: Option<Cell>,
    /// Ticks spent waiting on a blocked next cell.
    pub wait_ticks: u32,
}

impl UnitState {
    /// Create a stationary unit at the given position.
    #[must_use]
    pub fn new(id: UnitId, position: Vec2Fixed, speed: Fixed, sight_radius: Fixed) -> Self {
        Self {
            id,
            position,
            facing: Facing::default(),
            speed,
            sight_radius,
            path: VecDeque::new(),
            goal: None,
            wait_ticks: 0,
        }
    }

    /// True if the unit currently has waypoints to follow.
    #[must_use]
    pub fn is_moving(&self) -> bool {
        !self.path.is_empty()
    }

    /// Replace the current path. The first waypoint is expected to be the
    /// cell after the unit's current one.
    pub fn set_path(&mut self, waypoints: VecDeque<Cell>) {
        self.goal = waypoints.back().copied();
        self.path = waypoints;
        self.wait_ticks = 0;
    }

    /// Drop the current path and its bookkeeping.
    pub fn clear_path(&mut self) {
        self.path.clear();
        self.goal = None;
        self.wait_ticks = 0;
    }
}

impl crate::reservation::Yielder for UnitState {
    /// Only stationary units may be asked to step aside; a moving unit
    /// will vacate the contested cell on its own.
    fn can_yield(&self) -> bool {
        !self.is_moving()
    }

    fn accept_yield(&mut self, to: Cell) {
        self.set_path(VecDeque::from([to]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_from_step() {
        assert_eq!(Facing::from_step(1, 0), Some(Facing::East));
        assert_eq!(Facing::from_step(-1, -1), Some(Facing::Northwest));
        assert_eq!(Facing::from_step(0, 5), Some(Facing::South));
        assert_eq!(Facing::from_step(0, 0), None);
    }

    #[test]
    fn test_set_and_clear_path() {
        let mut unit = UnitState::new(
            UnitId(1),
            Vec2Fixed::ZERO,
            Fixed::from_num(1),
            Fixed::from_num(5),
        );
        assert!(!unit.is_moving());

        unit.set_path(VecDeque::from(vec![Cell::new(1, 0), Cell::new(2, 0)]));
        assert!(unit.is_moving());
        assert_eq!(unit.goal, Some(Cell::new(2, 0)));

        unit.clear_path();
        assert!(!unit.is_moving());
        assert_eq!(unit.goal, None);
    }
}
