//! Error types for the movement core.
//!
//! Only genuinely exceptional conditions are errors. An unreachable goal
//! is a normal pathfinding outcome ([`PathResult::Unreachable`]) and a
//! reservation conflict is resolved by the yield/repath protocol; neither
//! ever surfaces here.
//!
//! [`PathResult::Unreachable`]: crate::pathfinding::PathResult::Unreachable

use thiserror::Error;

use crate::unit::UnitId;

/// Result type alias using [`NavError`].
pub type Result<T> = std::result::Result<T, NavError>;

/// Top-level error type for the movement core.
#[derive(Debug, Error)]
pub enum NavError {
    /// Coordinates outside the grid bounds. The offending request is
    /// dropped; the frame loop continues.
    #[error("Cell ({x}, {y}) is outside the grid bounds")]
    CellOutOfBounds {
        /// Cell column.
        x: u32,
        /// Cell row.
        y: u32,
    },

    /// World position outside the map area.
    #[error("Position ({x}, {y}) is outside the map area")]
    PositionOutOfBounds {
        /// World X coordinate (truncated for display).
        x: i64,
        /// World Y coordinate (truncated for display).
        y: i64,
    },

    /// No free walkable cell near a requested spawn position.
    #[error("No free cell near ({x}, {y})")]
    NoFreeCellNear {
        /// Cell column of the requested position.
        x: u32,
        /// Cell row of the requested position.
        y: u32,
    },

    /// Operation referenced a unit the core does not track.
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    /// Corrupt or empty map description. The only fatal class: without a
    /// valid grid none of the core services can be constructed.
    #[error("Failed to load map: {0}")]
    MapLoad(String),
}
