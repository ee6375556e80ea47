//! # Nav Core
//!
//! Deterministic movement intelligence core for grid-based RTS games.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Lockstep multiplayer (identical movement across clients)
//! - Headless server builds
//! - Replay systems
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`grid`] - Navigation grid and cell geometry
//! - [`pathfinding`] - Incremental A* search and engine
//! - [`scheduler`] - Budgeted FIFO path-request queue
//! - [`reservation`] - Tile occupancy, step reservations, yielding
//! - [`sector`] - Spatial sector index for proximity queries
//! - [`visibility`] - Sector-pruned line-of-sight detection
//! - [`simulation`] - Frame-stepped movement driver
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod grid;
pub mod math;
pub mod pathfinding;
pub mod reservation;
pub mod scheduler;
pub mod sector;
pub mod simulation;
pub mod unit;
pub mod visibility;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{NavError, Result};
    pub use crate::grid::{Cell, CellType, Connectivity, Grid};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::pathfinding::{Path, PathResult, PathSearch, PathfindingEngine, SearchStep};
    pub use crate::reservation::{TileReservationManager, Yielder};
    pub use crate::scheduler::{CompletedRequest, PathRequestScheduler, RequestId};
    pub use crate::sector::{SectorId, SectorIndex, SECTOR_SIZE};
    pub use crate::simulation::{FrameOutputs, MovementSim, UnitSpawnParams};
    pub use crate::unit::{Facing, UnitId, UnitState};
    pub use crate::visibility::{has_line_of_sight, VisibilityDetector, VisibilityEdge};
}
