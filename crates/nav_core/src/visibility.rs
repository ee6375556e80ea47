//! Line-of-sight visibility detection.
//!
//! For each observer, candidate targets are drawn only from the
//! observer's sector and the adjacent ring, so the per-frame cost is
//! bounded by local unit density, not total unit count. Sight radii are
//! expected not to exceed one sector's worth of cells; anything farther
//! is pruned before the distance test ever runs.
//!
//! Visibility is one-directional: radii differ per unit type, so A seeing
//! B implies nothing about B seeing A. Results are recomputed every frame
//! and never persisted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::grid::{Cell, Grid};
use crate::sector::SectorIndex;
use crate::unit::{UnitId, UnitState};

/// One directed visibility fact for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityEdge {
    /// The unit doing the looking.
    pub observer: UnitId,
    /// The unit being looked at.
    pub observed: UnitId,
    /// Whether the observer currently sees the observed.
    pub visible: bool,
}

/// Check if there's a clear line of sight between two cells.
///
/// Bresenham stepping through grid cells; any blocked cell on the line
/// occludes, and diagonal steps are occluded when either adjacent
/// orthogonal cell is blocked (no seeing through a blocked corner).
#[must_use]
pub fn has_line_of_sight(grid: &Grid, from: Cell, to: Cell) -> bool {
    let dx = (i64::from(to.x) - i64::from(from.x)).abs();
    let dy = (i64::from(to.y) - i64::from(from.y)).abs();
    let sx: i64 = if from.x < to.x { 1 } else { -1 };
    let sy: i64 = if from.y < to.y { 1 } else { -1 };
    let mut err = dx - dy;

    let mut x = i64::from(from.x);
    let mut y = i64::from(from.y);

    loop {
        if !grid.is_walkable(Cell::new(x as u32, y as u32)) {
            return false;
        }

        if x == i64::from(to.x) && y == i64::from(to.y) {
            break;
        }

        let e2 = 2 * err;

        if e2 > -dy && e2 < dx {
            // Diagonal step: both adjacent cardinal cells must be clear
            let next_x = (x + sx) as u32;
            let next_y = (y + sy) as u32;
            if !grid.is_walkable(Cell::new(next_x, y as u32))
                || !grid.is_walkable(Cell::new(x as u32, next_y))
            {
                return false;
            }
        }

        if e2 > -dy {
            err -= dy;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            y += sy;
        }
    }

    true
}

/// Sector-pruned visibility detector, borrowed fresh each frame after the
/// sector index has been updated.
///
/// Stationary entities (buildings) participate by registering in the
/// sector index like any unit, with zero speed.
#[derive(Debug, Clone, Copy)]
pub struct VisibilityDetector<'a> {
    grid: &'a Grid,
    sectors: &'a SectorIndex,
}

impl<'a> VisibilityDetector<'a> {
    /// Create a detector over the current frame's spatial state.
    #[must_use]
    pub const fn new(grid: &'a Grid, sectors: &'a SectorIndex) -> Self {
        Self { grid, sectors }
    }

    /// Everything the observer currently sees.
    ///
    /// A candidate is visible when it is within the observer's sight
    /// radius (squared fixed-point comparison, no sqrt) and no blocking
    /// terrain lies on the straight line between cell centers.
    #[must_use]
    pub fn visible_set(
        &self,
        observer: UnitId,
        units: &BTreeMap<UnitId, UnitState>,
    ) -> BTreeSet<UnitId> {
        let mut visible = BTreeSet::new();
        let Some(state) = units.get(&observer) else {
            return visible;
        };
        let Some(sector) = self.sectors.sector_of_unit(observer) else {
            return visible;
        };
        let Some(observer_cell) = self.grid.world_to_cell(state.position) else {
            return visible;
        };

        let radius_sq = state.sight_radius * state.sight_radius;
        for candidate in self.sectors.units_near(sector, 1) {
            if candidate == observer {
                continue;
            }
            let Some(target) = units.get(&candidate) else {
                continue;
            };
            if state.position.distance_squared(target.position) > radius_sq {
                continue;
            }
            let Some(target_cell) = self.grid.world_to_cell(target.position) else {
                continue;
            };
            if has_line_of_sight(self.grid, observer_cell, target_cell) {
                visible.insert(candidate);
            }
        }
        visible
    }

    /// Visibility sets for every tracked unit, in sorted observer order.
    #[must_use]
    pub fn compute(
        &self,
        units: &BTreeMap<UnitId, UnitState>,
    ) -> BTreeMap<UnitId, BTreeSet<UnitId>> {
        units
            .keys()
            .map(|&observer| (observer, self.visible_set(observer, units)))
            .collect()
    }

    /// Flatten one observer's result into directed edges.
    #[must_use]
    pub fn edges(
        &self,
        observer: UnitId,
        units: &BTreeMap<UnitId, UnitState>,
    ) -> Vec<VisibilityEdge> {
        let visible = self.visible_set(observer, units);
        units
            .keys()
            .filter(|&&observed| observed != observer)
            .map(|&observed| VisibilityEdge {
                observer,
                observed,
                visible: visible.contains(&observed),
            })
            .collect()
    }
}
