//! Frame-stepped movement driver tying the subsystems together.
//!
//! [`MovementSim`] owns the pathfinding engine, the request scheduler,
//! the sector index and the reservation table, and advances every unit
//! one step per [`MovementSim::tick`]. The outer game loop feeds it
//! spawn/destroy/move commands between ticks and consumes the
//! [`FrameOutputs`] each tick returns.
//!
//! Everything in here is deterministic: units advance in sorted id
//! order, positions are fixed-point, and no wall-clock time is
//! consulted.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::error::{NavError, Result};
use crate::grid::{Cell, Grid};
use crate::math::{Fixed, Vec2Fixed};
use crate::pathfinding::{PathResult, PathfindingEngine};
use crate::reservation::TileReservationManager;
use crate::scheduler::{CompletedRequest, PathRequestScheduler, RequestId};
use crate::sector::SectorIndex;
use crate::unit::{Facing, UnitId, UnitState};
use crate::visibility::VisibilityDetector;

/// Consecutive denied steps before a unit asks its blocker to move.
pub const BLOCK_WAIT_TICKS: u32 = 3;

/// Reservations older than this that never turned into occupancy are
/// reclaimed. Generous: a healthy unit converts its reservation within
/// a few ticks.
pub const RESERVATION_TTL_TICKS: u64 = 600;

/// Initial attributes for a spawned unit.
#[derive(Debug, Clone, Copy)]
pub struct UnitSpawnParams {
    /// World position; snapped to the containing cell's center.
    pub position: Vec2Fixed,
    /// Movement speed in world units per tick.
    pub speed: Fixed,
    /// Sight radius in world units.
    pub sight_radius: Fixed,
}

impl Default for UnitSpawnParams {
    fn default() -> Self {
        Self {
            position: Vec2Fixed::ZERO,
            speed: Fixed::from_num(1),
            sight_radius: Fixed::from_num(8),
        }
    }
}

/// Everything a tick produced for the outer loop.
#[derive(Debug, Clone, Default)]
pub struct FrameOutputs {
    /// Path results delivered this tick, in service order.
    pub delivered: Vec<CompletedRequest>,
    /// Visibility set per tracked unit, in sorted observer order.
    pub visibility: BTreeMap<UnitId, BTreeSet<UnitId>>,
}

/// The movement core: one instance per match, explicitly constructed
/// and threaded through the game loop.
#[derive(Debug)]
pub struct MovementSim {
    tick: u64,
    engine: PathfindingEngine,
    scheduler: PathRequestScheduler,
    sectors: SectorIndex,
    reservations: TileReservationManager,
    units: BTreeMap<UnitId, UnitState>,
    next_unit_id: u64,
}

impl MovementSim {
    /// Create a simulation over a grid with default scheduler budgets.
    #[must_use]
    pub fn new(grid: Grid) -> Self {
        Self::with_scheduler(grid, PathRequestScheduler::default())
    }

    /// Create a simulation with explicit per-frame scheduler budgets.
    #[must_use]
    pub fn with_budgets(grid: Grid, requests_per_frame: u32, expansions_per_frame: u32) -> Self {
        Self::with_scheduler(
            grid,
            PathRequestScheduler::new(requests_per_frame, expansions_per_frame),
        )
    }

    fn with_scheduler(grid: Grid, scheduler: PathRequestScheduler) -> Self {
        let sectors = SectorIndex::new(&grid);
        Self {
            tick: 0,
            engine: PathfindingEngine::new(grid),
            scheduler,
            sectors,
            reservations: TileReservationManager::new(),
            units: BTreeMap::new(),
            next_unit_id: 1,
        }
    }

    /// Current tick counter.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// The navigation grid.
    #[must_use]
    pub fn grid(&self) -> &Grid {
        self.engine.grid()
    }

    /// Read access to a tracked unit.
    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&UnitState> {
        self.units.get(&id)
    }

    /// All tracked units, sorted by id.
    #[must_use]
    pub const fn units(&self) -> &BTreeMap<UnitId, UnitState> {
        &self.units
    }

    /// The reservation table, for assertions and debug overlays.
    #[must_use]
    pub const fn reservations(&self) -> &TileReservationManager {
        &self.reservations
    }

    /// The sector index, for assertions and debug overlays.
    #[must_use]
    pub const fn sectors(&self) -> &SectorIndex {
        &self.sectors
    }

    /// Spawn a unit, snapping it to the center of its cell. If that
    /// cell is blocked or already occupied, the nearest free cell is
    /// used instead (deterministic outward search).
    ///
    /// # Errors
    ///
    /// [`NavError::PositionOutOfBounds`] when the position is off the
    /// map, [`NavError::NoFreeCellNear`] when no free cell exists.
    pub fn spawn_unit(&mut self, params: UnitSpawnParams) -> Result<UnitId> {
        let requested = self.grid().world_to_cell(params.position).ok_or_else(|| {
            NavError::PositionOutOfBounds {
                x: params.position.x.to_num(),
                y: params.position.y.to_num(),
            }
        })?;
        let cell = self
            .find_spawn_cell(requested)
            .ok_or(NavError::NoFreeCellNear {
                x: requested.x,
                y: requested.y,
            })?;
        let position = self.grid().cell_to_world(cell);

        let id = UnitId(self.next_unit_id);
        self.next_unit_id += 1;
        let state = UnitState::new(id, position, params.speed, params.sight_radius);
        self.units.insert(id, state);
        self.reservations.occupy(id, cell);
        self.sectors.insert(id, position);
        tracing::debug!(unit = %id, %cell, "unit spawned");
        Ok(id)
    }

    /// Breadth-first search for the nearest walkable, unoccupied cell.
    /// Same expansion order as path neighbor iteration, so ties resolve
    /// identically on every client.
    fn find_spawn_cell(&self, requested: Cell) -> Option<Cell> {
        let grid = self.grid();
        let free = |cell: Cell| {
            grid.is_walkable(cell)
                && self.reservations.occupant_of(cell).is_none()
                && self.reservations.reservation_of(cell).is_none()
        };
        if free(requested) {
            return Some(requested);
        }
        let mut visited: HashSet<Cell> = HashSet::new();
        let mut queue: VecDeque<Cell> = VecDeque::new();
        visited.insert(requested);
        queue.push_back(requested);
        while let Some(current) = queue.pop_front() {
            for (dx, dy) in crate::grid::DIRECTIONS {
                let Some(next) = current.offset(dx, dy) else {
                    continue;
                };
                if !grid.in_bounds(next) || !visited.insert(next) {
                    continue;
                }
                if free(next) {
                    return Some(next);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Remove a unit, cancelling its path request and releasing every
    /// cell it holds.
    ///
    /// # Errors
    ///
    /// [`NavError::UnknownUnit`] if the id is not tracked.
    pub fn destroy_unit(&mut self, id: UnitId) -> Result<()> {
        if self.units.remove(&id).is_none() {
            return Err(NavError::UnknownUnit(id));
        }
        self.scheduler.cancel_for_unit(id);
        self.reservations.release_all(id);
        self.sectors.remove(id);
        tracing::debug!(unit = %id, "unit destroyed");
        Ok(())
    }

    /// Order a unit to a world position. The request supersedes any
    /// earlier order for the same unit; the old path is dropped
    /// immediately and the unit idles (keeping its occupancy) until the
    /// new path is delivered.
    ///
    /// A destination on blocked terrain is redirected to the nearest
    /// walkable cell.
    ///
    /// # Errors
    ///
    /// [`NavError::UnknownUnit`] for an untracked unit,
    /// [`NavError::PositionOutOfBounds`] for a target off the map.
    pub fn order_move(&mut self, id: UnitId, target: Vec2Fixed) -> Result<RequestId> {
        let unit = self.units.get(&id).ok_or(NavError::UnknownUnit(id))?;
        let start = self.grid().world_to_cell(unit.position).ok_or_else(|| {
            NavError::PositionOutOfBounds {
                x: unit.position.x.to_num(),
                y: unit.position.y.to_num(),
            }
        })?;
        let requested =
            self.grid()
                .world_to_cell(target)
                .ok_or_else(|| NavError::PositionOutOfBounds {
                    x: target.x.to_num(),
                    y: target.y.to_num(),
                })?;
        let goal = self.engine.closest_walkable(requested).unwrap_or(requested);

        if let Some(unit) = self.units.get_mut(&id) {
            unit.clear_path();
        }
        self.reservations.release_reservation(id);
        self.scheduler.submit(&self.engine, id, start, goal)
    }

    /// Advance the world one tick.
    ///
    /// Pipeline: service path requests within budget, deliver finished
    /// paths, advance units in sorted id order (reserving each step
    /// before taking it), reclaim stale reservations, then recompute
    /// visibility over the updated sector index.
    pub fn tick(&mut self) -> FrameOutputs {
        self.tick += 1;
        let tick = self.tick;

        self.scheduler.run_frame(&self.engine);
        let delivered = self.deliver_paths();

        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        for id in ids {
            self.advance_unit(id, tick);
        }

        self.reclaim_reservations(tick);

        let visibility =
            VisibilityDetector::new(self.engine.grid(), &self.sectors).compute(&self.units);

        FrameOutputs {
            delivered,
            visibility,
        }
    }

    /// Hand finished path results to their units. Results for units
    /// destroyed since submission are dropped silently; unreachable
    /// results leave the unit idle.
    fn deliver_paths(&mut self) -> Vec<CompletedRequest> {
        let completed = self.scheduler.poll_completed();
        for entry in &completed {
            let Some(unit) = self.units.get_mut(&entry.unit) else {
                continue;
            };
            match &entry.result {
                PathResult::Found(path) => {
                    let mut waypoints: VecDeque<Cell> = path.cells.iter().copied().collect();
                    // The search includes the start cell; the unit is
                    // already standing on it.
                    let here = self.engine.grid().world_to_cell(unit.position);
                    if waypoints.front().copied() == here {
                        waypoints.pop_front();
                    }
                    if waypoints.is_empty() {
                        unit.clear_path();
                    } else {
                        unit.set_path(waypoints);
                    }
                }
                PathResult::Unreachable => {
                    tracing::debug!(unit = %entry.unit, "destination unreachable");
                    unit.clear_path();
                }
            }
        }
        completed
    }

    fn advance_unit(&mut self, id: UnitId, tick: u64) {
        let Some(unit) = self.units.get(&id) else {
            return;
        };
        let Some(&next) = unit.path.front() else {
            return;
        };
        let position = unit.position;
        let speed = unit.speed;
        let goal = unit.goal;

        if self.reservations.try_reserve(self.engine.grid(), id, next, tick) {
            self.step_toward(id, next, position, speed);
            return;
        }

        // Step denied. Wait a few ticks for the blocker to clear on its
        // own, then ask it to step aside, and finally repath around it.
        let wait_ticks = {
            let Some(unit) = self.units.get_mut(&id) else {
                return;
            };
            unit.wait_ticks += 1;
            unit.wait_ticks
        };
        if wait_ticks <= BLOCK_WAIT_TICKS {
            return;
        }

        if self.request_yield(id, next, tick) {
            if let Some(unit) = self.units.get_mut(&id) {
                unit.wait_ticks = 0;
            }
            return;
        }

        let Some(goal) = goal else {
            return;
        };
        let Some(start) = self.engine.grid().world_to_cell(position) else {
            return;
        };
        if let Some(unit) = self.units.get_mut(&id) {
            unit.clear_path();
        }
        self.reservations.release_reservation(id);
        tracing::debug!(unit = %id, %start, %goal, "way blocked, repathing");
        if let Err(error) = self.scheduler.submit(&self.engine, id, start, goal) {
            tracing::warn!(unit = %id, %error, "repath request rejected");
        }
    }

    /// Move a unit toward the center of its granted cell, committing the
    /// occupancy swap on arrival.
    fn step_toward(&mut self, id: UnitId, next: Cell, position: Vec2Fixed, speed: Fixed) {
        let target = self.engine.grid().cell_to_world(next);
        let delta = target - position;
        let arrived = position.distance_squared(target) <= speed * speed;
        let new_position = if arrived {
            target
        } else {
            position + delta.normalize().scale(speed)
        };

        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        unit.position = new_position;
        unit.wait_ticks = 0;
        if let Some(facing) = Facing::from_step(step_sign(delta.x), step_sign(delta.y)) {
            unit.facing = facing;
        }
        if arrived {
            unit.path.pop_front();
            if unit.path.is_empty() {
                unit.goal = None;
                tracing::debug!(unit = %id, %next, "destination reached");
            }
            self.reservations.occupy(id, next);
        }
        self.sectors.update_membership(id, position, new_position);
    }

    /// Ask whatever blocks `cell` to vacate it. Returns true when the
    /// blocker committed to a sidestep.
    fn request_yield(&mut self, requester: UnitId, cell: Cell, tick: u64) -> bool {
        let Some(blocker_id) = self.reservations.blocker_of(cell, requester) else {
            return false;
        };
        // The blocker must not sidestep onto the requester's remaining
        // path or they would collide again a step later.
        let avoid: HashSet<Cell> = self
            .units
            .get(&requester)
            .map(|unit| unit.path.iter().copied().collect())
            .unwrap_or_default();
        let from = self.reservations.cell_of(blocker_id).unwrap_or(cell);
        let Some(blocker) = self.units.get_mut(&blocker_id) else {
            return false;
        };
        self.reservations
            .on_blocked(self.engine.grid(), blocker_id, from, &avoid, blocker, tick)
            .is_some()
    }

    /// Hash of the full movement state, for lockstep verification and
    /// determinism tests. Iterates units in sorted id order; positions
    /// hash by their raw fixed-point bits.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);
        self.units.len().hash(&mut hasher);
        for (id, unit) in &self.units {
            id.hash(&mut hasher);
            unit.position.x.to_bits().hash(&mut hasher);
            unit.position.y.to_bits().hash(&mut hasher);
            unit.facing.hash(&mut hasher);
            unit.path.hash(&mut hasher);
            unit.goal.hash(&mut hasher);
            unit.wait_ticks.hash(&mut hasher);
            self.reservations.cell_of(*id).hash(&mut hasher);
            self.reservations.reserved_cell_of(*id).hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Drop claims that can no longer be honored: reservations held by
    /// idle units, and any reservation past its TTL.
    fn reclaim_reservations(&mut self, tick: u64) {
        let stale: Vec<UnitId> = self
            .units
            .values()
            .filter(|unit| !unit.is_moving() && self.reservations.reserved_cell_of(unit.id).is_some())
            .map(|unit| unit.id)
            .collect();
        for id in stale {
            self.reservations.release_reservation(id);
        }
        self.reservations
            .expire_older_than(tick.saturating_sub(RESERVATION_TTL_TICKS));
    }
}

const fn step_sign(value: Fixed) -> i32 {
    if value.is_positive() {
        1
    } else if value.is_negative() {
        -1
    } else {
        0
    }
}
