//! Tile reservations and collision arbitration.
//!
//! Every moving unit reserves the next cell of its path before entering
//! it. A cell has at most one occupant and at most one active reservation
//! at any time; conflicts are transient and resolve through the
//! wait → yield → repath protocol driven by the simulation step, never
//! through a hard error.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::grid::{Cell, Grid};
use crate::unit::UnitId;

/// A unit's temporary claim on a cell it intends to occupy next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The claiming unit.
    pub unit: UnitId,
    /// Tick the claim was granted, for expiry of claims that were never
    /// converted into occupancy.
    pub granted_tick: u64,
}

/// Narrow capability contract for entities that can be asked to vacate a
/// cell. The reservation manager depends only on this, not on concrete
/// unit types.
pub trait Yielder {
    /// True when the entity is idle and may be asked to step aside.
    fn can_yield(&self) -> bool;

    /// Commit to a sidestep into `to`. Called only after the manager has
    /// reserved `to` on the entity's behalf.
    fn accept_yield(&mut self, to: Cell);
}

/// Tracks which cell each unit occupies or is about to enter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TileReservationManager {
    /// Physical occupancy: at most one unit per cell.
    occupants: HashMap<Cell, UnitId>,
    /// Pending claims: at most one reservation per cell.
    reservations: HashMap<Cell, Reservation>,
    /// Reverse maps. Each unit occupies at most one cell and holds at
    /// most one reservation.
    occupied_by_unit: HashMap<UnitId, Cell>,
    reserved_by_unit: HashMap<UnitId, Cell>,
}

impl TileReservationManager {
    /// Create an empty manager for a freshly loaded map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit physically occupying a cell, if any.
    #[must_use]
    pub fn occupant_of(&self, cell: Cell) -> Option<UnitId> {
        self.occupants.get(&cell).copied()
    }

    /// Active reservation on a cell, if any.
    #[must_use]
    pub fn reservation_of(&self, cell: Cell) -> Option<Reservation> {
        self.reservations.get(&cell).copied()
    }

    /// Cell a unit currently occupies.
    #[must_use]
    pub fn cell_of(&self, unit: UnitId) -> Option<Cell> {
        self.occupied_by_unit.get(&unit).copied()
    }

    /// Cell a unit currently holds a reservation on.
    #[must_use]
    pub fn reserved_cell_of(&self, unit: UnitId) -> Option<Cell> {
        self.reserved_by_unit.get(&unit).copied()
    }

    /// Drop whatever reservation a unit holds, keeping its occupancy.
    /// Used when a path is cancelled or superseded.
    pub fn release_reservation(&mut self, unit: UnitId) {
        if let Some(cell) = self.reserved_by_unit.remove(&unit) {
            self.reservations.remove(&cell);
        }
    }

    /// The unit standing in the way of `requester` on `cell`: the
    /// occupant, or failing that the holder of a foreign reservation.
    #[must_use]
    pub fn blocker_of(&self, cell: Cell, requester: UnitId) -> Option<UnitId> {
        if let Some(occupant) = self.occupant_of(cell) {
            if occupant != requester {
                return Some(occupant);
            }
        }
        match self.reservation_of(cell) {
            Some(reservation) if reservation.unit != requester => Some(reservation.unit),
            _ => None,
        }
    }

    /// Attempt to reserve a cell for a unit's next step.
    ///
    /// Granted only when the cell is walkable terrain and neither occupied
    /// nor reserved by another unit. Idempotent for the current holder.
    /// A grant replaces any previous reservation the unit held.
    pub fn try_reserve(&mut self, grid: &Grid, unit: UnitId, cell: Cell, tick: u64) -> bool {
        if !grid.is_walkable(cell) {
            return false;
        }
        if self.occupant_of(cell).is_some_and(|occupant| occupant != unit) {
            return false;
        }
        match self.reservation_of(cell) {
            Some(reservation) if reservation.unit != unit => return false,
            Some(_) => return true,
            None => {}
        }

        // One reservation per unit: drop the old claim first.
        if let Some(previous) = self.reserved_by_unit.remove(&unit) {
            self.reservations.remove(&previous);
        }
        self.reservations.insert(
            cell,
            Reservation {
                unit,
                granted_tick: tick,
            },
        );
        self.reserved_by_unit.insert(unit, cell);
        true
    }

    /// Release a unit's reservation on a cell. No-op if the unit does not
    /// hold it.
    pub fn release(&mut self, unit: UnitId, cell: Cell) {
        if self
            .reservations
            .get(&cell)
            .is_some_and(|reservation| reservation.unit == unit)
        {
            self.reservations.remove(&cell);
            self.reserved_by_unit.remove(&unit);
        }
    }

    /// Record that a unit now physically occupies a cell, vacating its
    /// previous cell and consuming its reservation on the new one.
    pub fn occupy(&mut self, unit: UnitId, cell: Cell) {
        debug_assert!(
            !self.occupant_of(cell).is_some_and(|occupant| occupant != unit),
            "cell {cell} already occupied"
        );
        if let Some(previous) = self.occupied_by_unit.remove(&unit) {
            self.occupants.remove(&previous);
        }
        self.occupants.insert(cell, unit);
        self.occupied_by_unit.insert(unit, cell);
        self.release(unit, cell);
    }

    /// Release everything a unit holds (destroyed, or its path was
    /// cancelled).
    pub fn release_all(&mut self, unit: UnitId) {
        if let Some(cell) = self.occupied_by_unit.remove(&unit) {
            self.occupants.remove(&cell);
        }
        if let Some(cell) = self.reserved_by_unit.remove(&unit) {
            self.reservations.remove(&cell);
        }
    }

    /// Drop reservations granted before `oldest_tick` that were never
    /// converted into occupancy (their owner stalled or was redirected).
    pub fn expire_older_than(&mut self, oldest_tick: u64) {
        let expired: Vec<Cell> = self
            .reservations
            .iter()
            .filter(|(_, reservation)| reservation.granted_tick < oldest_tick)
            .map(|(cell, _)| *cell)
            .collect();
        for cell in expired {
            if let Some(reservation) = self.reservations.remove(&cell) {
                self.reserved_by_unit.remove(&reservation.unit);
                tracing::trace!(unit = %reservation.unit, %cell, "reservation expired");
            }
        }
    }

    /// Ask the blocking entity to vacate `from` so a blocked unit can
    /// pass. On success the blocker is handed a reservation on an
    /// adjacent free cell (never one in `avoid`, the blocked unit's
    /// remaining path) and committed to the sidestep.
    ///
    /// Returns the sidestep cell, or `None` when the blocker cannot or
    /// may not yield.
    pub fn on_blocked(
        &mut self,
        grid: &Grid,
        blocker_id: UnitId,
        from: Cell,
        avoid: &HashSet<Cell>,
        blocker: &mut dyn Yielder,
        tick: u64,
    ) -> Option<Cell> {
        if !blocker.can_yield() {
            return None;
        }
        let candidate = grid.neighbors(from).into_iter().find(|cell| {
            !avoid.contains(cell)
                && self.occupant_of(*cell).is_none()
                && self.reservation_of(*cell).is_none()
        })?;

        if !self.try_reserve(grid, blocker_id, candidate, tick) {
            return None;
        }
        blocker.accept_yield(candidate);
        tracing::debug!(unit = %blocker_id, %from, to = %candidate, "blocker yielding");
        Some(candidate)
    }

    /// Invariant check used by tests: the forward and reverse maps agree
    /// and no unit appears twice.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.occupants
            .iter()
            .all(|(cell, unit)| self.occupied_by_unit.get(unit) == Some(cell))
            && self
                .occupied_by_unit
                .iter()
                .all(|(unit, cell)| self.occupants.get(cell) == Some(unit))
            && self
                .reservations
                .iter()
                .all(|(cell, reservation)| {
                    self.reserved_by_unit.get(&reservation.unit) == Some(cell)
                })
            && self
                .reserved_by_unit
                .iter()
                .all(|(unit, cell)| {
                    self.reservations
                        .get(cell)
                        .is_some_and(|reservation| reservation.unit == *unit)
                })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellType, Connectivity, Grid};
    use crate::math::Fixed;

    fn grid() -> Grid {
        Grid::new(10, 10, Fixed::from_num(1), Connectivity::Eight)
    }

    struct TestYielder {
        idle: bool,
        accepted: Option<Cell>,
    }

    impl Yielder for TestYielder {
        fn can_yield(&self) -> bool {
            self.idle
        }

        fn accept_yield(&mut self, to: Cell) {
            self.accepted = Some(to);
        }
    }

    #[test]
    fn test_reserve_grant_and_deny() {
        let grid = grid();
        let mut manager = TileReservationManager::new();
        let cell = Cell::new(3, 3);

        assert!(manager.try_reserve(&grid, UnitId(1), cell, 0));
        // Second claimant is denied
        assert!(!manager.try_reserve(&grid, UnitId(2), cell, 0));
        // Holder re-requesting is fine
        assert!(manager.try_reserve(&grid, UnitId(1), cell, 1));
        assert!(manager.is_consistent());
    }

    #[test]
    fn test_reserve_denied_on_blocked_or_occupied() {
        let mut grid = grid();
        grid.set_cell(Cell::new(5, 5), CellType::Blocked);
        let mut manager = TileReservationManager::new();

        assert!(!manager.try_reserve(&grid, UnitId(1), Cell::new(5, 5), 0));

        manager.occupy(UnitId(2), Cell::new(4, 4));
        assert!(!manager.try_reserve(&grid, UnitId(1), Cell::new(4, 4), 0));
    }

    #[test]
    fn test_new_reservation_replaces_previous() {
        let grid = grid();
        let mut manager = TileReservationManager::new();

        assert!(manager.try_reserve(&grid, UnitId(1), Cell::new(1, 1), 0));
        assert!(manager.try_reserve(&grid, UnitId(1), Cell::new(2, 2), 1));

        assert_eq!(manager.reservation_of(Cell::new(1, 1)), None);
        assert!(manager.reservation_of(Cell::new(2, 2)).is_some());
        assert!(manager.is_consistent());
    }

    #[test]
    fn test_occupy_consumes_reservation_and_vacates() {
        let grid = grid();
        let mut manager = TileReservationManager::new();
        let unit = UnitId(1);

        manager.occupy(unit, Cell::new(0, 0));
        assert!(manager.try_reserve(&grid, unit, Cell::new(1, 0), 0));
        manager.occupy(unit, Cell::new(1, 0));

        assert_eq!(manager.occupant_of(Cell::new(0, 0)), None);
        assert_eq!(manager.occupant_of(Cell::new(1, 0)), Some(unit));
        assert_eq!(manager.reservation_of(Cell::new(1, 0)), None);
        assert!(manager.is_consistent());
    }

    #[test]
    fn test_release_all() {
        let grid = grid();
        let mut manager = TileReservationManager::new();
        let unit = UnitId(1);

        manager.occupy(unit, Cell::new(0, 0));
        assert!(manager.try_reserve(&grid, unit, Cell::new(1, 1), 0));

        manager.release_all(unit);
        assert_eq!(manager.occupant_of(Cell::new(0, 0)), None);
        assert_eq!(manager.reservation_of(Cell::new(1, 1)), None);
        assert!(manager.is_consistent());
    }

    #[test]
    fn test_expiry_of_stale_reservations() {
        let grid = grid();
        let mut manager = TileReservationManager::new();

        assert!(manager.try_reserve(&grid, UnitId(1), Cell::new(1, 1), 10));
        assert!(manager.try_reserve(&grid, UnitId(2), Cell::new(2, 2), 20));

        manager.expire_older_than(15);
        assert_eq!(manager.reservation_of(Cell::new(1, 1)), None);
        assert!(manager.reservation_of(Cell::new(2, 2)).is_some());
        assert!(manager.is_consistent());
    }

    #[test]
    fn test_on_blocked_yields_to_adjacent_free_cell() {
        let grid = grid();
        let mut manager = TileReservationManager::new();
        let blocker_id = UnitId(2);
        let contested = Cell::new(5, 5);
        manager.occupy(blocker_id, contested);

        let mut blocker = TestYielder {
            idle: true,
            accepted: None,
        };
        // The blocked unit's remaining path runs east through the cell
        let avoid: HashSet<Cell> = [contested, Cell::new(6, 5)].into_iter().collect();

        let sidestep = manager
            .on_blocked(&grid, blocker_id, contested, &avoid, &mut blocker, 0)
            .expect("yield should be possible");
        assert!(!avoid.contains(&sidestep));
        assert_eq!(blocker.accepted, Some(sidestep));
        assert_eq!(
            manager.reservation_of(sidestep).map(|r| r.unit),
            Some(blocker_id)
        );
    }

    #[test]
    fn test_on_blocked_respects_can_yield() {
        let grid = grid();
        let mut manager = TileReservationManager::new();
        let blocker_id = UnitId(2);
        manager.occupy(blocker_id, Cell::new(5, 5));

        let mut blocker = TestYielder {
            idle: false,
            accepted: None,
        };
        let avoid = HashSet::new();
        assert!(manager
            .on_blocked(&grid, blocker_id, Cell::new(5, 5), &avoid, &mut blocker, 0)
            .is_none());
        assert_eq!(blocker.accepted, None);
    }

    #[test]
    fn test_on_blocked_with_no_free_cell() {
        let mut grid = grid();
        // Box in the blocker completely
        for (dx, dy) in [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)] {
            let cell = Cell::new((5 + dx) as u32, (5 + dy) as u32);
            grid.set_cell(cell, CellType::Blocked);
        }
        let mut manager = TileReservationManager::new();
        let blocker_id = UnitId(2);
        manager.occupy(blocker_id, Cell::new(5, 5));

        let mut blocker = TestYielder {
            idle: true,
            accepted: None,
        };
        let avoid = HashSet::new();
        assert!(manager
            .on_blocked(&grid, blocker_id, Cell::new(5, 5), &avoid, &mut blocker, 0)
            .is_none());
    }
}
