//! Coarse spatial partition over the grid.
//!
//! The map is divided into sectors of [`SECTOR_SIZE`] × [`SECTOR_SIZE`]
//! cells so that visibility and collision candidates come from a unit's
//! own sector and the adjacent ring instead of the whole unit roster.
//! Without this, every pairwise check is O(n²) in the total unit count;
//! with it, the work is bounded by local density.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::grid::{Cell, Grid, DIRECTIONS};
use crate::math::{Fixed, Vec2Fixed};
use crate::unit::UnitId;

/// Cells per sector side.
pub const SECTOR_SIZE: u32 = 10;

/// Identifier of a sector: sector-lattice column and row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct SectorId {
    /// Sector column.
    pub x: u32,
    /// Sector row.
    pub y: u32,
}

impl SectorId {
    /// Create a new sector identifier.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Per-sector unit membership, kept consistent with unit positions after
/// every movement update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorIndex {
    /// Sector lattice width.
    cols: u32,
    /// Sector lattice height.
    rows: u32,
    /// Map width in cells, copied from the grid. The trailing sector may
    /// be partial, so lattice bounds alone do not bound the map.
    width: u32,
    /// Map height in cells.
    height: u32,
    /// Copied from the grid for world-space lookups.
    #[serde(with = "crate::math::fixed_serde")]
    cell_size: Fixed,
    /// Units inside each sector, row-major. `BTreeSet` keeps iteration
    /// order deterministic.
    members: Vec<BTreeSet<UnitId>>,
    /// Reverse map: which sector each tracked unit is in.
    assignments: HashMap<UnitId, SectorId>,
}

impl SectorIndex {
    /// Create an empty index sized for the given grid.
    #[must_use]
    pub fn new(grid: &Grid) -> Self {
        let cols = grid.width().div_ceil(SECTOR_SIZE);
        let rows = grid.height().div_ceil(SECTOR_SIZE);
        Self {
            cols,
            rows,
            width: grid.width(),
            height: grid.height(),
            cell_size: grid.cell_size(),
            members: vec![BTreeSet::new(); (cols as usize) * (rows as usize)],
            assignments: HashMap::new(),
        }
    }

    /// Sector lattice width.
    #[must_use]
    pub const fn cols(&self) -> u32 {
        self.cols
    }

    /// Sector lattice height.
    #[must_use]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Sector containing a grid cell.
    #[must_use]
    pub const fn sector_of_cell(&self, cell: Cell) -> SectorId {
        SectorId::new(cell.x / SECTOR_SIZE, cell.y / SECTOR_SIZE)
    }

    /// Sector containing a world position, `None` outside the map area.
    #[must_use]
    pub fn sector_of(&self, pos: Vec2Fixed) -> Option<SectorId> {
        if pos.x < Fixed::ZERO || pos.y < Fixed::ZERO {
            return None;
        }
        let cell_x = (pos.x / self.cell_size).to_num::<i64>();
        let cell_y = (pos.y / self.cell_size).to_num::<i64>();
        // Check against the map's cell extent, not the sector lattice:
        // a trailing partial sector covers cells past the map edge.
        if cell_x >= i64::from(self.width) || cell_y >= i64::from(self.height) {
            return None;
        }
        Some(SectorId::new(
            (cell_x / i64::from(SECTOR_SIZE)) as u32,
            (cell_y / i64::from(SECTOR_SIZE)) as u32,
        ))
    }

    #[inline]
    const fn in_bounds(&self, sector: SectorId) -> bool {
        sector.x < self.cols && sector.y < self.rows
    }

    #[inline]
    fn index(&self, sector: SectorId) -> usize {
        (sector.y as usize) * (self.cols as usize) + (sector.x as usize)
    }

    /// Start tracking a unit at the given position. Returns the sector it
    /// was filed under, or `None` if the position is off the map.
    pub fn insert(&mut self, unit: UnitId, position: Vec2Fixed) -> Option<SectorId> {
        let sector = self.sector_of(position)?;
        let index = self.index(sector);
        self.members[index].insert(unit);
        if let Some(previous) = self.assignments.insert(unit, sector) {
            if previous != sector {
                let index = self.index(previous);
                self.members[index].remove(&unit);
            }
        }
        Some(sector)
    }

    /// Stop tracking a unit (destroyed or off-map).
    pub fn remove(&mut self, unit: UnitId) {
        if let Some(sector) = self.assignments.remove(&unit) {
            let index = self.index(sector);
            self.members[index].remove(&unit);
        }
    }

    /// Move a unit's membership after a position change. Cheap no-op when
    /// the sector did not change.
    pub fn update_membership(
        &mut self,
        unit: UnitId,
        old_position: Vec2Fixed,
        new_position: Vec2Fixed,
    ) {
        let old_sector = self.sector_of(old_position);
        let new_sector = self.sector_of(new_position);
        if old_sector == new_sector {
            return;
        }
        debug_assert_eq!(
            self.assignments.get(&unit).copied(),
            old_sector,
            "sector assignment drifted from unit position"
        );
        if let Some(old) = old_sector {
            let index = self.index(old);
            self.members[index].remove(&unit);
        }
        match new_sector {
            Some(new) => {
                let index = self.index(new);
                self.members[index].insert(unit);
                self.assignments.insert(unit, new);
            }
            None => {
                self.assignments.remove(&unit);
            }
        }
    }

    /// Sector a unit is currently filed under.
    #[must_use]
    pub fn sector_of_unit(&self, unit: UnitId) -> Option<SectorId> {
        self.assignments.get(&unit).copied()
    }

    /// Units inside one sector.
    #[must_use]
    pub fn units_in(&self, sector: SectorId) -> &BTreeSet<UnitId> {
        &self.members[self.index(sector)]
    }

    /// Sectors adjacent to the given one (up to 8), in bounds only.
    #[must_use]
    pub fn adjacent_sectors(&self, sector: SectorId) -> Vec<SectorId> {
        DIRECTIONS
            .iter()
            .filter_map(|&(dx, dy)| {
                let x = i64::from(sector.x) + i64::from(dx);
                let y = i64::from(sector.y) + i64::from(dy);
                if x < 0 || y < 0 {
                    return None;
                }
                let candidate = SectorId::new(x as u32, y as u32);
                self.in_bounds(candidate).then_some(candidate)
            })
            .collect()
    }

    /// Units in the given sector and every sector within `radius` sectors
    /// of it. Deterministic order: row-major sector scan, sorted ids
    /// within each sector.
    #[must_use]
    pub fn units_near(&self, sector: SectorId, radius: u32) -> Vec<UnitId> {
        let mut result = Vec::new();
        let min_x = sector.x.saturating_sub(radius);
        let min_y = sector.y.saturating_sub(radius);
        let max_x = (sector.x + radius).min(self.cols - 1);
        let max_y = (sector.y + radius).min(self.rows - 1);
        for y in min_y..=max_y {
            for x in min_x..=max_x {
                result.extend(self.units_in(SectorId::new(x, y)).iter().copied());
            }
        }
        result
    }

    /// Verify membership against a fresh recomputation from raw positions.
    /// Test support: catches drift after arbitrary move sequences.
    #[must_use]
    pub fn is_consistent_with<'a, I>(&self, units: I) -> bool
    where
        I: Iterator<Item = (UnitId, &'a Vec2Fixed)>,
    {
        let mut expected: HashMap<UnitId, SectorId> = HashMap::new();
        for (unit, position) in units {
            match self.sector_of(*position) {
                Some(sector) => {
                    expected.insert(unit, sector);
                }
                None => return false,
            }
        }
        if expected != self.assignments {
            return false;
        }
        // Membership sets must agree with the assignment map exactly
        self.members.iter().enumerate().all(|(index, set)| {
            set.iter().all(|unit| {
                self.assignments
                    .get(unit)
                    .is_some_and(|sector| self.index(*sector) == index)
            })
        }) && self
            .assignments
            .iter()
            .all(|(unit, sector)| self.members[self.index(*sector)].contains(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Connectivity;

    fn test_grid() -> Grid {
        Grid::new(30, 30, Fixed::from_num(1), Connectivity::Eight)
    }

    fn vec2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::new(Fixed::from_num(x), Fixed::from_num(y))
    }

    #[test]
    fn test_lattice_dimensions() {
        let index = SectorIndex::new(&test_grid());
        assert_eq!(index.cols(), 3);
        assert_eq!(index.rows(), 3);

        // Partial trailing sector still gets its own bucket
        let grid = Grid::new(25, 11, Fixed::from_num(1), Connectivity::Eight);
        let index = SectorIndex::new(&grid);
        assert_eq!(index.cols(), 3);
        assert_eq!(index.rows(), 2);
    }

    #[test]
    fn test_sector_of_positions() {
        let index = SectorIndex::new(&test_grid());
        assert_eq!(index.sector_of(vec2(0, 0)), Some(SectorId::new(0, 0)));
        assert_eq!(index.sector_of(vec2(15, 5)), Some(SectorId::new(1, 0)));
        assert_eq!(index.sector_of(vec2(29, 29)), Some(SectorId::new(2, 2)));
        assert_eq!(index.sector_of(vec2(-1, 0)), None);
        assert_eq!(index.sector_of(vec2(31, 0)), None);
    }

    #[test]
    fn test_sector_of_rejects_positions_in_partial_sector_overhang() {
        // 25 cells wide -> 3 sector columns whose lattice covers x 0..29.
        // Positions past the map edge must not land in the overhang.
        let grid = Grid::new(25, 11, Fixed::from_num(1), Connectivity::Eight);
        let index = SectorIndex::new(&grid);
        assert_eq!(index.sector_of(vec2(24, 5)), Some(SectorId::new(2, 0)));
        assert_eq!(index.sector_of(vec2(27, 5)), None);
        assert_eq!(index.sector_of(vec2(5, 13)), None);
    }

    #[test]
    fn test_insert_and_update_membership() {
        let mut index = SectorIndex::new(&test_grid());
        let unit = UnitId(7);

        let sector = index.insert(unit, vec2(5, 5)).unwrap();
        assert_eq!(sector, SectorId::new(0, 0));
        assert!(index.units_in(sector).contains(&unit));

        // Move within the same sector: membership unchanged
        index.update_membership(unit, vec2(5, 5), vec2(8, 8));
        assert!(index.units_in(SectorId::new(0, 0)).contains(&unit));

        // Cross the sector boundary
        index.update_membership(unit, vec2(8, 8), vec2(12, 8));
        assert!(!index.units_in(SectorId::new(0, 0)).contains(&unit));
        assert!(index.units_in(SectorId::new(1, 0)).contains(&unit));
        assert_eq!(index.sector_of_unit(unit), Some(SectorId::new(1, 0)));
    }

    #[test]
    fn test_remove() {
        let mut index = SectorIndex::new(&test_grid());
        let unit = UnitId(3);
        index.insert(unit, vec2(25, 25)).unwrap();
        index.remove(unit);
        assert_eq!(index.sector_of_unit(unit), None);
        assert!(index.units_in(SectorId::new(2, 2)).is_empty());
    }

    #[test]
    fn test_units_near_covers_adjacent_ring() {
        let mut index = SectorIndex::new(&test_grid());
        index.insert(UnitId(1), vec2(5, 5)).unwrap(); // (0,0)
        index.insert(UnitId(2), vec2(15, 5)).unwrap(); // (1,0)
        index.insert(UnitId(3), vec2(25, 25)).unwrap(); // (2,2)

        let near = index.units_near(SectorId::new(0, 0), 1);
        assert!(near.contains(&UnitId(1)));
        assert!(near.contains(&UnitId(2)));
        assert!(!near.contains(&UnitId(3)));
    }

    #[test]
    fn test_adjacent_sectors_clipped_at_edges() {
        let index = SectorIndex::new(&test_grid());
        assert_eq!(index.adjacent_sectors(SectorId::new(0, 0)).len(), 3);
        assert_eq!(index.adjacent_sectors(SectorId::new(1, 1)).len(), 8);
    }

    #[test]
    fn test_consistency_check() {
        let mut index = SectorIndex::new(&test_grid());
        let positions = vec![(UnitId(1), vec2(5, 5)), (UnitId(2), vec2(22, 13))];
        for (unit, pos) in &positions {
            index.insert(*unit, *pos).unwrap();
        }
        assert!(index.is_consistent_with(positions.iter().map(|(u, p)| (*u, p))));

        // Moving a unit without telling the index breaks consistency
        let moved = vec![(UnitId(1), vec2(15, 5)), (UnitId(2), vec2(22, 13))];
        assert!(!index.is_consistent_with(moved.iter().map(|(u, p)| (*u, p))));
    }
}
