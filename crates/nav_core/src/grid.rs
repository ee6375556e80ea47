//! Static walkability grid for the loaded mission map.
//!
//! The grid is a pure query surface: loaded once per mission, read-only
//! afterwards. Dynamic obstacles (units) live in the reservation manager,
//! never here, so planning stays independent of the crowd state.

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::math::{Fixed, Vec2Fixed};

/// Cell types for the navigation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellType {
    /// Walkable terrain.
    #[default]
    Walkable,
    /// Impassable terrain.
    Blocked,
}

impl CellType {
    /// Returns true if this cell is walkable.
    #[must_use]
    pub const fn is_walkable(self) -> bool {
        matches!(self, Self::Walkable)
    }
}

/// A grid cell coordinate: `x` is the column, `y` is the row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Cell {
    /// Column index.
    pub x: u32,
    /// Row index.
    pub y: u32,
}

impl Cell {
    /// Create a new cell coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Pack into a single sortable key (row-major). Used for deterministic
    /// tie-breaking in the pathfinding frontier.
    #[must_use]
    pub const fn key(self) -> u64 {
        ((self.y as u64) << 32) | (self.x as u64)
    }

    /// Offset by a signed delta, returning `None` on underflow.
    #[must_use]
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        let x = i64::from(self.x) + i64::from(dx);
        let y = i64::from(self.y) + i64::from(dy);
        if x < 0 || y < 0 {
            None
        } else {
            Some(Self::new(x as u32, y as u32))
        }
    }

    /// True if the other cell differs in both column and row.
    #[must_use]
    pub const fn is_diagonal_to(self, other: Self) -> bool {
        self.x != other.x && self.y != other.y
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Neighbor connectivity for movement and planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connectivity {
    /// Cardinal moves only.
    Four,
    /// Cardinal and diagonal moves.
    #[default]
    Eight,
}

/// Direction offsets for 8-directional movement. The cardinal directions
/// come first so [`Connectivity::Four`] can take a prefix slice.
pub const DIRECTIONS: [(i32, i32); 8] = [
    (1, 0),   // East
    (0, 1),   // South
    (-1, 0),  // West
    (0, -1),  // North
    (1, 1),   // Southeast
    (-1, 1),  // Southwest
    (-1, -1), // Northwest
    (1, -1),  // Northeast
];

impl Connectivity {
    /// The direction offsets available under this connectivity.
    #[must_use]
    pub fn offsets(self) -> &'static [(i32, i32)] {
        match self {
            Self::Four => &DIRECTIONS[..4],
            Self::Eight => &DIRECTIONS[..],
        }
    }
}

/// Static navigation grid for the current mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    /// Grid width in cells.
    width: u32,
    /// Grid height in cells.
    height: u32,
    /// Cell data stored in row-major order.
    cells: Vec<CellType>,
    /// Size of each cell in world units.
    #[serde(with = "crate::math::fixed_serde")]
    cell_size: Fixed,
    /// Neighbor connectivity for this map.
    connectivity: Connectivity,
}

impl Grid {
    /// Create a new grid with all cells walkable.
    ///
    /// # Panics
    ///
    /// Panics if `width` or `height` is zero, or if `cell_size` is not
    /// positive.
    #[must_use]
    pub fn new(width: u32, height: u32, cell_size: Fixed, connectivity: Connectivity) -> Self {
        assert!(width > 0, "Grid width must be positive");
        assert!(height > 0, "Grid height must be positive");
        assert!(cell_size > Fixed::ZERO, "Grid cell_size must be positive");

        let cell_count = (width as usize) * (height as usize);
        Self {
            width,
            height,
            cells: vec![CellType::Walkable; cell_count],
            cell_size,
            connectivity,
        }
    }

    /// Build a grid from a per-row walkability description, the in-memory
    /// map contract handed over by the mission loader.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::MapLoad`] if the description is empty or the
    /// rows have inconsistent lengths.
    pub fn from_walkable_rows(
        rows: &[Vec<bool>],
        cell_size: Fixed,
        connectivity: Connectivity,
    ) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 || height == 0 {
            return Err(NavError::MapLoad("empty map description".into()));
        }
        if rows.iter().any(|row| row.len() != width) {
            return Err(NavError::MapLoad(format!(
                "ragged map description: expected {width} cells per row"
            )));
        }

        let mut grid = Self::new(width as u32, height as u32, cell_size, connectivity);
        for (y, row) in rows.iter().enumerate() {
            for (x, &walkable) in row.iter().enumerate() {
                if !walkable {
                    grid.set_cell(Cell::new(x as u32, y as u32), CellType::Blocked);
                }
            }
        }
        Ok(grid)
    }

    /// Grid width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Cell size in world units.
    #[must_use]
    pub const fn cell_size(&self) -> Fixed {
        self.cell_size
    }

    /// Neighbor connectivity for this map.
    #[must_use]
    pub const fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    #[inline]
    fn index(&self, cell: Cell) -> usize {
        (cell.y as usize) * (self.width as usize) + (cell.x as usize)
    }

    /// Check if a cell is within grid bounds.
    #[must_use]
    pub const fn in_bounds(&self, cell: Cell) -> bool {
        cell.x < self.width && cell.y < self.height
    }

    /// Get cell type. Returns `None` if out of bounds.
    #[must_use]
    pub fn get_cell(&self, cell: Cell) -> Option<CellType> {
        if self.in_bounds(cell) {
            Some(self.cells[self.index(cell)])
        } else {
            None
        }
    }

    /// Set cell type. Returns `false` if out of bounds.
    ///
    /// Only the mission loader mutates the grid; once the simulation is
    /// running the grid is read-only.
    pub fn set_cell(&mut self, cell: Cell, cell_type: CellType) -> bool {
        if self.in_bounds(cell) {
            let index = self.index(cell);
            self.cells[index] = cell_type;
            true
        } else {
            false
        }
    }

    /// Check if a cell is walkable (in bounds and not blocked).
    #[must_use]
    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.get_cell(cell).is_some_and(CellType::is_walkable)
    }

    /// Convert a world position to the containing cell.
    ///
    /// Returns `None` if the position is outside the map area.
    #[must_use]
    pub fn world_to_cell(&self, pos: Vec2Fixed) -> Option<Cell> {
        if pos.x < Fixed::ZERO || pos.y < Fixed::ZERO {
            return None;
        }

        let x = (pos.x / self.cell_size).to_num::<i64>();
        let y = (pos.y / self.cell_size).to_num::<i64>();

        if x >= 0 && x < i64::from(self.width) && y >= 0 && y < i64::from(self.height) {
            Some(Cell::new(x as u32, y as u32))
        } else {
            None
        }
    }

    /// Convert a cell to its center position in world space.
    #[must_use]
    pub fn cell_to_world(&self, cell: Cell) -> Vec2Fixed {
        let half = self.cell_size / Fixed::from_num(2);
        Vec2Fixed::new(
            Fixed::from_num(cell.x) * self.cell_size + half,
            Fixed::from_num(cell.y) * self.cell_size + half,
        )
    }

    /// Check that a diagonal step does not cut the corner of a blocked
    /// cell: both orthogonally-adjacent cells must be walkable.
    #[must_use]
    pub fn is_diagonal_valid(&self, from: Cell, dx: i32, dy: i32) -> bool {
        if dx != 0 && dy != 0 {
            let adj1 = from.offset(dx, 0).is_some_and(|c| self.is_walkable(c));
            let adj2 = from.offset(0, dy).is_some_and(|c| self.is_walkable(c));
            adj1 && adj2
        } else {
            true
        }
    }

    /// Walkable neighbors of a cell, honoring the map connectivity and the
    /// corner-cutting rule. Order is the fixed [`DIRECTIONS`] order for
    /// deterministic expansion.
    #[must_use]
    pub fn neighbors(&self, cell: Cell) -> Vec<Cell> {
        let mut result = Vec::with_capacity(8);
        for &(dx, dy) in self.connectivity.offsets() {
            let Some(neighbor) = cell.offset(dx, dy) else {
                continue;
            };
            if !self.in_bounds(neighbor) || !self.is_walkable(neighbor) {
                continue;
            }
            if !self.is_diagonal_valid(cell, dx, dy) {
                continue;
            }
            result.push(neighbor);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    fn vec2(x: i32, y: i32) -> Vec2Fixed {
        Vec2Fixed::new(fixed(x), fixed(y))
    }

    #[test]
    fn test_grid_creation() {
        let grid = Grid::new(10, 10, fixed(1), Connectivity::Eight);
        assert_eq!(grid.width(), 10);
        assert_eq!(grid.height(), 10);
        assert_eq!(grid.cell_size(), fixed(1));
    }

    #[test]
    fn test_world_to_cell_conversion() {
        let grid = Grid::new(10, 10, fixed(2), Connectivity::Eight);

        assert_eq!(grid.world_to_cell(vec2(1, 1)), Some(Cell::new(0, 0)));
        assert_eq!(grid.world_to_cell(vec2(3, 3)), Some(Cell::new(1, 1)));
        assert_eq!(grid.world_to_cell(vec2(19, 19)), Some(Cell::new(9, 9)));

        // Outside the map area
        assert_eq!(grid.world_to_cell(vec2(20, 20)), None);
        assert_eq!(grid.world_to_cell(vec2(-1, 0)), None);
    }

    #[test]
    fn test_cell_to_world_conversion() {
        let grid = Grid::new(10, 10, fixed(2), Connectivity::Eight);

        let pos = grid.cell_to_world(Cell::new(0, 0));
        assert_eq!(pos, vec2(1, 1));

        let pos = grid.cell_to_world(Cell::new(1, 1));
        assert_eq!(pos, vec2(3, 3));
    }

    #[test]
    fn test_round_trip_cell_center() {
        let grid = Grid::new(8, 8, fixed(3), Connectivity::Eight);
        for y in 0..8 {
            for x in 0..8 {
                let cell = Cell::new(x, y);
                assert_eq!(grid.world_to_cell(grid.cell_to_world(cell)), Some(cell));
            }
        }
    }

    #[test]
    fn test_set_and_get_cell() {
        let mut grid = Grid::new(5, 5, fixed(1), Connectivity::Eight);

        let cell = Cell::new(2, 2);
        assert!(grid.is_walkable(cell));

        grid.set_cell(cell, CellType::Blocked);
        assert!(!grid.is_walkable(cell));
        assert!(!grid.set_cell(Cell::new(9, 9), CellType::Blocked));
    }

    #[test]
    fn test_neighbors_open_interior() {
        let grid = Grid::new(5, 5, fixed(1), Connectivity::Eight);
        assert_eq!(grid.neighbors(Cell::new(2, 2)).len(), 8);

        let grid4 = Grid::new(5, 5, fixed(1), Connectivity::Four);
        assert_eq!(grid4.neighbors(Cell::new(2, 2)).len(), 4);
    }

    #[test]
    fn test_neighbors_at_corner() {
        let grid = Grid::new(5, 5, fixed(1), Connectivity::Eight);
        // Top-left corner: E, S, SE
        assert_eq!(grid.neighbors(Cell::new(0, 0)).len(), 3);
    }

    #[test]
    fn test_no_corner_cutting() {
        let mut grid = Grid::new(3, 3, fixed(1), Connectivity::Eight);
        // Block the two cells orthogonally adjacent to the (0,0)->(1,1) step
        grid.set_cell(Cell::new(1, 0), CellType::Blocked);
        grid.set_cell(Cell::new(0, 1), CellType::Blocked);

        let neighbors = grid.neighbors(Cell::new(0, 0));
        assert!(
            !neighbors.contains(&Cell::new(1, 1)),
            "diagonal through blocked corner must be disallowed"
        );
    }

    #[test]
    fn test_diagonal_forbidden_with_one_side_blocked() {
        let mut grid = Grid::new(3, 3, fixed(1), Connectivity::Eight);
        // One orthogonal side blocked is already enough to forbid the step
        grid.set_cell(Cell::new(1, 0), CellType::Blocked);

        let neighbors = grid.neighbors(Cell::new(0, 0));
        assert!(!neighbors.contains(&Cell::new(1, 1)));
        // The cardinal step south is unaffected
        assert!(neighbors.contains(&Cell::new(0, 1)));
    }

    #[test]
    fn test_from_walkable_rows() {
        let rows = vec![
            vec![true, true, false],
            vec![true, false, true],
        ];
        let grid = Grid::from_walkable_rows(&rows, fixed(1), Connectivity::Eight).unwrap();
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert!(grid.is_walkable(Cell::new(0, 0)));
        assert!(!grid.is_walkable(Cell::new(2, 0)));
        assert!(!grid.is_walkable(Cell::new(1, 1)));
    }

    #[test]
    fn test_from_walkable_rows_rejects_bad_input() {
        assert!(Grid::from_walkable_rows(&[], fixed(1), Connectivity::Eight).is_err());

        let ragged = vec![vec![true, true], vec![true]];
        assert!(Grid::from_walkable_rows(&ragged, fixed(1), Connectivity::Eight).is_err());
    }
}
