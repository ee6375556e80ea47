//! Test fixtures and helpers.
//!
//! Pre-built grids and unit configurations for consistent testing.

use fixed::types::I32F32;
use nav_core::grid::{Cell, CellType, Connectivity, Grid};
use nav_core::simulation::{MovementSim, UnitSpawnParams};
use nav_core::unit::UnitId;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Build a grid from an ASCII sketch: `.` walkable, `#` blocked.
///
/// Rows map to increasing `y`, columns to increasing `x`, with unit
/// cell size. Whitespace-only lines are skipped so sketches can be
/// indented in test sources.
///
/// # Panics
///
/// Panics on an empty sketch, ragged rows, or an unknown character.
#[must_use]
pub fn grid_from_ascii(sketch: &str, connectivity: Connectivity) -> Grid {
    let rows: Vec<&str> = sketch
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    assert!(!rows.is_empty(), "empty grid sketch");
    let width = rows[0].chars().count();
    assert!(width > 0, "empty grid row");

    let mut grid = Grid::new(
        u32::try_from(width).expect("grid width fits u32"),
        u32::try_from(rows.len()).expect("grid height fits u32"),
        fixed(1),
        connectivity,
    );
    for (y, row) in rows.iter().enumerate() {
        assert_eq!(row.chars().count(), width, "ragged grid sketch at row {y}");
        for (x, symbol) in row.chars().enumerate() {
            let cell_type = match symbol {
                '.' => CellType::Walkable,
                '#' => CellType::Blocked,
                other => panic!("unknown grid symbol {other:?}"),
            };
            let cell = Cell::new(
                u32::try_from(x).expect("x fits u32"),
                u32::try_from(y).expect("y fits u32"),
            );
            assert!(grid.set_cell(cell, cell_type));
        }
    }
    grid
}

/// Spawn a default-statted unit at the center of a cell.
///
/// # Panics
///
/// Panics if the cell is off the map or no free cell exists near it.
pub fn spawn_unit_at(sim: &mut MovementSim, x: u32, y: u32) -> UnitId {
    let position = sim.grid().cell_to_world(Cell::new(x, y));
    sim.spawn_unit(UnitSpawnParams {
        position,
        ..UnitSpawnParams::default()
    })
    .expect("spawn fixture unit")
}
