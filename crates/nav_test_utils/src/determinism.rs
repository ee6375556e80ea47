//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the movement core produces
//! identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Lockstep multiplayer requires the movement core to be 100%
//! deterministic. Sources of non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`nav_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Units always advance in sorted id order and proximity queries sort
//!   their results.
//!
//! - **System randomness**: The core never consults a clock or RNG.

use std::thread;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic core).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the runs matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Movement core is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Simplified determinism verification for [`MovementSim`].
///
/// Runs the simulation twice with identical setup and verifies the final
/// state hashes match exactly.
///
/// [`MovementSim`]: nav_core::simulation::MovementSim
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> nav_core::simulation::MovementSim,
{
    let result = verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |sim| {
            sim.tick();
        },
        nav_core::simulation::MovementSim::state_hash,
    );
    result.is_deterministic
}

/// Run N simulations on separate threads and verify the final hashes
/// match. Catches non-determinism that only manifests under thread
/// scheduling and memory layout variations.
///
/// # Panics
///
/// Panics if a worker thread panics, or if the runs diverged.
pub fn verify_parallel_determinism<F>(setup_fn: F, num_sims: usize, num_ticks: u64)
where
    F: Fn() -> nav_core::simulation::MovementSim + Sync,
{
    let hashes: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    for _ in 0..num_ticks {
                        sim.tick();
                    }
                    sim.state_hash()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("simulation thread"))
            .collect()
    });

    let result = DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        ticks: num_ticks,
    };
    result.assert_deterministic();
}

/// Proptest strategies for movement testing.
///
/// These strategies generate random but reproducible grids and orders
/// for property-based testing of pathfinding and determinism.
pub mod strategies {
    use nav_core::grid::{Cell, CellType, Connectivity, Grid};
    use nav_core::math::Fixed;
    use proptest::prelude::*;

    /// Generate a grid connectivity mode.
    pub fn arb_connectivity() -> impl Strategy<Value = Connectivity> {
        prop_oneof![Just(Connectivity::Four), Just(Connectivity::Eight)]
    }

    /// Generate a small grid with random walls.
    ///
    /// Dimensions range 2..=12 per axis; each cell is blocked with the
    /// given probability (0..=100, percent).
    pub fn arb_grid(block_percent: u32) -> impl Strategy<Value = Grid> {
        (2u32..=12, 2u32..=12, arb_connectivity())
            .prop_flat_map(move |(width, height, connectivity)| {
                let cells = (width * height) as usize;
                proptest::collection::vec(0u32..100, cells).prop_map(move |rolls| {
                    let mut grid = Grid::new(width, height, Fixed::from_num(1), connectivity);
                    for (index, roll) in rolls.iter().enumerate() {
                        if *roll < block_percent {
                            let index = u32::try_from(index).expect("small grid");
                            let cell = Cell::new(index % width, index / width);
                            grid.set_cell(cell, CellType::Blocked);
                        }
                    }
                    grid
                })
            })
    }

    /// Generate an in-bounds cell for a grid of the given dimensions.
    pub fn arb_cell(width: u32, height: u32) -> impl Strategy<Value = Cell> {
        (0..width, 0..height).prop_map(|(x, y)| Cell::new(x, y))
    }
}
