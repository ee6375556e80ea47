//! Grid-based pathfinding using the A* algorithm.
//!
//! One [`PathfindingEngine`] exists per loaded map; its lifecycle is
//! map load → map teardown, and every caller that needs paths borrows it.
//! Searches are resumable: the scheduler can spread one expensive search
//! across several frames instead of stalling a tick.
//!
//! All path costs are exact integers (10 per cardinal step, 14 per
//! diagonal step) so cost comparisons never accumulate rounding error.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::grid::{Cell, Connectivity, Grid};

/// Cost of a cardinal step.
pub const CARDINAL_COST: u32 = 10;

/// Cost of a diagonal step (integer approximation of 10·√2).
pub const DIAGONAL_COST: u32 = 14;

/// A computed path: ordered cells from start to goal inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Waypoints, start first, goal last.
    pub cells: Vec<Cell>,
    /// Total cost in step units.
    pub cost: u32,
}

impl Path {
    /// Number of steps (edges) in the path.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.cells.len().saturating_sub(1)
    }
}

/// Outcome of a path search. `Unreachable` is a normal result, not an
/// error: the caller decides the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathResult {
    /// A shortest walkable path was found.
    Found(Path),
    /// The goal cannot be connected to the start; the frontier exhausted
    /// without reaching it.
    Unreachable,
}

/// Cost of moving between two adjacent cells.
#[inline]
#[must_use]
pub fn step_cost(from: Cell, to: Cell) -> u32 {
    if from.is_diagonal_to(to) {
        DIAGONAL_COST
    } else {
        CARDINAL_COST
    }
}

/// Admissible distance estimate to the goal in step units.
///
/// Octile distance under eight-way movement, Manhattan under four-way.
/// Neither ever overestimates the true remaining cost for its
/// connectivity, which A* requires for optimality.
#[inline]
#[must_use]
pub fn heuristic(from: Cell, to: Cell, connectivity: Connectivity) -> u32 {
    let dx = from.x.abs_diff(to.x);
    let dy = from.y.abs_diff(to.y);
    match connectivity {
        Connectivity::Four => CARDINAL_COST * (dx + dy),
        Connectivity::Eight => {
            let (min, max) = if dx < dy { (dx, dy) } else { (dy, dx) };
            DIAGONAL_COST * min + CARDINAL_COST * (max - min)
        }
    }
}

/// A node in the open-set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct FrontierNode {
    cell: Cell,
    /// f = g + h.
    f: u32,
    /// Kept alongside f: among equal f, lower h is expanded first, which
    /// favors nodes closer to the goal and cuts expansion counts.
    h: u32,
}

impl Ord for FrontierNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse for min-heap behavior.
        match other.f.cmp(&self.f) {
            Ordering::Equal => match other.h.cmp(&self.h) {
                // Final deterministic tie-break on the packed cell key.
                Ordering::Equal => other.cell.key().cmp(&self.cell.key()),
                ord => ord,
            },
            ord => ord,
        }
    }
}

impl PartialOrd for FrontierNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue over frontier nodes with a companion membership set.
///
/// The set gives O(1) "is this cell already a pending candidate" answers
/// instead of an O(n) heap scan. This is a performance contract, not an
/// implementation detail: frontier membership is tested once per examined
/// neighbor, every expansion.
#[derive(Debug, Default)]
struct Frontier {
    heap: BinaryHeap<FrontierNode>,
    open: HashSet<Cell>,
}

impl Frontier {
    fn push(&mut self, node: FrontierNode) {
        self.open.insert(node.cell);
        self.heap.push(node);
    }

    /// Pop the best node. Stale duplicate entries (superseded by a cheaper
    /// re-push) are filtered by the caller via its closed set.
    fn pop(&mut self) -> Option<FrontierNode> {
        let node = self.heap.pop()?;
        self.open.remove(&node.cell);
        Some(node)
    }

    #[inline]
    fn contains(&self, cell: Cell) -> bool {
        self.open.contains(&cell)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Progress report from [`PathSearch::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStep {
    /// Budget exhausted before the search finished; call `step` again.
    InProgress,
    /// Search finished with a path.
    Found(Path),
    /// Search finished; the goal is not reachable.
    Unreachable,
}

/// An in-flight A* search, resumable across frame boundaries.
///
/// The grid is borrowed per [`step`](Self::step) call so the search state
/// can be parked inside the scheduler between frames.
#[derive(Debug)]
pub struct PathSearch {
    start: Cell,
    goal: Cell,
    frontier: Frontier,
    came_from: HashMap<Cell, Cell>,
    g_score: HashMap<Cell, u32>,
    closed: HashSet<Cell>,
    expansions: u64,
    /// Set when start or goal is unwalkable; the first step reports
    /// Unreachable without expanding anything.
    hopeless: bool,
}

impl PathSearch {
    /// Begin a search between two cells.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::CellOutOfBounds`] if either endpoint is outside
    /// the grid. A blocked endpoint is not an error; the search reports
    /// [`SearchStep::Unreachable`].
    pub fn new(grid: &Grid, start: Cell, goal: Cell) -> Result<Self> {
        for cell in [start, goal] {
            if !grid.in_bounds(cell) {
                return Err(NavError::CellOutOfBounds {
                    x: cell.x,
                    y: cell.y,
                });
            }
        }

        let hopeless = !grid.is_walkable(start) || !grid.is_walkable(goal);
        let mut search = Self {
            start,
            goal,
            frontier: Frontier::default(),
            came_from: HashMap::new(),
            g_score: HashMap::new(),
            closed: HashSet::new(),
            expansions: 0,
            hopeless,
        };

        if !hopeless {
            let h = heuristic(start, goal, grid.connectivity());
            search.g_score.insert(start, 0);
            search.frontier.push(FrontierNode {
                cell: start,
                f: h,
                h,
            });
        }
        Ok(search)
    }

    /// The search's start cell.
    #[must_use]
    pub const fn start(&self) -> Cell {
        self.start
    }

    /// The search's goal cell.
    #[must_use]
    pub const fn goal(&self) -> Cell {
        self.goal
    }

    /// Nodes expanded so far.
    #[must_use]
    pub const fn expansions(&self) -> u64 {
        self.expansions
    }

    /// Expand up to `max_expansions` nodes and report progress.
    ///
    /// Planning deliberately ignores dynamic occupancy: a path may cross
    /// cells currently occupied by other units. Those conflicts are
    /// resolved at movement time by the reservation manager, so areas
    /// whose only entrance is temporarily occupied stay reachable.
    pub fn step(&mut self, grid: &Grid, max_expansions: u32) -> SearchStep {
        if self.hopeless {
            return SearchStep::Unreachable;
        }

        let connectivity = grid.connectivity();
        let mut budget = max_expansions;

        while budget > 0 {
            let Some(current) = self.frontier.pop() else {
                return SearchStep::Unreachable;
            };
            if self.closed.contains(&current.cell) {
                // Stale duplicate left behind by a cheaper re-push.
                continue;
            }
            if current.cell == self.goal {
                return SearchStep::Found(self.reconstruct());
            }

            self.closed.insert(current.cell);
            self.expansions += 1;
            budget -= 1;

            let current_g = self.g_score.get(&current.cell).copied().unwrap_or(u32::MAX);

            for neighbor in grid.neighbors(current.cell) {
                if self.closed.contains(&neighbor) {
                    continue;
                }

                let tentative_g = current_g + step_cost(current.cell, neighbor);
                let known_g = self.g_score.get(&neighbor).copied().unwrap_or(u32::MAX);

                // A frontier member keeps its entry unless this route is
                // strictly cheaper, in which case a re-push supersedes it.
                if self.frontier.contains(neighbor) && tentative_g >= known_g {
                    continue;
                }
                if tentative_g < known_g {
                    self.came_from.insert(neighbor, current.cell);
                    self.g_score.insert(neighbor, tentative_g);
                    let h = heuristic(neighbor, self.goal, connectivity);
                    self.frontier.push(FrontierNode {
                        cell: neighbor,
                        f: tentative_g + h,
                        h,
                    });
                }
            }
        }

        if self.frontier.is_empty() {
            SearchStep::Unreachable
        } else {
            SearchStep::InProgress
        }
    }

    fn reconstruct(&self) -> Path {
        let mut cells = vec![self.goal];
        let mut current = self.goal;
        while let Some(&previous) = self.came_from.get(&current) {
            cells.push(previous);
            current = previous;
        }
        cells.reverse();
        let cost = self.g_score.get(&self.goal).copied().unwrap_or(0);
        Path { cells, cost }
    }
}

/// Shared pathfinding service for the loaded map.
///
/// Explicitly constructed with the mission grid and passed by reference
/// wherever paths are needed; exactly one engine exists per loaded map.
#[derive(Debug)]
pub struct PathfindingEngine {
    grid: Grid,
}

impl PathfindingEngine {
    /// Create the engine for a freshly loaded map.
    #[must_use]
    pub fn new(grid: Grid) -> Self {
        Self { grid }
    }

    /// The mission grid this engine plans over.
    #[must_use]
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Begin a resumable search.
    pub fn search(&self, start: Cell, goal: Cell) -> Result<PathSearch> {
        PathSearch::new(&self.grid, start, goal)
    }

    /// Run a search to completion in one call.
    pub fn find_path(&self, start: Cell, goal: Cell) -> Result<PathResult> {
        let mut search = self.search(start, goal)?;
        loop {
            match search.step(&self.grid, u32::MAX) {
                SearchStep::InProgress => {}
                SearchStep::Found(path) => return Ok(PathResult::Found(path)),
                SearchStep::Unreachable => return Ok(PathResult::Unreachable),
            }
        }
    }

    /// The walkable cell closest to `cell` (itself included), used as a
    /// fallback goal when a move order targets blocked terrain.
    ///
    /// Deterministic breadth-first ring search over the adjacency graph of
    /// all in-bounds cells.
    #[must_use]
    pub fn closest_walkable(&self, cell: Cell) -> Option<Cell> {
        if self.grid.is_walkable(cell) {
            return Some(cell);
        }
        let mut visited: HashSet<Cell> = HashSet::new();
        let mut queue: VecDeque<Cell> = VecDeque::new();
        visited.insert(cell);
        queue.push_back(cell);

        while let Some(current) = queue.pop_front() {
            for &(dx, dy) in self.grid.connectivity().offsets() {
                let Some(neighbor) = current.offset(dx, dy) else {
                    continue;
                };
                if !self.grid.in_bounds(neighbor) || !visited.insert(neighbor) {
                    continue;
                }
                if self.grid.is_walkable(neighbor) {
                    return Some(neighbor);
                }
                queue.push_back(neighbor);
            }
        }
        None
    }
}
