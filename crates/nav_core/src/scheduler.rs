//! Frame-budgeted scheduling of path requests.
//!
//! Ordering a large group of units to move would otherwise trigger dozens
//! of A* searches in a single tick. The scheduler queues requests FIFO and
//! releases a bounded number of computations per frame, with a separate
//! expansion budget so one oversized search resumes next frame instead of
//! finishing in a burst.
//!
//! A unit has at most one live request: a new submission supersedes and
//! cancels the old one, and the superseded result is never delivered.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grid::Cell;
use crate::pathfinding::{PathResult, PathSearch, PathfindingEngine, SearchStep};
use crate::unit::UnitId;

/// Default number of requests serviced per frame.
pub const DEFAULT_REQUESTS_PER_FRAME: u32 = 8;

/// Default A* expansion budget per frame, shared by all searches run in
/// that frame.
pub const DEFAULT_EXPANSIONS_PER_FRAME: u32 = 4096;

/// Identifier of a queued path request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// A request waiting in the queue.
#[derive(Debug, Clone)]
struct PendingRequest {
    id: RequestId,
    unit: UnitId,
    start: Cell,
    goal: Cell,
}

/// A serviced request ready for delivery at the frame boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// The request this result answers.
    pub request_id: RequestId,
    /// The unit that asked for the path.
    pub unit: UnitId,
    /// Path or unreachable status.
    pub result: PathResult,
}

/// FIFO path-request queue bound to one [`PathfindingEngine`].
#[derive(Debug)]
pub struct PathRequestScheduler {
    queue: VecDeque<PendingRequest>,
    /// Search carried over from a previous frame, still at the queue head.
    in_progress: Option<(RequestId, UnitId, PathSearch)>,
    completed: Vec<CompletedRequest>,
    next_id: u64,
    requests_per_frame: u32,
    expansions_per_frame: u32,
}

impl Default for PathRequestScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_FRAME, DEFAULT_EXPANSIONS_PER_FRAME)
    }
}

impl PathRequestScheduler {
    /// Create a scheduler with explicit per-frame budgets.
    ///
    /// # Panics
    ///
    /// Panics if either budget is zero.
    #[must_use]
    pub fn new(requests_per_frame: u32, expansions_per_frame: u32) -> Self {
        assert!(requests_per_frame > 0, "request budget must be positive");
        assert!(expansions_per_frame > 0, "expansion budget must be positive");
        Self {
            queue: VecDeque::new(),
            in_progress: None,
            completed: Vec::new(),
            next_id: 1,
            requests_per_frame,
            expansions_per_frame,
        }
    }

    /// Number of requests not yet serviced (queued + in progress).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.in_progress.is_some())
    }

    /// True if the unit has a queued or in-progress request.
    #[must_use]
    pub fn has_request_for(&self, unit: UnitId) -> bool {
        self.queue.iter().any(|request| request.unit == unit)
            || self
                .in_progress
                .as_ref()
                .is_some_and(|(_, owner, _)| *owner == unit)
    }

    /// Enqueue a path request for a unit, superseding any live request the
    /// unit already has.
    ///
    /// # Errors
    ///
    /// Returns [`NavError::CellOutOfBounds`] when an endpoint lies outside
    /// the grid; the request is dropped.
    ///
    /// [`NavError::CellOutOfBounds`]: crate::error::NavError::CellOutOfBounds
    pub fn submit(
        &mut self,
        engine: &PathfindingEngine,
        unit: UnitId,
        start: Cell,
        goal: Cell,
    ) -> Result<RequestId> {
        // Validate endpoints up front so a bad request never occupies
        // queue space. Building the search is cheap; it only seeds the
        // frontier.
        let _ = PathSearch::new(engine.grid(), start, goal)?;

        self.cancel_for_unit(unit);

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.queue.push_back(PendingRequest {
            id,
            unit,
            start,
            goal,
        });
        tracing::debug!(%id, %unit, %start, %goal, "path request queued");
        Ok(id)
    }

    /// Cancel a request by id. Safe mid-search: in-progress frontier state
    /// is simply discarded. Undelivered results are scrubbed too, so a
    /// cancelled request's path is never observed.
    pub fn cancel(&mut self, request_id: RequestId) {
        self.queue.retain(|request| request.id != request_id);
        if self
            .in_progress
            .as_ref()
            .is_some_and(|(id, _, _)| *id == request_id)
        {
            self.in_progress = None;
        }
        self.completed
            .retain(|completed| completed.request_id != request_id);
    }

    /// Cancel every live request owned by a unit (unit destroyed, or a
    /// newer order supersedes the old one).
    pub fn cancel_for_unit(&mut self, unit: UnitId) {
        self.queue.retain(|request| request.unit != unit);
        if self
            .in_progress
            .as_ref()
            .is_some_and(|(_, owner, _)| *owner == unit)
        {
            self.in_progress = None;
        }
        self.completed.retain(|completed| completed.unit != unit);
    }

    /// Service the queue for one frame: at most `requests_per_frame`
    /// completions and `expansions_per_frame` A* expansions. An unfinished
    /// search keeps its place at the queue head and resumes next frame.
    pub fn run_frame(&mut self, engine: &PathfindingEngine) {
        let mut request_budget = self.requests_per_frame;
        let mut expansion_budget = self.expansions_per_frame;

        while request_budget > 0 && expansion_budget > 0 {
            let (id, unit, mut search) = match self.in_progress.take() {
                Some(carried) => carried,
                None => {
                    let Some(request) = self.queue.pop_front() else {
                        return;
                    };
                    // Endpoints were validated at submit time against the
                    // same engine, so this cannot fail.
                    let Ok(search) = engine.search(request.start, request.goal) else {
                        continue;
                    };
                    (request.id, request.unit, search)
                }
            };

            let before = search.expansions();
            let outcome = search.step(engine.grid(), expansion_budget);
            let spent = (search.expansions() - before) as u32;
            expansion_budget = expansion_budget.saturating_sub(spent);

            match outcome {
                SearchStep::InProgress => {
                    // Out of expansion budget; park the search for the
                    // next frame.
                    self.in_progress = Some((id, unit, search));
                    return;
                }
                SearchStep::Found(path) => {
                    tracing::debug!(%id, %unit, cost = path.cost, "path found");
                    self.completed.push(CompletedRequest {
                        request_id: id,
                        unit,
                        result: PathResult::Found(path),
                    });
                }
                SearchStep::Unreachable => {
                    tracing::debug!(%id, %unit, "goal unreachable");
                    self.completed.push(CompletedRequest {
                        request_id: id,
                        unit,
                        result: PathResult::Unreachable,
                    });
                }
            }
            request_budget -= 1;
        }
    }

    /// Drain results serviced so far. Called once per frame boundary by
    /// the simulation driver.
    pub fn poll_completed(&mut self) -> Vec<CompletedRequest> {
        std::mem::take(&mut self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellType, Connectivity, Grid};
    use crate::math::Fixed;

    fn engine(size: u32) -> PathfindingEngine {
        PathfindingEngine::new(Grid::new(
            size,
            size,
            Fixed::from_num(1),
            Connectivity::Eight,
        ))
    }

    #[test]
    fn test_budget_spreads_requests_over_frames() {
        let engine = engine(12);
        let mut scheduler = PathRequestScheduler::new(2, 100_000);

        for i in 0..5u64 {
            scheduler
                .submit(&engine, UnitId(i), Cell::new(0, 0), Cell::new(9, 9))
                .unwrap();
        }

        // 5 requests at K = 2: ceil(5/2) = 3 frames
        let mut frames = 0;
        let mut delivered = 0;
        while delivered < 5 {
            scheduler.run_frame(&engine);
            frames += 1;
            delivered += scheduler.poll_completed().len();
            assert!(frames <= 3, "budget overrun: {frames} frames");
        }
        assert_eq!(frames, 3);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let engine = engine(12);
        let mut scheduler = PathRequestScheduler::new(10, 100_000);

        let first = scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(5, 5))
            .unwrap();
        let second = scheduler
            .submit(&engine, UnitId(2), Cell::new(1, 1), Cell::new(6, 6))
            .unwrap();

        scheduler.run_frame(&engine);
        let completed = scheduler.poll_completed();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].request_id, first);
        assert_eq!(completed[1].request_id, second);
    }

    #[test]
    fn test_resubmit_supersedes_previous_request() {
        let engine = engine(12);
        let mut scheduler = PathRequestScheduler::default();

        let first = scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(9, 9))
            .unwrap();
        let second = scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(3, 3))
            .unwrap();
        assert_ne!(first, second);

        scheduler.run_frame(&engine);
        let completed = scheduler.poll_completed();
        // Only the second request's result is ever delivered
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].request_id, second);
    }

    #[test]
    fn test_cancel_pending_and_in_progress() {
        let engine = engine(32);
        // Tiny expansion budget forces the search to span frames
        let mut scheduler = PathRequestScheduler::new(1, 4);

        let id = scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(31, 31))
            .unwrap();
        scheduler.run_frame(&engine);
        assert_eq!(scheduler.pending(), 1, "search should be parked mid-way");

        scheduler.cancel(id);
        assert_eq!(scheduler.pending(), 0);
        scheduler.run_frame(&engine);
        assert!(scheduler.poll_completed().is_empty());
    }

    #[test]
    fn test_expansion_budget_resumes_across_frames() {
        let engine = engine(16);
        let mut scheduler = PathRequestScheduler::new(8, 4);

        scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(15, 15))
            .unwrap();

        let mut frames = 0;
        let completed = loop {
            scheduler.run_frame(&engine);
            frames += 1;
            let completed = scheduler.poll_completed();
            if !completed.is_empty() {
                break completed;
            }
            assert!(frames < 100, "search never finished");
        };
        assert!(frames > 1, "budget was supposed to split the search");
        assert!(matches!(completed[0].result, PathResult::Found(_)));
    }

    #[test]
    fn test_out_of_bounds_submit_is_dropped() {
        let engine = engine(8);
        let mut scheduler = PathRequestScheduler::default();
        let result = scheduler.submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(8, 0));
        assert!(result.is_err());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_unreachable_goal_is_a_delivered_status() {
        let mut grid = Grid::new(8, 8, Fixed::from_num(1), Connectivity::Eight);
        grid.set_cell(Cell::new(4, 4), CellType::Blocked);
        let engine = PathfindingEngine::new(grid);
        let mut scheduler = PathRequestScheduler::default();

        scheduler
            .submit(&engine, UnitId(1), Cell::new(0, 0), Cell::new(4, 4))
            .unwrap();
        scheduler.run_frame(&engine);
        let completed = scheduler.poll_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].result, PathResult::Unreachable);
    }
}
