//! Execution budget and admission gate
//!
//! The monitor answers a single question: may one more job be admitted?
//! It closes once `total - safety_margin` has elapsed since the run started.
//! Jobs admitted before that point are never interrupted.

use crate::config::EngineConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Time budget for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionBudget {
    /// When the run started
    pub started: Instant,
    /// Total time the execution environment allows
    pub total: Duration,
    /// Time reserved for in-flight transfers
    pub safety_margin: Duration,
}

impl ExecutionBudget {
    /// Budget starting now
    pub fn starting_now(total: Duration, safety_margin: Duration) -> Self {
        Self {
            started: Instant::now(),
            total,
            safety_margin,
        }
    }

    /// Budget starting now, sized from engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::starting_now(config.time_budget, config.safety_margin)
    }

    /// Length of the admission window
    pub fn admission_window(&self) -> Duration {
        self.total.saturating_sub(self.safety_margin)
    }

    /// Instant at which admission closes
    pub fn closes_at(&self) -> Instant {
        self.started + self.admission_window()
    }
}

/// Admission gate consulted by the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct DeadlineMonitor {
    budget: ExecutionBudget,
}

impl DeadlineMonitor {
    /// Create a monitor over `budget`
    pub fn new(budget: ExecutionBudget) -> Self {
        Self { budget }
    }

    /// The budget being tracked
    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    /// May the dispatcher admit one more job?
    pub fn may_admit(&self) -> bool {
        self.may_admit_at(Instant::now())
    }

    /// Admission answer at a given instant
    pub fn may_admit_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.budget.started) < self.budget.admission_window()
    }

    /// Time left before admission closes
    pub fn remaining(&self) -> Duration {
        self.budget
            .closes_at()
            .saturating_duration_since(Instant::now())
    }
}
