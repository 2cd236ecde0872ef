//! Coordinator run state and summary

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::ledger::LedgerStats;

/// Lifecycle of a coordinator run, published by the dispatch actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    /// Source exhausted and every dispatched point persisted
    Finished,
    /// Persisting results failed; the run cannot continue
    Failed(String),
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Aggregate figures reported when the coordinator exits
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub stats: LedgerStats,
    /// Results received but stuck behind a gap when the run ended
    pub unflushed: usize,
}

impl RunSummary {
    /// Persisted points per wall-clock second
    pub fn points_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stats.persisted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} points in {:.3}s ({:.2} points/s), {} dispatched, {} reassigned, {} duplicates discarded",
            self.stats.persisted,
            self.elapsed.as_secs_f64(),
            self.points_per_second(),
            self.stats.dispatched,
            self.stats.reassigned,
            self.stats.discarded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_per_second() {
        let now = Utc::now();
        let summary = RunSummary {
            outcome: RunOutcome::Completed,
            started_at: now,
            finished_at: now,
            elapsed: Duration::from_secs(4),
            stats: LedgerStats {
                persisted: 1000,
                ..LedgerStats::default()
            },
            unflushed: 0,
        };
        assert_eq!(summary.points_per_second(), 250.0);
        assert!(summary.to_string().starts_with("1000 points in 4.000s (250.00 points/s)"));
    }

    #[test]
    fn test_zero_elapsed_does_not_divide() {
        let now = Utc::now();
        let summary = RunSummary {
            outcome: RunOutcome::Interrupted,
            started_at: now,
            finished_at: now,
            elapsed: Duration::ZERO,
            stats: LedgerStats::default(),
            unflushed: 3,
        };
        assert_eq!(summary.points_per_second(), 0.0);
        assert!(!summary.is_complete());
    }
}
