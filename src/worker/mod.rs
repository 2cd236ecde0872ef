//! Worker
//!
//! Pulls batches of scan points from the coordinator, evaluates them and
//! pushes the results back, sizing each batch with a throughput estimator.
//! Every request runs on a fresh connection; lost work is recovered by the
//! coordinator re-dispatching it, never by the worker replaying a batch.

pub mod client;
pub mod estimator;
pub mod evaluator;

pub use client::CoordinatorClient;
pub use estimator::{ThroughputEstimator, MAX_BATCH};
pub use evaluator::{evaluate_all, CommandEvaluator, Evaluator};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::{Assignment, Completion, ScanPoint};
use crate::error::Result;

/// Where the worker is in its fetch/compute/push cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Fetching,
    Computing,
    Pushing,
    Done,
}

/// Result of asking the coordinator for work
#[derive(Debug)]
pub enum FetchOutcome {
    Batch(Vec<Assignment>),
    /// The coordinator answered with zero scan points
    NoMoreWork,
}

/// Totals reported when a worker runs out of work
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub worker_id: Uuid,
    pub batches: u64,
    pub points: u64,
    pub elapsed: Duration,
}

impl std::fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "worker {}: {} points in {} batches, {:.3}s",
            self.worker_id,
            self.points,
            self.batches,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Replace the local evaluator section with the coordinator's, when enabled.
pub async fn bootstrap_config(mut config: AppConfig) -> Result<AppConfig> {
    if !config.worker.fetch_config {
        return Ok(config);
    }

    let client = CoordinatorClient::new(config.workload_id.clone(), &config.worker);
    let remote = client.fetch_config().await?;
    info!(
        "Using evaluator {:?} from coordinator at {}",
        remote.evaluator.command,
        client.addr()
    );
    config.evaluator = remote.evaluator;
    Ok(config)
}

pub struct Worker {
    id: Uuid,
    client: CoordinatorClient,
    evaluator: Arc<dyn Evaluator>,
    estimator: ThroughputEstimator,
    state: WorkerState,
}

impl Worker {
    pub fn new(config: &AppConfig, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client: CoordinatorClient::new(config.workload_id.clone(), &config.worker),
            evaluator,
            estimator: ThroughputEstimator::new(
                config.worker.nominal_busy_time(),
                config.worker.default_batch_size,
            ),
            state: WorkerState::Fetching,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Ask for the next batch.
    pub async fn fetch(&mut self, requested: usize) -> Result<FetchOutcome> {
        self.state = WorkerState::Fetching;
        let batch = self.client.get_scan_points(requested).await?;
        if batch.is_empty() {
            Ok(FetchOutcome::NoMoreWork)
        } else {
            Ok(FetchOutcome::Batch(batch))
        }
    }

    /// Evaluate every point of a batch, in order.
    pub async fn compute(&mut self, batch: Vec<Assignment>) -> Result<Vec<Completion>> {
        self.state = WorkerState::Computing;
        let (seqs, points): (Vec<_>, Vec<ScanPoint>) =
            batch.into_iter().map(|a| (a.seq, a.point)).unzip();
        let results = evaluate_all(self.evaluator.as_ref(), &points).await?;
        Ok(seqs
            .into_iter()
            .zip(results)
            .map(|(seq, result)| Completion::new(seq, result))
            .collect())
    }

    pub async fn push(&mut self, completions: &[Completion]) -> Result<()> {
        self.state = WorkerState::Pushing;
        self.client.put_scan_points(completions).await
    }

    /// Cycle until the coordinator runs dry. Any `Err` is fatal.
    pub async fn run(mut self) -> Result<WorkerSummary> {
        info!(worker = %self.id, "Worker starting against {}", self.client.addr());
        let started = Instant::now();
        let mut summary = WorkerSummary {
            worker_id: self.id,
            batches: 0,
            points: 0,
            elapsed: Duration::ZERO,
        };
        let mut batch_size = self.estimator.next_batch_size(0);

        loop {
            let fetch_started = Instant::now();
            let batch = match self.fetch(batch_size).await? {
                FetchOutcome::Batch(batch) => batch,
                FetchOutcome::NoMoreWork => break,
            };
            let fetch_time = fetch_started.elapsed();
            let count = batch.len();
            debug!(worker = %self.id, "Fetched {} of {} scan points", count, batch_size);

            let compute_started = Instant::now();
            let completions = self.compute(batch).await?;
            let compute_time = compute_started.elapsed();

            let push_started = Instant::now();
            self.push(&completions).await?;
            let push_time = push_started.elapsed();

            self.estimator.record(compute_time, fetch_time + push_time);
            batch_size = self.estimator.next_batch_size(count);
            summary.batches += 1;
            summary.points += count as u64;

            info!(
                worker = %self.id,
                "Pushed {} points, brutto {:.2} points/s, netto {:.2} points/s, next batch {}",
                count,
                self.estimator.brutto_speed(count).unwrap_or(0.0),
                self.estimator.netto_speed(count).unwrap_or(0.0),
                batch_size
            );
        }

        self.state = WorkerState::Done;
        summary.elapsed = started.elapsed();
        info!("No more work; {}", summary);
        Ok(summary)
    }
}
