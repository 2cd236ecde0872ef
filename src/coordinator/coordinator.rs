//! Coordinator — owns the scan and hands it out to workers
//!
//! The Coordinator owns the scan source and the ledger through a single
//! dispatch actor. Connection tasks talk to it via `DispatchHandle`.
//! The main `run()` loop uses `tokio::select!` to:
//!   - Accept connections and spawn a task per exchange
//!   - Reap finished connection tasks
//!   - Stop once the dispatch actor reports the scan failed, or finished
//!     and the grace period for late workers has passed
//!   - Stop on an external shutdown signal

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::command::{DispatchCommand, DispatchHandle};
use super::connection::{serve_connection, ConnectionContext};
use super::dispatch::DispatchState;
use super::state::{RunOutcome, RunStatus, RunSummary};
use crate::config::AppConfig;
use crate::error::{Result, ScanError};
use crate::scan::ScanSource;
use crate::sink::ResultSink;

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// The Coordinator — accepts workers and drives the ledger until the scan is done
pub struct Coordinator {
    config: Arc<AppConfig>,
    config_text: Arc<str>,
    listener: TcpListener,
    state: DispatchState,
}

impl Coordinator {
    /// Bind the listening socket and position the source at `coordinator.start_index`.
    pub async fn bind(
        config: AppConfig,
        mut source: Box<dyn ScanSource>,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self> {
        let start_index = config.coordinator.start_index;
        if start_index > 0 {
            source.seek(start_index)?;
            info!("Resuming scan at point {}", start_index);
        }

        match source.point_count() {
            Some(total) => info!(
                "Scan has {} points, {} left to dispatch",
                total,
                source.remaining().unwrap_or(0)
            ),
            None => info!("Scan size unknown up front; progress reporting disabled"),
        }

        let config_text: Arc<str> = config.to_toml_string()?.into();
        let addr = format!("{}:{}", config.coordinator.bind_addr, config.coordinator.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(
            workload = %config.workload_id,
            "Coordinator listening on {}",
            listener.local_addr()?
        );

        Ok(Self {
            config: Arc::new(config),
            config_text,
            listener,
            state: DispatchState::new(source, sink),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve workers until the scan finishes or `shutdown_rx` fires.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<RunSummary> {
        let Coordinator {
            config,
            config_text,
            listener,
            state,
        } = self;

        let started_at = Utc::now();
        let clock = Instant::now();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (status_tx, mut status_rx) = watch::channel(RunStatus::Running);
        let actor = tokio::spawn(dispatch_loop(state, command_rx, status_tx));

        let ctx = ConnectionContext {
            handle: DispatchHandle::new(command_tx),
            workload_id: config.workload_id.as_str().into(),
            config_text,
            io_timeout: config.coordinator.io_timeout(),
            max_blob_bytes: config.coordinator.max_blob_bytes,
        };
        let mut connections = JoinSet::new();
        let mut outcome = RunOutcome::Completed;

        // Workers still busy with reassigned duplicates should hear
        // "no more work" rather than a refused connection.
        let grace = config.coordinator.finish_grace();
        let linger = tokio::time::sleep(FAR_FUTURE);
        tokio::pin!(linger);
        let mut lingering = false;

        loop {
            tokio::select! {
                // --- New worker connection ---
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Accepted connection");
                            connections.spawn(serve_connection(stream, peer, ctx.clone()));
                        }
                        Err(e) => warn!("Accept failed: {}", e),
                    }
                }

                // --- Reap finished connection tasks ---
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }

                // --- Scan finished or failed ---
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = status_rx.borrow().clone();
                    match status {
                        RunStatus::Running => {}
                        RunStatus::Finished if !lingering => {
                            if grace.is_zero() {
                                break;
                            }
                            debug!(
                                "Answering late workers for another {}ms",
                                grace.as_millis()
                            );
                            linger.as_mut().reset(Instant::now() + grace);
                            lingering = true;
                        }
                        RunStatus::Finished => {}
                        RunStatus::Failed(_) => break,
                    }
                }

                // --- Grace period after the scan finished ---
                () = &mut linger, if lingering => {
                    break;
                }

                // --- Shutdown signal ---
                _ = shutdown_rx.recv() => {
                    info!("Coordinator: shutdown signal received");
                    outcome = RunOutcome::Interrupted;
                    break;
                }
            }
        }

        drop(listener);

        // Let in-flight exchanges (e.g. the final empty reply) complete.
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(config.coordinator.io_timeout(), drain)
            .await
            .is_err()
        {
            warn!("Aborting connections still open after shutdown");
            connections.abort_all();
        }
        drop(ctx);

        let final_status = status_rx.borrow().clone();
        let mut state = actor
            .await
            .map_err(|e| ScanError::Internal(format!("dispatch actor panicked: {}", e)))?;
        state.flush()?;

        if let RunStatus::Failed(reason) = final_status {
            error!("Coordinator stopped: {}", reason);
            return Err(ScanError::Internal(reason));
        }

        let summary = RunSummary {
            outcome,
            started_at,
            finished_at: Utc::now(),
            elapsed: clock.elapsed(),
            stats: state.stats(),
            unflushed: state.buffered_len(),
        };

        if summary.unflushed > 0 {
            warn!(
                "{} results were still waiting on earlier points and were not written",
                summary.unflushed
            );
        }
        info!("Coordinator finished: {}", summary);
        Ok(summary)
    }
}

/// The dispatch actor: sole owner of the source and the ledger.
async fn dispatch_loop(
    mut state: DispatchState,
    mut command_rx: mpsc::Receiver<DispatchCommand>,
    status_tx: watch::Sender<RunStatus>,
) -> DispatchState {
    while let Some(command) = command_rx.recv().await {
        match command {
            DispatchCommand::TakeBatch { requested, reply } => {
                let batch = state.take_batch(requested);
                let _ = reply.send(batch);
                if state.is_finished() {
                    let _ = status_tx.send(RunStatus::Finished);
                }
            }
            DispatchCommand::Complete { completions, reply } => match state.ingest(completions) {
                Ok(report) => {
                    let _ = reply.send(Ok(report));
                }
                Err(e) => {
                    let reason = format!("persisting results failed: {}", e);
                    error!("{}", reason);
                    let _ = reply.send(Err(e));
                    let _ = status_tx.send(RunStatus::Failed(reason));
                }
            },
        }
    }

    debug!(
        in_progress = state.in_progress_len(),
        "Dispatch actor stopped"
    );
    state
}
