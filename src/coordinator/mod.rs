//! Coordinator
//!
//! Hands scan points to workers over TCP, collects their results and
//! persists them in scan order. A single dispatch actor owns the scan
//! source and the ledger; every connection is served by its own task.

pub mod command;
pub mod connection;
pub mod coordinator;
pub mod dispatch;
pub mod progress;
pub mod state;

pub use command::{DispatchCommand, DispatchHandle};
pub use connection::{serve_connection, ConnectionContext};
pub use coordinator::Coordinator;
pub use dispatch::{DispatchState, IngestReport};
pub use progress::{format_progress, ProgressReporter};
pub use state::{RunOutcome, RunStatus, RunSummary};
