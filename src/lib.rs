pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod scan;
pub mod sink;
pub mod wire;
pub mod worker;

pub use config::AppConfig;
pub use coordinator::{Coordinator, RunSummary};
pub use domain::{Assignment, Completion, ScanPoint, ScanResult, SequenceNumber};
pub use error::{ProtocolError, Result, ScanError};
pub use ledger::{CompletionOutcome, Ledger, LedgerStats};
pub use scan::{build_source, GridScan, ListScan, ScanSource};
pub use sink::{FileSink, MemorySink, ResultSink};
pub use worker::{CommandEvaluator, Evaluator, Worker, WorkerSummary};
