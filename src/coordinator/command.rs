//! Dispatch commands — requests from connection tasks to the dispatch actor

use tokio::sync::{mpsc, oneshot};

use super::dispatch::IngestReport;
use crate::domain::{Assignment, Completion};
use crate::error::{Result, ScanError};

/// Requests served, one at a time, by the dispatch actor
#[derive(Debug)]
pub enum DispatchCommand {
    /// Assemble a `GET_SCANPOINTS` reply
    TakeBatch {
        requested: usize,
        reply: oneshot::Sender<Result<Vec<Assignment>>>,
    },
    /// Ingest a `PUT_SCANPOINTS` submission
    Complete {
        completions: Vec<Completion>,
        reply: oneshot::Sender<Result<IngestReport>>,
    },
}

/// Clonable handle given to connection tasks
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    pub(crate) fn new(tx: mpsc::Sender<DispatchCommand>) -> Self {
        Self { tx }
    }

    /// Ask for up to `requested` scan points
    pub async fn take_batch(&self, requested: usize) -> Result<Vec<Assignment>> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::TakeBatch { requested, reply })
            .await?;
        rx.await
            .map_err(|_| ScanError::Internal("dispatch actor dropped the reply".into()))?
    }

    /// Hand over completed results
    pub async fn complete(&self, completions: Vec<Completion>) -> Result<IngestReport> {
        let (reply, rx) = oneshot::channel();
        self.send(DispatchCommand::Complete { completions, reply })
            .await?;
        rx.await
            .map_err(|_| ScanError::Internal("dispatch actor dropped the reply".into()))?
    }

    async fn send(&self, command: DispatchCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ScanError::Internal("dispatch channel closed".into()))
    }
}
