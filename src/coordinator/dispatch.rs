//! Batch assembly and result ingestion
//!
//! `DispatchState` owns the scan source and the ledger. It is only ever
//! touched from the dispatch actor, which serializes every mutation.

use std::collections::HashSet;
use tracing::{debug, info};

use super::progress::ProgressReporter;
use crate::domain::{Assignment, Completion};
use crate::error::Result;
use crate::ledger::{CompletionOutcome, Ledger, LedgerStats};
use crate::scan::ScanSource;
use crate::sink::ResultSink;

/// Tally of one `PUT_SCANPOINTS` submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub discarded: usize,
    pub persisted: usize,
}

pub struct DispatchState {
    source: Box<dyn ScanSource>,
    ledger: Ledger<Box<dyn ResultSink>>,
    progress: ProgressReporter,
    finished: bool,
}

impl DispatchState {
    /// Progress totals count the points the source still has to produce.
    pub fn new(source: Box<dyn ScanSource>, sink: Box<dyn ResultSink>) -> Self {
        let progress = ProgressReporter::new(source.remaining());
        Self {
            source,
            ledger: Ledger::new(sink),
            progress,
            finished: false,
        }
    }

    /// Fill a reply of up to `requested` points.
    ///
    /// Fresh points come first. Once the source is exhausted the remainder is
    /// topped up with in-progress points, oldest dispatch first, never repeating
    /// a sequence number within the reply. An exhausted source with nothing in
    /// progress marks the workload finished.
    pub fn take_batch(&mut self, requested: usize) -> Result<Vec<Assignment>> {
        let mut batch = Vec::with_capacity(requested.min(1024));

        while batch.len() < requested && !self.source.is_exhausted() {
            match self.source.next_point()? {
                Some(point) => {
                    let seq = self.ledger.dispatch(point.clone());
                    batch.push(Assignment::new(seq, point));
                }
                None => break,
            }
        }

        if batch.len() < requested && self.source.is_exhausted() {
            if self.ledger.is_idle() {
                if !self.finished {
                    info!("Scan complete: source exhausted and nothing in progress");
                }
                self.finished = true;
            } else {
                let mut included: HashSet<_> = batch.iter().map(|a| a.seq).collect();
                // One full rotation at most; beyond that every point would repeat.
                for _ in 0..self.ledger.in_progress_len() {
                    if batch.len() >= requested {
                        break;
                    }
                    match self.ledger.reassign() {
                        Some(assignment) => {
                            if included.insert(assignment.seq) {
                                debug!("Reassigning seq {}", assignment.seq);
                                batch.push(assignment);
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(batch)
    }

    /// Feed a submission into the ledger and report progress.
    pub fn ingest(&mut self, completions: Vec<Completion>) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for completion in completions {
            match self.ledger.complete(completion.seq, completion.result)? {
                CompletionOutcome::Persisted { drained } => {
                    report.accepted += 1;
                    report.persisted += 1 + drained;
                }
                CompletionOutcome::Buffered => report.accepted += 1,
                CompletionOutcome::Discarded => report.discarded += 1,
            }
        }

        if let Some(line) = self.progress.advance(report.accepted as u64) {
            info!("{}", line);
        }
        Ok(report)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn in_progress_len(&self) -> usize {
        self.ledger.in_progress_len()
    }

    pub fn buffered_len(&self) -> usize {
        self.ledger.buffered_len()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.ledger.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScanResult, SequenceNumber};
    use crate::scan::GridScan;
    use crate::sink::MemorySink;

    fn state(points: usize) -> (DispatchState, MemorySink) {
        let values = (0..points).map(|i| i as f64).collect();
        let source = GridScan::new(vec![("x", values)]).unwrap();
        let sink = MemorySink::new();
        (
            DispatchState::new(Box::new(source), Box::new(sink.clone())),
            sink,
        )
    }

    fn seqs(batch: &[Assignment]) -> Vec<u64> {
        batch.iter().map(|a| a.seq.value()).collect()
    }

    fn done(seq: u64) -> Completion {
        Completion::new(
            SequenceNumber(seq),
            ScanResult::single("out.dat", seq.to_string().into_bytes()),
        )
    }

    #[test]
    fn test_short_source_returns_what_it_has() {
        let (mut state, _) = state(4);
        let batch = state.take_batch(10).unwrap();
        assert_eq!(seqs(&batch), vec![0, 1, 2, 3]);
        assert_eq!(batch[2].point.as_str(), "x = 2.0\n");
        assert!(!state.is_finished());
    }

    #[test]
    fn test_tops_up_with_reassigned_points() {
        let (mut state, _) = state(5);
        assert_eq!(seqs(&state.take_batch(3).unwrap()), vec![0, 1, 2]);
        // Two fresh, then the oldest outstanding ones
        assert_eq!(seqs(&state.take_batch(4).unwrap()), vec![3, 4, 0, 1]);
        assert_eq!(state.stats().reassigned, 2);
    }

    #[test]
    fn test_reassignment_never_repeats_within_a_reply() {
        let (mut state, _) = state(3);
        state.take_batch(3).unwrap();
        let batch = state.take_batch(10).unwrap();
        assert_eq!(seqs(&batch), vec![0, 1, 2]);
    }

    #[test]
    fn test_finishes_when_everything_is_persisted() {
        let (mut state, sink) = state(2);
        state.take_batch(2).unwrap();
        let report = state.ingest(vec![done(1), done(0)]).unwrap();
        assert_eq!(
            report,
            IngestReport {
                accepted: 2,
                discarded: 0,
                persisted: 2
            }
        );
        assert!(!state.is_finished());

        assert!(state.take_batch(5).unwrap().is_empty());
        assert!(state.is_finished());
        assert_eq!(sink.sequence(), vec![SequenceNumber(0), SequenceNumber(1)]);
    }

    #[test]
    fn test_duplicate_submission_is_counted_as_discarded() {
        let (mut state, sink) = state(2);
        state.take_batch(2).unwrap();
        state.ingest(vec![done(0)]).unwrap();
        let report = state.ingest(vec![done(0), done(1)]).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_straggler_is_reoffered_after_fresh_work_runs_out() {
        let (mut state, _) = state(3);
        state.take_batch(1).unwrap(); // seq 0 goes to a worker that vanishes
        state.take_batch(2).unwrap();
        state.ingest(vec![done(1), done(2)]).unwrap();
        assert_eq!(state.buffered_len(), 2);

        let batch = state.take_batch(5).unwrap();
        assert_eq!(seqs(&batch), vec![0]);
        state.ingest(vec![done(0)]).unwrap();
        assert_eq!(state.buffered_len(), 0);
        assert!(state.take_batch(1).unwrap().is_empty());
        assert!(state.is_finished());
    }

    #[test]
    fn test_point_that_never_completes_keeps_the_run_open() {
        let (mut state, sink) = state(4);
        state.take_batch(4).unwrap();
        state.ingest(vec![done(1), done(2), done(3)]).unwrap();

        // Nothing bounds the retries of a point no worker ever finishes
        for round in 1..=5u64 {
            let batch = state.take_batch(3).unwrap();
            assert_eq!(seqs(&batch), vec![0]);
            assert!(!state.is_finished());
            assert_eq!(state.stats().reassigned, round);
        }
        assert_eq!(state.in_progress_len(), 1);
        assert_eq!(state.buffered_len(), 3);
        assert!(sink.records().is_empty());
    }
}
