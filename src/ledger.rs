//! Scan-point ledger
//!
//! Tracks dispatched-but-unfinished scan points and writes results out in
//! dispatch order even though they arrive in any order, possibly twice.
//!
//! Invariants:
//! - every sequence number below `next_to_persist` has been persisted
//! - `unpersisted` never holds a key below `next_to_persist`
//! - a sequence number leaves `pending` exactly once, on its first accepted completion
//! - the dispatch queue holds at most `2 * pending + QUEUE_SLACK` entries

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use tracing::{debug, warn};

use crate::domain::{Assignment, ScanPoint, ScanResult, SequenceNumber};
use crate::sink::{validate_channel_name, ResultSink};

/// Completed entries tolerated in the dispatch queue before it is compacted
const QUEUE_SLACK: usize = 64;

/// What `complete` did with a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Written out, together with this many previously buffered results
    Persisted { drained: usize },
    /// Held back until the results before it arrive
    Buffered,
    /// Not in progress (already completed, or never dispatched)
    Discarded,
}

impl CompletionOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, CompletionOutcome::Discarded)
    }
}

/// Counters for the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub dispatched: u64,
    pub completed: u64,
    pub persisted: u64,
    pub discarded: u64,
    pub reassigned: u64,
    pub dropped_channels: u64,
}

pub struct Ledger<S> {
    sink: S,
    next_seq: SequenceNumber,
    /// Dispatch order for round-robin reassignment. Completed entries are
    /// removed lazily: anything not in `pending` is skipped and dropped, and
    /// the queue is compacted once it exceeds `2 * pending + QUEUE_SLACK`.
    in_progress: VecDeque<SequenceNumber>,
    pending: HashMap<SequenceNumber, ScanPoint>,
    next_to_persist: SequenceNumber,
    unpersisted: BTreeMap<SequenceNumber, ScanResult>,
    stats: LedgerStats,
}

impl<S: ResultSink> Ledger<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_seq: SequenceNumber::ZERO,
            in_progress: VecDeque::new(),
            pending: HashMap::new(),
            next_to_persist: SequenceNumber::ZERO,
            unpersisted: BTreeMap::new(),
            stats: LedgerStats::default(),
        }
    }

    /// Record a freshly produced scan point as in progress and give it a sequence number
    pub fn dispatch(&mut self, point: ScanPoint) -> SequenceNumber {
        let seq = self.next_seq;
        self.next_seq = seq.next();
        self.pending.insert(seq, point);
        self.in_progress.push_back(seq);
        self.stats.dispatched += 1;
        seq
    }

    /// Accept the first result for `seq`; later ones are discarded.
    ///
    /// Only sink I/O can fail. A failed write leaves the result consumed; the
    /// caller is expected to treat it as fatal for the run.
    pub fn complete(&mut self, seq: SequenceNumber, result: ScanResult) -> io::Result<CompletionOutcome> {
        if self.pending.remove(&seq).is_none() {
            self.stats.discarded += 1;
            debug!("Discarding stale completion for seq {}", seq);
            return Ok(CompletionOutcome::Discarded);
        }
        self.stats.completed += 1;

        if seq != self.next_to_persist {
            self.unpersisted.insert(seq, result);
            self.trim_front();
            return Ok(CompletionOutcome::Buffered);
        }

        self.persist(seq, &result)?;
        let mut drained = 0;
        while let Some(buffered) = self.unpersisted.remove(&self.next_to_persist) {
            let next = self.next_to_persist;
            self.persist(next, &buffered)?;
            drained += 1;
        }
        self.trim_front();
        Ok(CompletionOutcome::Persisted { drained })
    }

    /// Rotate the oldest in-progress point to the back of the queue and hand it out again
    pub fn reassign(&mut self) -> Option<Assignment> {
        while let Some(seq) = self.in_progress.pop_front() {
            if let Some(point) = self.pending.get(&seq) {
                self.in_progress.push_back(seq);
                self.stats.reassigned += 1;
                return Some(Assignment::new(seq, point.clone()));
            }
        }
        None
    }

    /// Number of dispatched points still waiting for a result
    pub fn in_progress_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Entries in the dispatch queue, completed ones not yet dropped included
    pub fn queue_len(&self) -> usize {
        self.in_progress.len()
    }

    pub fn is_in_progress(&self, seq: SequenceNumber) -> bool {
        self.pending.contains_key(&seq)
    }

    /// Highest sequence number written out so far
    pub fn last_persisted(&self) -> Option<SequenceNumber> {
        self.next_to_persist.value().checked_sub(1).map(SequenceNumber)
    }

    /// Results waiting on an earlier gap
    pub fn buffered_len(&self) -> usize {
        self.unpersisted.len()
    }

    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn persist(&mut self, seq: SequenceNumber, result: &ScanResult) -> io::Result<()> {
        for (channel, payload) in result.channels() {
            if !validate_channel_name(channel) {
                warn!(
                    "Dropping output channel {:?} of seq {}: not a valid channel name",
                    channel, seq
                );
                self.stats.dropped_channels += 1;
                continue;
            }
            self.sink.append(seq, channel, payload)?;
        }
        self.next_to_persist = seq.next();
        self.stats.persisted += 1;
        Ok(())
    }

    /// Drop completed entries from the dispatch queue.
    ///
    /// The head is trimmed on every call. A straggler at the head would keep
    /// everything behind it alive, so the whole queue is compacted once
    /// completed entries outnumber the pending ones.
    fn trim_front(&mut self) {
        while let Some(seq) = self.in_progress.front() {
            if self.pending.contains_key(seq) {
                break;
            }
            self.in_progress.pop_front();
        }

        if self.in_progress.len() > 2 * self.pending.len() + QUEUE_SLACK {
            let pending = &self.pending;
            self.in_progress.retain(|seq| pending.contains_key(seq));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn seqs(values: &[u64]) -> Vec<SequenceNumber> {
        values.iter().copied().map(SequenceNumber).collect()
    }

    fn ledger_with(points: u64) -> (Ledger<MemorySink>, MemorySink) {
        let sink = MemorySink::new();
        let mut ledger = Ledger::new(sink.clone());
        for i in 0..points {
            ledger.dispatch(ScanPoint::new(format!("x = {i}")));
        }
        (ledger, sink)
    }

    fn result(text: &str) -> ScanResult {
        ScanResult::single("orbit.dat", text.as_bytes().to_vec())
    }

    #[test]
    fn test_out_of_order_completion_persists_in_order() {
        let (mut ledger, sink) = ledger_with(3);

        assert_eq!(
            ledger.complete(SequenceNumber(1), result("one")).unwrap(),
            CompletionOutcome::Buffered
        );
        assert!(sink.records().is_empty());
        assert_eq!(ledger.last_persisted(), None);

        assert_eq!(
            ledger.complete(SequenceNumber(0), result("zero")).unwrap(),
            CompletionOutcome::Persisted { drained: 1 }
        );
        assert_eq!(
            ledger.complete(SequenceNumber(2), result("two")).unwrap(),
            CompletionOutcome::Persisted { drained: 0 }
        );

        assert_eq!(sink.sequence(), seqs(&[0, 1, 2]));
        assert_eq!(ledger.last_persisted(), Some(SequenceNumber(2)));
        assert_eq!(ledger.buffered_len(), 0);
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_any_completion_order_persists_contiguously() {
        let orders: [[u64; 4]; 6] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [3, 0, 1, 2],
            [1, 2, 3, 0],
        ];
        for order in orders {
            let (mut ledger, sink) = ledger_with(4);
            for seq in order {
                ledger
                    .complete(SequenceNumber(seq), result(&seq.to_string()))
                    .unwrap();
            }
            assert_eq!(sink.sequence(), seqs(&[0, 1, 2, 3]), "order {order:?}");
        }
    }

    #[test]
    fn test_duplicate_completion_keeps_first_result() {
        let (mut ledger, sink) = ledger_with(2);

        ledger.complete(SequenceNumber(0), result("first")).unwrap();
        assert_eq!(
            ledger.complete(SequenceNumber(0), result("second")).unwrap(),
            CompletionOutcome::Discarded
        );

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"first".to_vec());
        assert_eq!(ledger.stats().discarded, 1);
        assert!(ledger.is_in_progress(SequenceNumber(1)));
    }

    #[test]
    fn test_duplicate_of_buffered_result_is_discarded() {
        let (mut ledger, sink) = ledger_with(3);
        ledger.complete(SequenceNumber(2), result("a")).unwrap();
        assert_eq!(
            ledger.complete(SequenceNumber(2), result("b")).unwrap(),
            CompletionOutcome::Discarded
        );
        ledger.complete(SequenceNumber(0), result("x")).unwrap();
        ledger.complete(SequenceNumber(1), result("y")).unwrap();

        let payloads: Vec<_> = sink.records().into_iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![b"x".to_vec(), b"y".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_unknown_sequence_number_is_ignored() {
        let (mut ledger, sink) = ledger_with(1);
        assert_eq!(
            ledger.complete(SequenceNumber(99), result("?")).unwrap(),
            CompletionOutcome::Discarded
        );
        assert!(sink.records().is_empty());
        assert_eq!(ledger.in_progress_len(), 1);
    }

    #[test]
    fn test_reassign_round_robin_wraps() {
        let sink = MemorySink::new();
        let mut ledger = Ledger::new(sink);
        for i in 0..8 {
            ledger.dispatch(ScanPoint::new(format!("p{i}")));
        }
        for seq in 0..5 {
            ledger
                .complete(SequenceNumber(seq), result("done"))
                .unwrap();
        }

        let picked: Vec<_> = (0..4)
            .map(|_| ledger.reassign().unwrap().seq)
            .collect();
        assert_eq!(picked, seqs(&[5, 6, 7, 5]));
        assert_eq!(ledger.stats().reassigned, 4);
    }

    #[test]
    fn test_straggler_at_head_does_not_grow_queue_unbounded() {
        let (mut ledger, sink) = ledger_with(1);
        for i in 1..5_000 {
            ledger.dispatch(ScanPoint::new(format!("x = {i}")));
            ledger
                .complete(SequenceNumber(i), result(&i.to_string()))
                .unwrap();
            assert!(ledger.queue_len() <= 2 * ledger.in_progress_len() + QUEUE_SLACK);
        }

        assert_eq!(ledger.in_progress_len(), 1);
        assert_eq!(ledger.buffered_len(), 4_999);
        assert_eq!(ledger.reassign().unwrap().seq, SequenceNumber(0));

        ledger.complete(SequenceNumber(0), result("0")).unwrap();
        assert_eq!(sink.records().len(), 5_000);
        assert_eq!(ledger.queue_len(), 0);
    }

    #[test]
    fn test_reassign_skips_points_completed_mid_queue() {
        let (mut ledger, _sink) = ledger_with(3);
        ledger.complete(SequenceNumber(1), result("one")).unwrap();

        assert_eq!(ledger.reassign().unwrap().seq, SequenceNumber(0));
        assert_eq!(ledger.reassign().unwrap().seq, SequenceNumber(2));
        assert_eq!(ledger.reassign().unwrap().seq, SequenceNumber(0));
    }

    #[test]
    fn test_reassign_reaches_every_outstanding_point() {
        let (mut ledger, _sink) = ledger_with(50);
        for seq in (0..50).step_by(3) {
            ledger.complete(SequenceNumber(seq), result("x")).unwrap();
        }
        let outstanding = ledger.in_progress_len();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..outstanding {
            let assignment = ledger.reassign().unwrap();
            assert!(ledger.is_in_progress(assignment.seq));
            seen.insert(assignment.seq);
        }
        assert_eq!(seen.len(), outstanding);
    }

    #[test]
    fn test_reassign_on_idle_ledger() {
        let (mut ledger, _sink) = ledger_with(1);
        ledger.complete(SequenceNumber(0), result("x")).unwrap();
        assert!(ledger.reassign().is_none());
        assert!(ledger.is_idle());
    }

    #[test]
    fn test_invalid_channels_are_dropped_but_siblings_persist() {
        let (mut ledger, sink) = ledger_with(1);
        let mixed = ScanResult::new()
            .with_channel("../../etc/passwd", b"root".to_vec())
            .with_channel("orbit.dat", b"ok".to_vec());

        ledger.complete(SequenceNumber(0), mixed).unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel, "orbit.dat");
        assert_eq!(ledger.stats().dropped_channels, 1);
        assert_eq!(ledger.last_persisted(), Some(SequenceNumber(0)));
    }

    #[test]
    fn test_reassigned_point_keeps_its_text() {
        let (mut ledger, _sink) = ledger_with(2);
        let assignment = ledger.reassign().unwrap();
        assert_eq!(assignment.seq, SequenceNumber(0));
        assert_eq!(assignment.point.as_str(), "x = 0");
    }
}
