//! Persistent output for completed scan points
//!
//! Output is a set of append-only streams, one per channel name, written
//! strictly in sequence order by the ledger.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::domain::SequenceNumber;

static CHANNEL_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(/[A-Za-z0-9_]*)*\.[A-Za-z0-9_]{3}$")
        .expect("channel name regex should compile")
});

/// Whether `name` is safe to use as a relative output path.
///
/// Accepts `orbit.dat` or `lyapunov/exponents.txt`; refuses anything with
/// `..`, leading slashes, or an extension other than three word characters.
pub fn validate_channel_name(name: &str) -> bool {
    CHANNEL_NAME_PATTERN.is_match(name)
}

/// Destination for persisted results.
///
/// Only ever receives channel names that passed `validate_channel_name`.
pub trait ResultSink: Send {
    /// Append one channel payload belonging to `seq`.
    fn append(&mut self, seq: SequenceNumber, channel: &str, payload: &[u8]) -> io::Result<()>;

    /// Push buffered output to storage.
    fn flush(&mut self) -> io::Result<()>;
}

impl<T: ResultSink + ?Sized> ResultSink for Box<T> {
    fn append(&mut self, seq: SequenceNumber, channel: &str, payload: &[u8]) -> io::Result<()> {
        (**self).append(seq, channel, payload)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// One append-only file per channel under a root directory
pub struct FileSink {
    root: PathBuf,
    /// Keyed by normalized path so `a/b.dat` and `a//b.dat` share one writer
    files: HashMap<PathBuf, BufWriter<File>>,
}

impl FileSink {
    /// Create the root directory if needed
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            files: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn writer(&mut self, channel: &str) -> io::Result<&mut BufWriter<File>> {
        // Collecting components drops empty segments
        let path: PathBuf = self.root.join(channel).components().collect();
        if !self.files.contains_key(&path) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!("Opened output channel {}", path.display());
            self.files.insert(path.clone(), BufWriter::new(file));
        }
        self.files
            .get_mut(&path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, channel.to_string()))
    }
}

impl ResultSink for FileSink {
    fn append(&mut self, _seq: SequenceNumber, channel: &str, payload: &[u8]) -> io::Result<()> {
        self.writer(channel)?.write_all(payload)
    }

    fn flush(&mut self) -> io::Result<()> {
        for writer in self.files.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = ResultSink::flush(self);
    }
}

/// A single persisted write, as recorded by `MemorySink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRecord {
    pub seq: SequenceNumber,
    pub channel: String,
    pub payload: Vec<u8>,
}

/// In-memory sink; clones share the same record list
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<PersistedRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, in write order
    pub fn records(&self) -> Vec<PersistedRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Sequence numbers in write order, one entry per channel write
    pub fn sequence(&self) -> Vec<SequenceNumber> {
        self.records().into_iter().map(|r| r.seq).collect()
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, seq: SequenceNumber, channel: &str, payload: &[u8]) -> io::Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?;
        records.push(PersistedRecord {
            seq,
            channel: channel.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
