use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Coordinator-assigned identifier joining a dispatched scan point to its result.
///
/// Assigned in dispatch order starting at zero and never reused within one
/// coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SequenceNumber {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(SequenceNumber)
    }
}

/// One serialized parameter assignment.
///
/// The text is produced by a scan source and consumed by an evaluator; nothing
/// in between looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanPoint(String);

impl ScanPoint {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ScanPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScanPoint {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for ScanPoint {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// A scan point handed to a worker together with its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub seq: SequenceNumber,
    pub point: ScanPoint,
}

impl Assignment {
    pub fn new(seq: SequenceNumber, point: ScanPoint) -> Self {
        Self { seq, point }
    }
}
