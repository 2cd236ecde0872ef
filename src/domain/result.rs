use std::collections::BTreeMap;

use super::point::SequenceNumber;

/// Output of evaluating one scan point: channel name to opaque payload.
///
/// Channel names are untrusted until the ledger validates them at persist time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    channels: BTreeMap<String, Vec<u8>>,
}

impl ScanResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-channel result
    pub fn single(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new().with_channel(channel, payload)
    }

    pub fn with_channel(mut self, channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.insert(channel, payload);
        self
    }

    /// Insert or replace the payload for a channel
    pub fn insert(&mut self, channel: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.channels.insert(channel.into(), payload.into());
    }

    pub fn get(&self, channel: &str) -> Option<&[u8]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.channels
            .iter()
            .map(|(name, payload)| (name.as_str(), payload.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total payload bytes across all channels
    pub fn payload_bytes(&self) -> usize {
        self.channels.values().map(Vec::len).sum()
    }
}

impl FromIterator<(String, Vec<u8>)> for ScanResult {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

/// A worker's result for one sequence number, as pushed back to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub seq: SequenceNumber,
    pub result: ScanResult,
}

impl Completion {
    pub fn new(seq: SequenceNumber, result: ScanResult) -> Self {
        Self { seq, result }
    }
}
