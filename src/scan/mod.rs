//! Scan point sources
//!
//! A source produces the ordered, resettable sequence of scan points the
//! coordinator hands out. Whether a source knows its size up front is fixed
//! when it is built, so progress reporting can be decided once.

pub mod grid;
pub mod list;

pub use grid::GridScan;
pub use list::ListScan;

use crate::config::{ScanConfig, ScanSourceKind};
use crate::domain::ScanPoint;
use crate::error::{Result, ScanError};

pub trait ScanSource: Send {
    /// Produce the next scan point, or `None` once the source is exhausted.
    fn next_point(&mut self) -> Result<Option<ScanPoint>>;

    fn is_exhausted(&self) -> bool;

    /// Rewind to the first scan point.
    fn reset(&mut self) -> Result<()>;

    /// Position the source so the next point produced is the one at `index`.
    fn seek(&mut self, index: u64) -> Result<()>;

    /// Index of the next point to be produced.
    fn current_index(&self) -> u64;

    /// Total number of points, when known without enumerating them.
    fn point_count(&self) -> Option<u64>;

    fn is_indexable(&self) -> bool {
        self.point_count().is_some()
    }

    /// Points left to produce, when the total is known.
    fn remaining(&self) -> Option<u64> {
        self.point_count()
            .map(|total| total.saturating_sub(self.current_index()))
    }
}

/// Build the source described by the scan configuration
pub fn build_source(config: &ScanConfig) -> Result<Box<dyn ScanSource>> {
    match config.source {
        ScanSourceKind::Grid => Ok(Box::new(GridScan::from_config(config)?)),
        ScanSourceKind::List => {
            let path = config.list_path.as_ref().ok_or_else(|| {
                ScanError::InvalidConfig("scan.list_path is required for the list source".into())
            })?;
            Ok(Box::new(ListScan::open(path)?))
        }
    }
}
