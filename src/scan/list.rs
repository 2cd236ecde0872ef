use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use super::ScanSource;
use crate::domain::ScanPoint;
use crate::error::{Result, ScanError};

/// Scan points read lazily from a text file, one per line.
///
/// Blank lines and lines starting with `#` are skipped. The number of points
/// is not known up front, so this source is not indexable.
pub struct ListScan {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    lookahead: Option<ScanPoint>,
    index: u64,
}

impl ListScan {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lines = Self::open_lines(&path)?;
        let mut scan = Self {
            path,
            lines,
            lookahead: None,
            index: 0,
        };
        scan.fill()?;
        Ok(scan)
    }

    fn open_lines(path: &Path) -> Result<Lines<BufReader<File>>> {
        let file = File::open(path).map_err(|e| {
            ScanError::Source(format!("cannot open scan list {}: {}", path.display(), e))
        })?;
        Ok(BufReader::new(file).lines())
    }

    /// Load the next usable line into the lookahead slot.
    fn fill(&mut self) -> Result<()> {
        self.lookahead = None;
        for line in self.lines.by_ref() {
            let line = line?;
            let trimmed = line.trim_end();
            if trimmed.trim_start().is_empty() || trimmed.trim_start().starts_with('#') {
                continue;
            }
            self.lookahead = Some(ScanPoint::new(trimmed));
            break;
        }
        Ok(())
    }
}

impl ScanSource for ListScan {
    fn next_point(&mut self) -> Result<Option<ScanPoint>> {
        let point = self.lookahead.take();
        if point.is_some() {
            self.index += 1;
            self.fill()?;
        }
        Ok(point)
    }

    fn is_exhausted(&self) -> bool {
        self.lookahead.is_none()
    }

    fn reset(&mut self) -> Result<()> {
        self.lines = Self::open_lines(&self.path)?;
        self.index = 0;
        self.fill()
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        if index < self.index {
            self.reset()?;
        }
        while self.index < index {
            if self.next_point()?.is_none() {
                return Err(ScanError::Source(format!(
                    "scan list {} has only {} points, cannot seek to {}",
                    self.path.display(),
                    self.index,
                    index
                )));
            }
        }
        Ok(())
    }

    fn current_index(&self) -> u64 {
        self.index
    }

    fn point_count(&self) -> Option<u64> {
        None
    }
}
