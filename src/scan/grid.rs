use std::fmt::Write;

use super::ScanSource;
use crate::config::ScanConfig;
use crate::domain::ScanPoint;
use crate::error::{Result, ScanError};

/// Cartesian product of named parameter axes.
///
/// The last axis varies fastest. A point renders as one `name = value` line
/// per axis, in axis order.
#[derive(Debug, Clone)]
pub struct GridScan {
    axes: Vec<Axis>,
    total: u64,
    index: u64,
}

#[derive(Debug, Clone)]
struct Axis {
    name: String,
    values: Vec<f64>,
}

impl GridScan {
    pub fn new<I, S>(axes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let axes: Vec<Axis> = axes
            .into_iter()
            .map(|(name, values)| Axis {
                name: name.into(),
                values,
            })
            .collect();

        if axes.is_empty() {
            return Err(ScanError::InvalidConfig(
                "grid scan needs at least one axis".into(),
            ));
        }

        let mut total: u64 = 1;
        for axis in &axes {
            if axis.values.is_empty() {
                return Err(ScanError::InvalidConfig(format!(
                    "grid axis {} has no values",
                    axis.name
                )));
            }
            total = total
                .checked_mul(axis.values.len() as u64)
                .ok_or_else(|| ScanError::InvalidConfig("grid scan is too large".into()))?;
        }

        Ok(Self {
            axes,
            total,
            index: 0,
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        Self::new(
            config
                .parameters
                .iter()
                .map(|axis| (axis.name.clone(), axis.points())),
        )
    }

    /// Render the point at `index` without moving the cursor
    pub fn point_at(&self, index: u64) -> Option<ScanPoint> {
        if index >= self.total {
            return None;
        }

        let mut digits = vec![0usize; self.axes.len()];
        let mut rest = index;
        for (slot, axis) in digits.iter_mut().zip(&self.axes).rev() {
            let radix = axis.values.len() as u64;
            *slot = (rest % radix) as usize;
            rest /= radix;
        }

        let mut text = String::new();
        for (axis, digit) in self.axes.iter().zip(digits) {
            let _ = writeln!(text, "{} = {:?}", axis.name, axis.values[digit]);
        }
        Some(ScanPoint::new(text))
    }
}

impl ScanSource for GridScan {
    fn next_point(&mut self) -> Result<Option<ScanPoint>> {
        let point = self.point_at(self.index);
        if point.is_some() {
            self.index += 1;
        }
        Ok(point)
    }

    fn is_exhausted(&self) -> bool {
        self.index >= self.total
    }

    fn reset(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        if index > self.total {
            return Err(ScanError::Source(format!(
                "cannot seek to {} in a grid of {} points",
                index, self.total
            )));
        }
        self.index = index;
        Ok(())
    }

    fn current_index(&self) -> u64 {
        self.index
    }

    fn point_count(&self) -> Option<u64> {
        Some(self.total)
    }
}
