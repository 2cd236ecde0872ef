//! Operator progress line

/// Emits a progress line each time completion crosses a new whole percent.
///
/// Disabled when the workload size is not known up front.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    total: Option<u64>,
    calculated: u64,
    last_percent: Option<u64>,
}

impl ProgressReporter {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            calculated: 0,
            last_percent: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.total.is_some()
    }

    pub fn calculated(&self) -> u64 {
        self.calculated
    }

    /// Count `n` more completed points; returns a line if a new percent was reached.
    pub fn advance(&mut self, n: u64) -> Option<String> {
        self.calculated = self.calculated.saturating_add(n);
        let total = self.total?;
        if n == 0 {
            return None;
        }

        // Widened so huge totals cannot overflow; the quotient is at most 100
        let percent = (u128::from(self.calculated.min(total)) * 100 / u128::from(total)) as u64;
        if percent == 0 || self.last_percent.is_some_and(|last| percent <= last) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(format_progress(total, self.calculated, percent))
    }
}

pub fn format_progress(total: u64, calculated: u64, percent: u64) -> String {
    format!(
        "total: {}, calculated {}, progress {}%.",
        total, calculated, percent
    )
}
