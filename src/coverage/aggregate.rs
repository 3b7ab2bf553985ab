//! Aggregation of coverage records into changed-code percentages

use super::{CoverageRecord, Counts};

/// Line and branch coverage of changed code, in percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveragePercentages {
    pub line: f64,
    pub branch: f64,
}

impl CoveragePercentages {
    /// Coverage when there is nothing to test
    pub fn complete() -> Self {
        Self {
            line: 100.0,
            branch: 100.0,
        }
    }
}

/// Sum all records and compute both percentages. A dimension without any
/// testable code is 100% covered.
pub fn aggregate(records: &[CoverageRecord]) -> CoveragePercentages {
    let totals: Counts = records.iter().map(|record| record.counts()).sum();
    CoveragePercentages {
        line: percentage(totals.covered_lines, totals.total_lines()),
        branch: percentage(totals.covered_branches, totals.total_branches()),
    }
}

fn percentage(covered: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (covered as f64 / total as f64) * 100.0
}

/// At most two decimals, trailing zeros dropped: `91.67`, `80`, `12.5`
pub fn format_percentage(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
