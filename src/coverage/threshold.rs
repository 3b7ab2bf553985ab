//! Coverage threshold validation

use colored::Colorize;
use std::fmt;

use super::aggregate::{format_percentage, CoveragePercentages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Branch,
    Line,
}

impl Dimension {
    /// Plural noun used in failure messages
    pub fn plural(&self) -> &'static str {
        match self {
            Dimension::Branch => "branches",
            Dimension::Line => "lines",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Branch => write!(f, "branch"),
            Dimension::Line => write!(f, "line"),
        }
    }
}

/// Result of threshold validation. Only the first failing dimension is
/// reported, branch coverage being checked before line coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub passed: bool,
    pub coverage: CoveragePercentages,
    pub line_threshold: f64,
    pub branch_threshold: f64,
    pub failed: Option<Dimension>,
}

impl ThresholdResult {
    pub fn line_delta(&self) -> f64 {
        self.coverage.line - self.line_threshold
    }

    pub fn branch_delta(&self) -> f64 {
        self.coverage.branch - self.branch_threshold
    }

    /// `92% requirement for test coverage of changed lines not met (91.67%).`
    pub fn failure_message(&self) -> Option<String> {
        let dimension = self.failed?;
        let (threshold, actual) = match dimension {
            Dimension::Branch => (self.branch_threshold, self.coverage.branch),
            Dimension::Line => (self.line_threshold, self.coverage.line),
        };
        Some(format!(
            "{}% requirement for test coverage of changed {} not met ({}%).",
            format_percentage(threshold),
            dimension.plural(),
            format_percentage(actual)
        ))
    }

    pub fn print_summary(&self) {
        print_dimension("Branch", self.coverage.branch, self.branch_threshold);
        print_dimension("Line", self.coverage.line, self.line_threshold);
    }
}

fn print_dimension(label: &str, coverage: f64, threshold: f64) {
    let delta = coverage - threshold;
    let status = if delta >= 0.0 { "✓".green() } else { "✗".red() };
    let delta_str = if delta >= 0.0 {
        format!("+{:.1}%", delta).green()
    } else {
        format!("{:.1}%", delta).red()
    };

    println!(
        "  {} {} coverage: {}% (threshold: {}%, {})",
        status,
        label,
        format_percentage(coverage),
        format_percentage(threshold),
        delta_str
    );
}

/// Validate changed-code coverage against thresholds. The boundary is
/// inclusive: coverage equal to the threshold passes.
pub fn validate_threshold(
    coverage: CoveragePercentages,
    line_threshold: f64,
    branch_threshold: f64,
) -> ThresholdResult {
    let failed = if coverage.branch < branch_threshold {
        Some(Dimension::Branch)
    } else if coverage.line < line_threshold {
        Some(Dimension::Line)
    } else {
        None
    };

    ThresholdResult {
        passed: failed.is_none(),
        coverage,
        line_threshold,
        branch_threshold,
        failed,
    }
}
