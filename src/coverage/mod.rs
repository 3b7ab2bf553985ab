//! Coverage module
//!
//! Provides:
//! - Coverage records for new files, modified files and changed lines
//! - JaCoCo XML correlation against a change set
//! - Aggregation into line and branch percentages
//! - Threshold validation

pub mod aggregate;
pub mod jacoco;
pub mod threshold;

pub use aggregate::{aggregate, format_percentage, CoveragePercentages};
pub use jacoco::{correlate, correlate_file};
pub use threshold::{validate_threshold, Dimension, ThresholdResult};

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, AddAssign};

use crate::log::Logger;

/// Covered and missed counts of changed lines and branches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub covered_lines: u32,
    pub missed_lines: u32,
    pub covered_branches: u32,
    pub missed_branches: u32,
}

impl Counts {
    pub fn new(covered_lines: u32, missed_lines: u32, covered_branches: u32, missed_branches: u32) -> Self {
        Self {
            covered_lines,
            missed_lines,
            covered_branches,
            missed_branches,
        }
    }

    pub fn total_lines(&self) -> u32 {
        self.covered_lines + self.missed_lines
    }

    pub fn total_branches(&self) -> u32 {
        self.covered_branches + self.missed_branches
    }

    pub fn has_testable_changes(&self) -> bool {
        self.total_lines() + self.total_branches() > 0
    }

    pub fn is_complete(&self) -> bool {
        self.covered_lines >= self.total_lines() && self.covered_branches >= self.total_branches()
    }

    fn line_summary(&self) -> String {
        format!("{}/{} new lines covered", self.covered_lines, self.total_lines())
    }

    fn branch_summary(&self) -> String {
        format!("{}/{} new branches covered", self.covered_branches, self.total_branches())
    }

    /// `<lines>[, <branches>]`, branches only when there are any
    fn summary(&self) -> String {
        if self.total_branches() > 0 {
            format!("{}, {}", self.line_summary(), self.branch_summary())
        } else {
            self.line_summary()
        }
    }
}

impl Add for Counts {
    type Output = Counts;

    fn add(self, other: Counts) -> Counts {
        Counts {
            covered_lines: self.covered_lines + other.covered_lines,
            missed_lines: self.missed_lines + other.missed_lines,
            covered_branches: self.covered_branches + other.covered_branches,
            missed_branches: self.missed_branches + other.missed_branches,
        }
    }
}

impl AddAssign for Counts {
    fn add_assign(&mut self, other: Counts) {
        *self = *self + other;
    }
}

impl std::iter::Sum for Counts {
    fn sum<I: Iterator<Item = Counts>>(iter: I) -> Counts {
        iter.fold(Counts::default(), Add::add)
    }
}

/// Coverage of a file that did not exist at the merge base, taken from the
/// report's own file-level counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileCoverage {
    pub path: String,
    pub counts: Counts,
}

impl NewFileCoverage {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            counts: Counts::default(),
        }
    }

    pub fn describe(&self) -> String {
        format!("New file {}: {}", self.path, self.counts.summary())
    }
}

/// Coverage of one changed line.
///
/// Equality and ordering only consider the line number, so a set of lines
/// holds at most one entry per position. Use [`LineCoverage::same_counts`]
/// to compare the counts as well.
#[derive(Debug, Clone, Copy)]
pub struct LineCoverage {
    pub line: u32,
    pub counts: Counts,
}

impl LineCoverage {
    /// Derive a line's coverage from its instruction and branch counters.
    /// A line without instructions counts as neither covered nor missed.
    pub fn from_counters(
        line: u32,
        missed_instructions: u32,
        covered_instructions: u32,
        missed_branches: u32,
        covered_branches: u32,
    ) -> Self {
        let covered = covered_instructions > 0;
        let missed = !covered && missed_instructions > 0;
        Self {
            line,
            counts: Counts::new(covered as u32, missed as u32, covered_branches, missed_branches),
        }
    }

    pub fn same_counts(&self, other: &LineCoverage) -> bool {
        self.line == other.line && self.counts == other.counts
    }

    pub fn describe(&self) -> String {
        format!(
            "Line {}: line {}, {}.",
            self.line,
            if self.counts.covered_lines == 1 { "covered" } else { "not covered" },
            self.counts.branch_summary()
        )
    }
}

impl PartialEq for LineCoverage {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line
    }
}

impl Eq for LineCoverage {}

impl PartialOrd for LineCoverage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LineCoverage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line.cmp(&other.line)
    }
}

/// Coverage of the changed lines of a file that existed at the merge base.
/// Its counts are the sum of its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedFileCoverage {
    pub path: String,
    pub changed_lines: BTreeSet<u32>,
    pub lines: BTreeSet<LineCoverage>,
}

impl ModifiedFileCoverage {
    pub fn new(path: impl Into<String>, changed_lines: BTreeSet<u32>) -> Self {
        Self {
            path: path.into(),
            changed_lines,
            lines: BTreeSet::new(),
        }
    }

    pub fn counts(&self) -> Counts {
        self.lines.iter().map(|line| line.counts).sum()
    }

    pub fn describe(&self) -> String {
        let mut out = format!("Changed file {}: {}:", self.path, self.counts().summary());
        for line in &self.lines {
            out.push_str("\n    ");
            out.push_str(&line.describe());
        }
        out
    }
}

/// One correlated piece of changed code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageRecord {
    NewFile(NewFileCoverage),
    ModifiedFile(ModifiedFileCoverage),
    Line(LineCoverage),
}

impl CoverageRecord {
    pub fn counts(&self) -> Counts {
        match self {
            CoverageRecord::NewFile(file) => file.counts,
            CoverageRecord::ModifiedFile(file) => file.counts(),
            CoverageRecord::Line(line) => line.counts,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            CoverageRecord::NewFile(file) => Some(&file.path),
            CoverageRecord::ModifiedFile(file) => Some(&file.path),
            CoverageRecord::Line(_) => None,
        }
    }

    pub fn has_testable_changes(&self) -> bool {
        self.counts().has_testable_changes()
    }

    pub fn is_complete(&self) -> bool {
        self.counts().is_complete()
    }

    pub fn describe(&self) -> String {
        match self {
            CoverageRecord::NewFile(file) => file.describe(),
            CoverageRecord::ModifiedFile(file) => file.describe(),
            CoverageRecord::Line(line) => line.describe(),
        }
    }

    /// Log the record if it changes testable code: incomplete coverage is a
    /// warning, complete coverage is debug detail
    pub fn log_to(&self, log: &Logger) {
        if !self.has_testable_changes() {
            return;
        }
        if self.is_complete() {
            log.debug(self.describe());
        } else {
            log.warn(self.describe());
        }
    }
}

impl fmt::Display for CoverageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
