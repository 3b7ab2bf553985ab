//! changecov - change coverage gate
//!
//! Measures how much of the code changed since the merge base with a
//! comparison branch is covered by tests, and enforces thresholds on it:
//! - Comparison branch resolution with remote-tracking fallback
//! - Whitespace-insensitive diff of the working tree against the merge base
//! - Streaming correlation of a JaCoCo XML report with the changed lines
//! - Line and branch percentages checked against configurable requirements
//! - Persisted summary and a repository-wide aggregate log

pub mod config;
pub mod coverage;
pub mod error;
pub mod git;
pub mod log;
pub mod pipeline;
pub mod summary;
pub mod workspace;

pub use config::{Config, Overrides};
pub use coverage::{aggregate, CoveragePercentages, CoverageRecord};
pub use error::ChangeCoverageError;
pub use git::{BranchResolver, ChangeResolver, ChangeSet};
pub use pipeline::{Goal, Module, Outcome, Pipeline};
pub use summary::ChangeCoverageSummary;
pub use workspace::Workspace;
