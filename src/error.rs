//! Error taxonomy for change coverage runs
//!
//! Skip conditions and threshold failures are not errors; they are reported
//! through [`crate::pipeline::Outcome`].

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChangeCoverageError {
    #[error("Not a Git repository: {}", .0.display())]
    NotAGitRepository(PathBuf),

    #[error("Could not resolve branch '{branch}' locally or on any remote")]
    UnresolvableBranch { branch: String },

    #[error("Malformed coverage report {}: {source}", path.display())]
    MalformedReport {
        path: PathBuf,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Change coverage summary not found: {}", .0.display())]
    MissingSummary(PathBuf),

    #[error("Invalid value '{value}' for attribute '{attribute}' of <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },
}

impl ChangeCoverageError {
    /// Whether the error is a soft condition that should skip the run
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            ChangeCoverageError::NotAGitRepository(_) | ChangeCoverageError::MissingSummary(_)
        )
    }
}
