//! Git operations module
//!
//! Provides:
//! - Comparison branch resolution with remote fallback
//! - Changed file and changed line detection
//! - Path mapping between the repository and source roots

pub mod branch;
pub mod diff;
pub mod paths;

#[cfg(test)]
pub(crate) mod test_support;

pub use branch::{BranchFallback, BranchResolver, ResolvedBranch};
pub use diff::{ChangeResolver, ChangeSet};
pub use paths::{PathMapper, SourceRoots};

use git2::Repository;
use std::path::Path;

use crate::error::ChangeCoverageError;

/// Open the repository containing `path`, searching parent directories
pub fn open_repository(path: &Path) -> Result<Repository, ChangeCoverageError> {
    let repo = Repository::discover(path)
        .map_err(|_| ChangeCoverageError::NotAGitRepository(path.to_path_buf()))?;
    if repo.is_bare() {
        return Err(ChangeCoverageError::NotAGitRepository(path.to_path_buf()));
    }
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_repository_from_subdirectory() {
        let repo = test_support::TestRepo::init();
        repo.write("core/src/main/java/Foo.java", "class Foo {}\n");

        let opened = open_repository(&repo.path().join("core/src/main/java")).unwrap();
        assert!(opened.workdir().is_some());
    }

    #[test]
    fn test_open_repository_outside_git() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_repository(dir.path()).err().expect("not a repository");
        assert!(err.is_skip());
    }
}
