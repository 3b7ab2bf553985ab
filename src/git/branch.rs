//! Comparison branch resolution
//!
//! The comparison branch is looked up locally first. A remote-tracking branch
//! is used instead when the local branch is missing, behind its remote, or is
//! the checked-out branch with unpushed commits: changes are measured against
//! what has actually been shared.

use anyhow::{Context, Result};
use git2::{Branch, BranchType, Oid, Repository};
use std::fmt;

use crate::error::ChangeCoverageError;

const PREFERRED_REMOTE: &str = "origin";

/// A comparison branch resolved to a commit
#[derive(Debug, Clone)]
pub struct ResolvedBranch {
    /// Short branch name, e.g. `develop` or `origin/develop`
    pub name: String,
    pub commit: Oid,
    /// Set when a remote-tracking branch was substituted for the local one
    pub fallback: Option<BranchFallback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchFallback {
    LocalMissing {
        remote: String,
    },
    LocalBehind {
        local: String,
        remote: String,
        behind: usize,
    },
    CheckedOutAhead {
        local: String,
        remote: String,
        ahead: usize,
    },
}

impl fmt::Display for BranchFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchFallback::LocalMissing { remote } => {
                let local = remote.split_once('/').map(|(_, b)| b).unwrap_or(remote);
                write!(f, "Branch {} not found locally, comparing with {}.", local, remote)
            }
            BranchFallback::LocalBehind { local, remote, behind } => write!(
                f,
                "Local branch {} is {} commit(s) behind {}, comparing with {}.",
                local, behind, remote, remote
            ),
            BranchFallback::CheckedOutAhead { local, remote, ahead } => write!(
                f,
                "Local branch {} is checked out and {} commit(s) ahead of {}, comparing with {}.",
                local, ahead, remote, remote
            ),
        }
    }
}

pub struct BranchResolver<'r> {
    repo: &'r Repository,
}

impl<'r> BranchResolver<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }

    pub fn resolve(&self, branch: &str) -> Result<ResolvedBranch> {
        let local = self.repo.find_branch(branch, BranchType::Local).ok();
        let remote = self.find_remote_tracking(branch, local.as_ref())?;

        match (local, remote) {
            (None, None) => Err(ChangeCoverageError::UnresolvableBranch {
                branch: branch.to_string(),
            }
            .into()),
            (None, Some((remote_name, remote_oid))) => Ok(ResolvedBranch {
                name: remote_name.clone(),
                commit: remote_oid,
                fallback: Some(BranchFallback::LocalMissing { remote: remote_name }),
            }),
            (Some(local), None) => Ok(ResolvedBranch {
                name: branch.to_string(),
                commit: branch_commit(&local)?,
                fallback: None,
            }),
            (Some(local), Some((remote_name, remote_oid))) => {
                let local_oid = branch_commit(&local)?;
                let (ahead, behind) = self
                    .repo
                    .graph_ahead_behind(local_oid, remote_oid)
                    .with_context(|| format!("Failed to compare {} with {}", branch, remote_name))?;

                let fallback = if behind > 0 {
                    Some(BranchFallback::LocalBehind {
                        local: branch.to_string(),
                        remote: remote_name.clone(),
                        behind,
                    })
                } else if ahead > 0 && local.is_head() {
                    Some(BranchFallback::CheckedOutAhead {
                        local: branch.to_string(),
                        remote: remote_name.clone(),
                        ahead,
                    })
                } else {
                    None
                };

                Ok(match fallback {
                    Some(fallback) => ResolvedBranch {
                        name: remote_name,
                        commit: remote_oid,
                        fallback: Some(fallback),
                    },
                    None => ResolvedBranch {
                        name: branch.to_string(),
                        commit: local_oid,
                        fallback: None,
                    },
                })
            }
        }
    }

    /// The remote-tracking counterpart of `branch`: the configured upstream
    /// of the local branch if any, else `origin/<branch>`, else the first
    /// `<remote>/<branch>` by remote name.
    fn find_remote_tracking(
        &self,
        branch: &str,
        local: Option<&Branch<'r>>,
    ) -> Result<Option<(String, Oid)>> {
        if let Some(upstream) = local.and_then(|l| l.upstream().ok()) {
            if let Some(name) = upstream.name()? {
                let name = name.to_string();
                return Ok(Some((name, branch_commit(&upstream)?)));
            }
        }

        let suffix = format!("/{}", branch);
        let mut candidates: Vec<(String, Oid)> = Vec::new();

        for entry in self.repo.branches(Some(BranchType::Remote))? {
            let (remote_branch, _) = entry?;
            if remote_branch.get().symbolic_target().is_some() {
                continue;
            }
            let name = match remote_branch.name()? {
                Some(name) => name.to_string(),
                None => continue,
            };
            match name.strip_suffix(&suffix) {
                Some(remote) if !remote.is_empty() => {
                    candidates.push((name.clone(), branch_commit(&remote_branch)?));
                }
                _ => {}
            }
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let preferred = format!("{}/{}", PREFERRED_REMOTE, branch);
        if let Some(index) = candidates.iter().position(|(name, _)| *name == preferred) {
            return Ok(Some(candidates.swap_remove(index)));
        }

        Ok(candidates.into_iter().next())
    }
}

fn branch_commit(branch: &Branch<'_>) -> Result<Oid> {
    let commit = branch
        .get()
        .peel_to_commit()
        .with_context(|| "Branch does not point to a commit")?;
    Ok(commit.id())
}
