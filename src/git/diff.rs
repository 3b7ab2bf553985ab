//! Change resolution: which source files are new and which lines changed
//! since the merge base with the comparison branch

use anyhow::{Context, Result};
use git2::{Delta, DiffDelta, DiffHunk, DiffOptions, Patch, Repository};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use super::branch::ResolvedBranch;
use super::paths::PathMapper;
use crate::log::Logger;

/// New files and changed line numbers, keyed by source-root-relative path.
/// A path is never both new and modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changed_lines_by_file: BTreeMap<String, BTreeSet<u32>>,
    new_files: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new file. A new file supersedes any line changes recorded
    /// for the same path under an overlapping source root.
    pub fn add_new_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.changed_lines_by_file.remove(&path);
        self.new_files.insert(path);
    }

    /// Record changed (1-based) line numbers of a modified file.
    /// Ignored when the path is already known as a new file.
    pub fn add_changed_lines<I>(&mut self, path: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = u32>,
    {
        let path = path.into();
        if self.new_files.contains(&path) {
            return;
        }
        let lines: BTreeSet<u32> = lines.into_iter().collect();
        if lines.is_empty() {
            return;
        }
        self.changed_lines_by_file
            .entry(path)
            .or_default()
            .extend(lines);
    }

    pub fn changed_lines_by_file(&self) -> &BTreeMap<String, BTreeSet<u32>> {
        &self.changed_lines_by_file
    }

    pub fn changed_lines(&self, path: &str) -> Option<&BTreeSet<u32>> {
        self.changed_lines_by_file.get(path)
    }

    pub fn new_files(&self) -> &BTreeSet<String> {
        &self.new_files
    }

    pub fn is_new_file(&self, path: &str) -> bool {
        self.new_files.contains(path)
    }

    pub fn has_changes(&self) -> bool {
        !self.new_files.is_empty() || !self.changed_lines_by_file.is_empty()
    }

    pub fn changed_line_count(&self) -> usize {
        self.changed_lines_by_file.values().map(|lines| lines.len()).sum()
    }

    /// Every path of interest, new or modified
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.new_files
            .iter()
            .chain(self.changed_lines_by_file.keys())
            .map(|s| s.as_str())
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new files, {} modified files ({} lines changed)",
            self.new_files.len(),
            self.changed_lines_by_file.len(),
            self.changed_line_count()
        )
    }
}

/// Shape of a zero-context hunk, from the line counts on each side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
}

impl EditKind {
    pub fn of(hunk: &DiffHunk<'_>) -> Self {
        match (hunk.old_lines(), hunk.new_lines()) {
            (0, _) => EditKind::Insert,
            (_, 0) => EditKind::Delete,
            _ => EditKind::Replace,
        }
    }
}

/// Resolves a [`ChangeSet`] by diffing the working tree against the merge
/// base of HEAD and the comparison branch
pub struct ChangeResolver<'r> {
    repo: &'r Repository,
    mapper: PathMapper,
}

impl<'r> ChangeResolver<'r> {
    pub fn new(repo: &'r Repository) -> Result<Self> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| anyhow::anyhow!("Repository has no working directory"))?;
        Ok(Self {
            repo,
            mapper: PathMapper::new(workdir),
        })
    }

    pub fn resolve(
        &self,
        compare: &ResolvedBranch,
        module_dir: &Path,
        source_roots: &[PathBuf],
        log: &Logger,
    ) -> Result<ChangeSet> {
        let roots = self.mapper.source_roots(source_roots);
        if roots.is_empty() {
            return Ok(ChangeSet::new());
        }
        let module_prefix = self
            .mapper
            .repo_relative(module_dir)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Module directory {} is outside the repository",
                    module_dir.display()
                )
            })?;

        let merge_base = self.merge_base(compare)?;
        log.debug(format!(
            "Comparing current directory with {} ({}), merge base {}.",
            compare.name, compare.commit, merge_base
        ));
        log.debug(format!(
            "Run \"git diff {}...HEAD\" to see diff.",
            compare.name
        ));

        let base_tree = self
            .repo
            .find_commit(merge_base)
            .and_then(|commit| commit.tree())
            .with_context(|| format!("Failed to read tree of merge base {}", merge_base))?;

        let mut opts = DiffOptions::new();
        opts.context_lines(0)
            .interhunk_lines(0)
            .ignore_whitespace(true)
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .ignore_submodules(true);
        for pathspec in roots.pathspecs() {
            opts.pathspec(pathspec);
        }

        let diff = self
            .repo
            .diff_tree_to_workdir_with_index(Some(&base_tree), Some(&mut opts))
            .with_context(|| "Failed to diff working tree against merge base")?;

        let mut changes = ChangeSet::new();

        for (index, delta) in diff.deltas().enumerate() {
            let repo_path = match delta_path(&delta) {
                Some(path) => path,
                None => continue,
            };
            if !in_module(&module_prefix, &repo_path) {
                continue;
            }

            match delta.status() {
                Delta::Added | Delta::Untracked => {
                    for path in roots.relativize(&repo_path) {
                        changes.add_new_file(path);
                    }
                }
                Delta::Modified => {
                    let lines = match self.changed_lines(&diff, index)? {
                        Some(lines) => lines,
                        None => {
                            log.debug(format!("Skipping binary file {}.", repo_path));
                            continue;
                        }
                    };
                    for path in roots.relativize(&repo_path) {
                        changes.add_changed_lines(path, lines.iter().copied());
                    }
                }
                // Deleted code cannot be covered; renames and copies without
                // modification add no lines.
                _ => {}
            }
        }

        Ok(changes)
    }

    fn merge_base(&self, compare: &ResolvedBranch) -> Result<git2::Oid> {
        let head = self
            .repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .with_context(|| "Failed to resolve HEAD")?;

        self.repo
            .merge_base(head.id(), compare.commit)
            .with_context(|| format!("No common ancestor between HEAD and {}", compare.name))
    }

    /// New-side line numbers of every inserted or replaced line of a delta,
    /// `None` for binary content. The binary flag is only known once the
    /// patch has been loaded.
    fn changed_lines(&self, diff: &git2::Diff<'_>, index: usize) -> Result<Option<BTreeSet<u32>>> {
        let patch = match Patch::from_diff(diff, index)? {
            Some(patch) => patch,
            None => return Ok(None),
        };
        if patch.delta().flags().is_binary() {
            return Ok(None);
        }

        let mut lines = BTreeSet::new();

        for hunk_index in 0..patch.num_hunks() {
            let (hunk, line_count) = patch.hunk(hunk_index)?;
            if EditKind::of(&hunk) == EditKind::Delete {
                continue;
            }
            for line_index in 0..line_count {
                let line = patch.line_in_hunk(hunk_index, line_index)?;
                if line.origin() == '+' {
                    if let Some(number) = line.new_lineno() {
                        lines.insert(number);
                    }
                }
            }
        }

        Ok(Some(lines))
    }
}

/// Path of a delta in the new tree, falling back to the old side for deletions
fn delta_path(delta: &DiffDelta<'_>) -> Option<String> {
    delta
        .new_file()
        .path()
        .or_else(|| delta.old_file().path())
        .map(|p| super::paths::normalize_path(&p.to_string_lossy()))
}

fn in_module(module_prefix: &str, repo_path: &str) -> bool {
    module_prefix.is_empty()
        || repo_path
            .strip_prefix(module_prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}
