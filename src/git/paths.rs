//! Path mapping between the filesystem, the repository and source roots
//!
//! Repository paths always use `/` separators and never start with `./`.
//! Source roots are kept as repository-relative prefixes ending in `/`
//! (or empty when the source root is the repository root itself).

use std::path::{Component, Path, PathBuf};

/// Maps filesystem paths to repository-relative paths
#[derive(Debug, Clone)]
pub struct PathMapper {
    workdir: PathBuf,
}

impl PathMapper {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: canonicalize_lenient(workdir),
        }
    }

    /// Repository-relative form of `path`, or `None` when it lies outside
    /// the working tree. The working tree itself maps to `""`.
    pub fn repo_relative(&self, path: &Path) -> Option<String> {
        let path = canonicalize_lenient(path);
        let relative = path.strip_prefix(&self.workdir).ok()?;

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();

        Some(parts.join("/"))
    }

    /// Source roots of a module, expressed relative to the repository.
    /// Roots outside the working tree are dropped.
    pub fn source_roots(&self, roots: &[PathBuf]) -> SourceRoots {
        SourceRoots::new(roots.iter().filter_map(|root| self.repo_relative(root)))
    }
}

/// Repository-relative source root prefixes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRoots {
    roots: Vec<String>,
}

impl SourceRoots {
    pub fn new<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes: Vec<String> = roots
            .into_iter()
            .map(|root| as_prefix(&normalize_path(root.as_ref())))
            .collect();
        prefixes.dedup();
        Self { roots: prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every source root containing `repo_path`, paired with the path
    /// relative to that root. A path under overlapping roots is reported
    /// once per root.
    pub fn relativize<'a>(&'a self, repo_path: &'a str) -> impl Iterator<Item = String> + 'a {
        self.roots
            .iter()
            .filter_map(move |root| repo_path.strip_prefix(root.as_str()))
            .filter(|relative| !relative.is_empty())
            .map(|relative| relative.to_string())
    }

    /// Pathspecs limiting a git diff to the source roots
    pub fn pathspecs(&self) -> Vec<String> {
        self.roots
            .iter()
            .map(|root| root.trim_end_matches('/').to_string())
            .filter(|root| !root.is_empty())
            .collect()
    }
}

/// Normalize path separators and remove leading ./
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

fn as_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Package of a source-root-relative file: its parent directory, or `""`
/// for files at the root
pub fn package_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

/// Source-root-relative path of a file declared inside a report package
pub fn join_package(package: &str, file: &str) -> String {
    if package.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", package, file)
    }
}

/// Canonicalize the longest existing ancestor of `path` and append the rest,
/// so paths that do not exist yet still compare equal to canonical ones
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let mut missing = Vec::new();
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            missing.push(name.to_os_string());
        }
        if let Ok(canonical) = parent.canonicalize() {
            let mut result = canonical;
            for name in missing.iter().rev() {
                result.push(name);
            }
            return result;
        }
        current = parent;
    }

    path.to_path_buf()
}
