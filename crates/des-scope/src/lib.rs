//! Scope boundary enforcement.
//!
//! A step declares an allow-list of literal paths and globs relative to
//! the project root. Candidate paths are realpath-resolved (symlinks
//! followed) before matching, `*` never crosses a separator, and `**`
//! matches zero or more directory segments. An empty allow-list permits
//! no modifications at all.

use camino::Utf8Path;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use des_utils::error::ScopeError;

/// Compiled allow-list for one step.
pub struct ScopeMatcher {
    root: PathBuf,
    set: GlobSet,
    is_empty: bool,
}

impl ScopeMatcher {
    /// Compile the allow-list against a project root.
    ///
    /// The root is canonicalized once; candidates outside it never match.
    pub fn new(project_root: &Utf8Path, allow_paths: &[String]) -> Result<Self, ScopeError> {
        let root = std::fs::canonicalize(project_root.as_std_path())
            .unwrap_or_else(|_| project_root.as_std_path().to_path_buf());

        let mut builder = GlobSetBuilder::new();
        for pattern in allow_paths {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| ScopeError::InvalidGlob {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ScopeError::InvalidGlob {
            pattern: allow_paths.join(","),
            reason: e.to_string(),
        })?;

        Ok(Self {
            root,
            set,
            is_empty: allow_paths.is_empty(),
        })
    }

    /// Whether a modified path is inside the declared scope.
    ///
    /// The candidate may be absolute or relative to the project root; it
    /// is realpath-resolved before matching. Paths that cannot be
    /// brought under the root are out of scope.
    #[must_use]
    pub fn is_allowed(&self, candidate: &str) -> bool {
        if self.is_empty {
            return false;
        }
        let Some(relative) = self.resolve_relative(candidate) else {
            return false;
        };
        self.set.is_match(&relative)
    }

    /// Paths from a modification report that fall outside the scope, in
    /// input order, deduplicated.
    #[must_use]
    pub fn violations(&self, modified_files: &[String]) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for path in modified_files {
            if !self.is_allowed(path) && !seen.contains(path) {
                seen.push(path.clone());
            }
        }
        seen
    }

    fn resolve_relative(&self, candidate: &str) -> Option<PathBuf> {
        let raw = Path::new(candidate);
        let absolute = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let resolved = realpath_lenient(&absolute);
        resolved.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }
}

/// Canonicalize a path, falling back to resolving the nearest existing
/// ancestor when the file itself has already been deleted.
fn realpath_lenient(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(parent_resolved) = std::fs::canonicalize(parent) {
            return parent_resolved.join(name);
        }
    }
    path.to_path_buf()
}
