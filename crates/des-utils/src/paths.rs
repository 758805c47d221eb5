//! Path resolution for DES state directories.
//!
//! The audit log directory is resolved through a fixed priority chain:
//! explicit argument, `DES_AUDIT_LOG_DIR`, project-local
//! `.nwave/des/logs/`, global `~/.claude/des/logs/`. The first candidate
//! that can be created and written wins; falling past a candidate logs a
//! warning naming both paths.

use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;
use std::fs;

use crate::error::AuditError;

/// Environment variable overriding the audit log directory.
pub const AUDIT_DIR_ENV: &str = "DES_AUDIT_LOG_DIR";

/// Project-local audit log directory, relative to the project root.
pub const PROJECT_AUDIT_DIR: &str = ".nwave/des/logs";

/// Global fallback audit log directory, relative to the home directory.
pub const GLOBAL_AUDIT_DIR: &str = ".claude/des/logs";

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_HOME: RefCell<Option<Utf8PathBuf>> = const { RefCell::new(None) };
}

/// Override the home directory for the current thread (test seam).
pub fn set_thread_home(home: Option<Utf8PathBuf>) {
    THREAD_HOME.with(|h| *h.borrow_mut() = home);
}

fn home_dir() -> Option<Utf8PathBuf> {
    let thread_home = THREAD_HOME.with(|h| h.borrow().clone());
    if thread_home.is_some() {
        return thread_home;
    }
    dirs::home_dir().and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
}

/// Create a directory (and parents) if missing, tolerating benign races.
pub fn ensure_dir_all(path: &Utf8Path) -> std::io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(_) if path.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_writable_dir(path: &Utf8Path) -> bool {
    if ensure_dir_all(path).is_err() {
        return false;
    }
    // Probe with a real create; permission bits alone lie on some mounts.
    match tempfile::NamedTempFile::new_in(path.as_std_path()) {
        Ok(f) => {
            drop(f);
            true
        }
        Err(_) => false,
    }
}

/// Resolve the audit log directory through the priority chain.
///
/// Priority: `explicit` argument, then [`AUDIT_DIR_ENV`], then
/// `<project_root>/.nwave/des/logs`, then `~/.claude/des/logs`. The
/// first writable candidate is returned. Skipping a candidate emits a
/// `tracing::warn!` so operators can see the fallback.
pub fn resolve_audit_dir(
    explicit: Option<&Utf8Path>,
    project_root: &Utf8Path,
) -> Result<Utf8PathBuf, AuditError> {
    let mut candidates: Vec<Utf8PathBuf> = Vec::new();

    if let Some(dir) = explicit {
        candidates.push(dir.to_owned());
    }
    if let Ok(dir) = std::env::var(AUDIT_DIR_ENV) {
        if !dir.is_empty() {
            candidates.push(Utf8PathBuf::from(dir));
        }
    }
    candidates.push(project_root.join(PROJECT_AUDIT_DIR));
    if let Some(home) = home_dir() {
        candidates.push(home.join(GLOBAL_AUDIT_DIR));
    }

    let mut skipped: Option<&Utf8PathBuf> = None;
    for candidate in &candidates {
        if is_writable_dir(candidate) {
            if let Some(prev) = skipped {
                tracing::warn!(
                    skipped = %prev,
                    selected = %candidate,
                    "Audit log directory not writable, falling back"
                );
            }
            return Ok(candidate.clone());
        }
        skipped = Some(candidate);
    }

    Err(AuditError::NoWritableDirectory {
        candidates: candidates
            .iter()
            .map(Utf8PathBuf::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_explicit_dir_wins() {
        let explicit = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let resolved = resolve_audit_dir(Some(&utf8(&explicit)), &utf8(&project)).unwrap();
        assert_eq!(resolved, utf8(&explicit));
    }

    #[test]
    fn test_project_local_dir_is_created() {
        let project = TempDir::new().unwrap();

        let resolved = resolve_audit_dir(None, &utf8(&project)).unwrap();
        assert_eq!(resolved, utf8(&project).join(PROJECT_AUDIT_DIR));
        assert!(resolved.is_dir());
    }

    #[test]
    fn test_global_fallback_via_thread_home() {
        let home = TempDir::new().unwrap();
        set_thread_home(Some(utf8(&home)));

        // Unwritable project root: a file where the .nwave dir would go.
        let project = TempDir::new().unwrap();
        let project_root = utf8(&project);
        std::fs::write(project_root.join(".nwave").as_std_path(), b"not a dir").unwrap();

        let resolved = resolve_audit_dir(None, &project_root).unwrap();
        assert_eq!(resolved, utf8(&home).join(GLOBAL_AUDIT_DIR));

        set_thread_home(None);
    }

    #[test]
    fn test_ensure_dir_all_idempotent() {
        let dir = TempDir::new().unwrap();
        let target = utf8(&dir).join("a/b");
        ensure_dir_all(&target).unwrap();
        ensure_dir_all(&target).unwrap();
        assert!(target.is_dir());
    }
}
