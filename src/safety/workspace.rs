//! Managed temp tree maintenance
use crate::config::types::{EngineError, Result};
use crate::observability::audit::events;
use crate::safety::path_guard::{PathGuard, TempCategory};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Layout and retention over a [`PathGuard`] root
pub struct TempTree<'a> {
    guard: &'a PathGuard,
}

impl<'a> TempTree<'a> {
    pub fn new(guard: &'a PathGuard) -> Self {
        Self { guard }
    }

    /// Create every category directory under the root
    pub fn ensure_layout(&self) -> Result<()> {
        for category in TempCategory::ALL {
            let dir = self.guard.category_dir(category);
            fs::create_dir_all(&dir).map_err(|e| {
                EngineError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {}: {}", dir.display(), e),
                ))
            })?;
        }
        Ok(())
    }

    /// Remove generated files older than `max_age`. Entries that cannot be
    /// inspected or removed are logged and skipped.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut cleaned = 0;

        for category in TempCategory::ALL {
            let dir = self.guard.category_dir(category);
            if !dir.exists() {
                continue;
            }

            let entries = fs::read_dir(&dir).map_err(|e| {
                EngineError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {}: {}", dir.display(), e),
                ))
            })?;

            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        log::warn!("Failed to read directory entry: {}", e);
                        continue;
                    }
                };

                let path = entry.path();
                // symlink_metadata: never follow a link out of the tree
                let metadata = match fs::symlink_metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("Failed to get metadata for {}: {}", path.display(), e);
                        continue;
                    }
                };
                if metadata.is_dir() {
                    continue;
                }

                let age = match metadata.modified().map(|m| now.duration_since(m)) {
                    Ok(Ok(age)) => age,
                    // Unreadable or future timestamp
                    _ => continue,
                };

                if age >= max_age {
                    match fs::remove_file(&path) {
                        Ok(()) => {
                            log::debug!("Pruned {}", path.display());
                            cleaned += 1;
                        }
                        Err(e) => {
                            log::warn!("Failed to prune {}: {}", path.display(), e);
                            events::cleanup_failure(&path, &e);
                        }
                    }
                }
            }
        }

        Ok(cleaned)
    }
}

/// Removes its file when dropped, on every exit path
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("Failed to remove {}: {}", self.path.display(), e);
                events::cleanup_failure(&self.path, &e);
            }
        }
    }
}
