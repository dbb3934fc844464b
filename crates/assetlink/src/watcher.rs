//! Debounced file watching for the live view
//!
//! Only the directories named by the include globs (and the content store)
//! are watched, not the whole disk under the workspace root. The config file
//! is always watched.
//!
//! - `WatcherManager` owns the debouncer and the current watch set
//! - `WatcherEvent` is what the update loop receives

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr};
use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events sent from the watcher to the update loop.
#[derive(Debug, PartialEq, Eq)]
pub enum WatcherEvent {
    /// Files changed
    FilesChanged(Vec<PathBuf>),

    /// The config file changed
    Reconfigure,
}

/// Turn one debounced batch into an event, or `None` for an empty batch.
pub fn classify(paths: Vec<PathBuf>, config_path: &Path) -> Option<WatcherEvent> {
    if paths.is_empty() {
        None
    } else if paths.iter().any(|p| p == config_path) {
        Some(WatcherEvent::Reconfigure)
    } else {
        Some(WatcherEvent::FilesChanged(paths))
    }
}

/// Longest path prefix of a glob before any metacharacter.
///
/// ```ignore
/// glob_to_watch_dir("docs/**/*.md") => "docs"
/// glob_to_watch_dir("**/*.{ts,js}") => "."
/// ```
pub fn glob_to_watch_dir(pattern: &str) -> PathBuf {
    let mut result = PathBuf::new();

    for component in Path::new(pattern).components() {
        let s = component.as_os_str().to_string_lossy();
        if s.contains('*') || s.contains('?') || s.contains('[') || s.contains('{') {
            break;
        }
        result.push(component);
    }

    if result.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        result
    }
}

/// Existing directories to watch for a set of include globs.
///
/// No globs means "all files", i.e. the workspace root. Directories nested
/// in another watched directory are dropped.
pub fn extract_watch_dirs(include: &[String], workspace_root: &Path) -> Vec<PathBuf> {
    let prefixes: Vec<PathBuf> = if include.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        include.iter().map(|p| glob_to_watch_dir(p)).collect()
    };

    let mut dirs: HashSet<PathBuf> = HashSet::new();
    for prefix in prefixes {
        let full_path = workspace_root.join(&prefix);
        match full_path.canonicalize() {
            Ok(canonical) if canonical.is_dir() => {
                dirs.insert(canonical);
            }
            _ => debug!(
                "Watch directory does not exist (yet): {}",
                full_path.display()
            ),
        }
    }

    let mut dirs: Vec<PathBuf> = dirs
        .iter()
        .filter(|d| !dirs.iter().any(|other| other != *d && d.starts_with(other)))
        .cloned()
        .collect();
    dirs.sort();
    dirs
}

/// File watching with dynamic reconfiguration.
pub struct WatcherManager {
    debouncer: Debouncer<RecommendedWatcher>,
    watched_dirs: HashSet<PathBuf>,
    config_path: PathBuf,
}

impl WatcherManager {
    /// Create a manager that forwards batches to `tx`.
    ///
    /// Nothing but the config file is watched until `reconfigure()`.
    pub fn new(
        config_path: PathBuf,
        debounce: Duration,
        tx: mpsc::Sender<WatcherEvent>,
    ) -> Result<Self> {
        let config_for_handler = config_path.clone();
        let debouncer = new_debouncer(debounce, move |res: DebounceEventResult| {
            let events = match res {
                Ok(events) => events,
                Err(e) => {
                    warn!("File watcher error: {e}");
                    return;
                }
            };
            let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
            let Some(event) = classify(paths, &config_for_handler) else {
                return;
            };
            debug!("Watcher event: {event:?}");
            if tx.blocking_send(event).is_err() {
                debug!("Watcher channel closed");
            }
        })
        .wrap_err("Failed to create file watcher")?;

        let mut manager = Self {
            debouncer,
            watched_dirs: HashSet::new(),
            config_path,
        };
        manager.watch_config()?;
        Ok(manager)
    }

    fn watch_config(&mut self) -> Result<()> {
        // the file may not exist yet; watch its directory in that case
        let target = if self.config_path.exists() {
            self.config_path.clone()
        } else if let Some(parent) = self.config_path.parent()
            && parent.is_dir()
        {
            parent.to_path_buf()
        } else {
            debug!(
                "Config {} does not exist; not watching it",
                self.config_path.display()
            );
            return Ok(());
        };
        self.debouncer
            .watcher()
            .watch(&target, RecursiveMode::NonRecursive)
            .wrap_err_with(|| format!("Failed to watch config file: {}", target.display()))?;
        info!("Watching config: {}", target.display());
        Ok(())
    }

    /// Replace the watched directory set with `dirs`.
    pub fn reconfigure(&mut self, dirs: &[PathBuf]) -> Result<()> {
        let new_dirs: HashSet<PathBuf> = dirs.iter().cloned().collect();

        let to_remove: Vec<_> = self.watched_dirs.difference(&new_dirs).cloned().collect();
        let to_add: Vec<_> = new_dirs.difference(&self.watched_dirs).cloned().collect();

        for dir in &to_remove {
            match self.debouncer.watcher().unwatch(dir) {
                Ok(()) => debug!("Stopped watching: {}", dir.display()),
                Err(e) => debug!("Failed to unwatch {} (may be deleted): {e}", dir.display()),
            }
        }

        for dir in &to_add {
            match self
                .debouncer
                .watcher()
                .watch(dir, RecursiveMode::Recursive)
            {
                Ok(()) => info!("Watching directory: {}", dir.display()),
                Err(e) => warn!("Failed to watch {}: {e}", dir.display()),
            }
        }

        self.watched_dirs = new_dirs;

        if !to_remove.is_empty() || !to_add.is_empty() {
            info!(
                "Reconfigured watcher: {} directories ({} added, {} removed)",
                self.watched_dirs.len(),
                to_add.len(),
                to_remove.len()
            );
        }
        Ok(())
    }

    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = self.watched_dirs.iter().cloned().collect();
        dirs.sort();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_watch_dir() {
        assert_eq!(glob_to_watch_dir("docs/**/*.md"), PathBuf::from("docs"));
        assert_eq!(glob_to_watch_dir("src/lib/*.rs"), PathBuf::from("src/lib"));
        assert_eq!(glob_to_watch_dir("**/*.{ts,js}"), PathBuf::from("."));
        assert_eq!(glob_to_watch_dir("a/[ab]/x"), PathBuf::from("a"));
    }

    #[test]
    fn test_extract_watch_dirs_drops_nested_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/app")).unwrap();
        let root = dir.path().canonicalize().unwrap();

        let dirs = extract_watch_dirs(
            &[
                "src/**/*.ts".to_string(),
                "src/app/*.ts".to_string(),
                "missing/**".to_string(),
            ],
            &root,
        );
        assert_eq!(dirs, vec![root.join("src")]);

        assert_eq!(extract_watch_dirs(&[], &root), vec![root.clone()]);
    }

    #[test]
    fn test_classify() {
        let config = Path::new("/ws/.config/assetlink/config.json");
        assert_eq!(classify(Vec::new(), config), None);
        assert_eq!(
            classify(vec![PathBuf::from("/ws/a.js"), config.to_path_buf()], config),
            Some(WatcherEvent::Reconfigure)
        );
        assert_eq!(
            classify(vec![PathBuf::from("/ws/a.js")], config),
            Some(WatcherEvent::FilesChanged(vec![PathBuf::from("/ws/a.js")]))
        );
    }
}
