//! Live view of a workspace
//!
//! The engine owns a [`ScanCache`] and keeps it current as files change:
//! source edits re-scan one file, store edits only re-run reconciliation,
//! config edits reload the config and re-scan everything. Each update is
//! published as a [`Summary`] on a watch channel.

use crate::workspace::Workspace;
use assetlink_core::{CancellationFlag, ReconciliationResult, ScanCache, ScanScope, relative_slash};
use eyre::Result;
use facet::Facet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

/// Counts after one update
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct Summary {
    pub version: u64,
    pub files: usize,
    pub markers: usize,
    pub valid: usize,
    pub broken: usize,
    pub orphans: usize,
    pub excluded: usize,
}

impl Summary {
    fn new(version: u64, cache: &ScanCache, result: &ReconciliationResult) -> Self {
        Self {
            version,
            files: cache.files().count(),
            markers: cache.marker_count(),
            valid: result.valid.len(),
            broken: result.broken.len(),
            orphans: result.orphans.len(),
            excluded: result.excluded,
        }
    }

    /// `12 markers in 4 files, 1 broken, 2 orphans`
    pub fn one_line(&self) -> String {
        format!(
            "{} markers in {} files, {} broken, {} orphans",
            self.markers, self.files, self.broken, self.orphans
        )
    }
}

/// How a batch of changed paths was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Nothing relevant changed
    Ignored,
    /// Only store files changed
    Store,
    /// Source files were re-scanned
    Sources,
    /// The config changed and everything was rebuilt
    Config,
}

pub struct Engine {
    workspace: Workspace,
    cache: RwLock<ScanCache>,
    result: RwLock<Option<Arc<ReconciliationResult>>>,
    summary_tx: watch::Sender<Summary>,
    version: AtomicU64,
    config_error: RwLock<Option<String>>,
}

impl Engine {
    pub fn new(workspace: Workspace) -> Self {
        let (summary_tx, _) = watch::channel(Summary::default());
        Self {
            workspace,
            cache: RwLock::new(ScanCache::new()),
            result: RwLock::new(None),
            summary_tx,
            version: AtomicU64::new(0),
            config_error: RwLock::new(None),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn config_path(&self) -> &Path {
        self.workspace.config().path()
    }

    /// Receiver for summaries; bumped on every update.
    pub fn subscribe(&self) -> watch::Receiver<Summary> {
        self.summary_tx.subscribe()
    }

    pub fn summary(&self) -> Summary {
        self.summary_tx.borrow().clone()
    }

    /// Latest reconciliation, if any update has run.
    pub async fn result(&self) -> Option<Arc<ReconciliationResult>> {
        self.result.read().await.clone()
    }

    /// Error from the last config reload, if it failed
    pub async fn config_error(&self) -> Option<String> {
        self.config_error.read().await.clone()
    }

    /// Full re-scan with the current config.
    pub async fn rebuild(&self) -> Result<(Summary, Duration)> {
        let start = Instant::now();
        let mut cache = self.cache.write().await;
        cache
            .full_refresh(self.workspace.scanner(), &CancellationFlag::new())
            .await?;
        let summary = self.reconcile(&cache).await?;
        Ok((summary, start.elapsed()))
    }

    /// Reload the config, then rebuild.
    ///
    /// A bad config is recorded and the previous one stays in effect.
    pub async fn reconfigure(&self) -> Result<(Summary, Duration)> {
        let error = match self.workspace.reload_config().await {
            Ok(()) => None,
            Err(e) => Some(format!("{e:#}")),
        };
        *self.config_error.write().await = error;
        self.rebuild().await
    }

    /// Handle a batch of changed paths from the watcher.
    pub async fn on_files_changed(&self, paths: &[PathBuf]) -> Result<(ChangeKind, Summary)> {
        if paths.iter().any(|p| p == self.config_path()) {
            let (summary, _) = self.reconfigure().await?;
            return Ok((ChangeKind::Config, summary));
        }

        let store_root = self.store_root();
        let root = self.workspace.root();
        let mut cache = self.cache.write().await;
        let filter = cache.effective_filter(self.workspace.scanner()).compile();

        let mut store_changed = false;
        let mut sources: Vec<&PathBuf> = Vec::new();
        for path in paths {
            if path.starts_with(&store_root) {
                store_changed = true;
            } else if let Ok(rel) = path.strip_prefix(root)
                && filter.matches(&relative_slash(root, path))
            {
                debug!("Source changed: {}", rel.display());
                sources.push(path);
            }
        }

        if sources.is_empty() && !store_changed {
            return Ok((ChangeKind::Ignored, self.summary()));
        }

        for path in &sources {
            if path.is_file() {
                cache.refresh_one(self.workspace.scanner(), path).await;
            } else {
                cache.remove(path);
            }
        }
        let summary = self.reconcile(&cache).await?;

        let kind = if sources.is_empty() {
            ChangeKind::Store
        } else {
            ChangeKind::Sources
        };
        Ok((kind, summary))
    }

    async fn reconcile(&self, cache: &ScanCache) -> Result<Summary> {
        let result = self
            .workspace
            .reconciler()
            .reconcile(cache.markers(), &ScanScope::Workspace)
            .await?;
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let summary = Summary::new(version, cache, &result);
        info!("Update {}: {}", version, summary.one_line());

        *self.result.write().await = Some(Arc::new(result));
        if self.summary_tx.send(summary.clone()).is_err() {
            debug!("No summary subscribers");
        }
        Ok(summary)
    }

    /// Store root as the watcher reports it (symlinks resolved when it exists)
    fn store_root(&self) -> PathBuf {
        let store_root = self.workspace.settings().store_root;
        store_root.canonicalize().unwrap_or(store_root)
    }

    /// Directories the watcher should cover for the current config.
    ///
    /// Follows the last rebuild: a widened scan watches the whole root.
    pub async fn watch_dirs(&self) -> Vec<PathBuf> {
        let filter = self
            .cache
            .read()
            .await
            .effective_filter(self.workspace.scanner());
        let mut dirs = crate::watcher::extract_watch_dirs(&filter.include, self.workspace.root());
        let store_root = self.workspace.settings().store_root;
        match store_root.canonicalize() {
            Ok(store) if !dirs.iter().any(|d| store.starts_with(d)) => dirs.push(store),
            Ok(_) => {}
            Err(_) => warn!(
                "Store root {} does not exist (yet); store changes are not watched",
                store_root.display()
            ),
        }
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(config: &str) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".config/assetlink/config.json");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, config).unwrap();
        std::fs::create_dir_all(dir.path().join(".vscode/code-assets/images")).unwrap();
        let workspace = Workspace::open(dir.path(), None).unwrap();
        (dir, Engine::new(workspace))
    }

    fn root(engine: &Engine) -> PathBuf {
        engine.workspace().root().to_path_buf()
    }

    #[tokio::test]
    async fn test_source_change_rescans_one_file() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"]}"#);
        let root = root(&engine);
        let a = root.join("a.js");
        std::fs::write(&a, "// @link@:images/x.png\n").unwrap();

        let (summary, _) = engine.rebuild().await.unwrap();
        assert_eq!((summary.markers, summary.broken), (1, 1));

        std::fs::write(&a, "// nothing here\n").unwrap();
        let (kind, summary) = engine.on_files_changed(&[a.clone()]).await.unwrap();
        assert_eq!(kind, ChangeKind::Sources);
        assert_eq!((summary.markers, summary.files), (0, 0));
    }

    #[tokio::test]
    async fn test_store_change_only_reconciles() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"]}"#);
        let root = root(&engine);
        std::fs::write(root.join("a.js"), "// @link@:images/x.png\n").unwrap();
        engine.rebuild().await.unwrap();

        let asset = root.join(".vscode/code-assets/images/x.png");
        std::fs::write(&asset, "png").unwrap();
        let (kind, summary) = engine.on_files_changed(&[asset]).await.unwrap();
        assert_eq!(kind, ChangeKind::Store);
        assert_eq!((summary.valid, summary.broken), (1, 0));
    }

    #[tokio::test]
    async fn test_unrelated_change_is_ignored() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"]}"#);
        let root = root(&engine);
        engine.rebuild().await.unwrap();
        let version = engine.summary().version;

        let txt = root.join("notes.txt");
        std::fs::write(&txt, "@link@:images/x.png").unwrap();
        let (kind, summary) = engine.on_files_changed(&[txt]).await.unwrap();
        assert_eq!(kind, ChangeKind::Ignored);
        assert_eq!(summary.version, version);
    }

    #[tokio::test]
    async fn test_config_change_reloads_and_keeps_previous_on_error() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"]}"#);
        let root = root(&engine);
        std::fs::write(root.join("a.js"), "// @link@:images/x.png\n").unwrap();
        std::fs::write(root.join("b.py"), "# @link@:images/y.png\n").unwrap();
        let (summary, _) = engine.rebuild().await.unwrap();
        assert_eq!(summary.markers, 1);

        let config_path = engine.config_path().to_path_buf();
        std::fs::write(&config_path, r#"{"rules": ["{js}-{//}", "{py}-{#}"]}"#).unwrap();
        let (kind, summary) = engine.on_files_changed(&[config_path.clone()]).await.unwrap();
        assert_eq!(kind, ChangeKind::Config);
        assert_eq!(summary.markers, 2);
        assert!(engine.config_error().await.is_none());

        std::fs::write(&config_path, "{ broken").unwrap();
        let (_, summary) = engine.on_files_changed(&[config_path]).await.unwrap();
        assert_eq!(summary.markers, 2);
        assert!(engine.config_error().await.is_some());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"]}"#);
        let mut rx = engine.subscribe();
        engine.rebuild().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().version, 1);
    }

    #[tokio::test]
    async fn test_widened_scan_keeps_tracking_all_files() {
        let (_dir, engine) = setup(r#"{"rules": ["{js}-{//}"], "include": ["src/**/*.js"]}"#);
        let root = root(&engine);
        let a = root.join("lib/a.js");
        std::fs::create_dir_all(a.parent().unwrap()).unwrap();
        std::fs::write(&a, "// @link@:images/x.png\n").unwrap();

        let (summary, _) = engine.rebuild().await.unwrap();
        assert_eq!(summary.markers, 1);

        std::fs::write(&a, "// @link@:images/x.png\n// @link@:images/y.png\n").unwrap();
        let (kind, summary) = engine.on_files_changed(&[a]).await.unwrap();
        assert_eq!(kind, ChangeKind::Sources);
        assert_eq!(summary.markers, 2);
        assert_eq!(engine.watch_dirs().await, vec![root]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_events_match_through_symlinked_store_root() {
        let outside = tempfile::tempdir().unwrap();
        let real = outside.path().canonicalize().unwrap().join("real");
        std::fs::create_dir_all(real.join("images")).unwrap();
        let link = outside.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let (_dir, engine) = setup(&format!(
            r#"{{"rules": ["{{js}}-{{//}}"], "storeRoot": "{}"}}"#,
            link.display()
        ));
        let root = root(&engine);
        std::fs::write(root.join("a.js"), "// @link@:images/x.png\n").unwrap();
        let (summary, _) = engine.rebuild().await.unwrap();
        assert_eq!(summary.broken, 1);

        // the watcher reports canonical paths
        let asset = real.join("images/x.png");
        std::fs::write(&asset, "png").unwrap();
        let (kind, summary) = engine.on_files_changed(&[asset]).await.unwrap();
        assert_eq!(kind, ChangeKind::Store);
        assert_eq!((summary.valid, summary.broken), (1, 0));
        assert!(engine.watch_dirs().await.contains(&real));
    }
}
