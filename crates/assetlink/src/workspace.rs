//! A workspace opened for one-shot commands
//!
//! Wires the config file, syntax registry, file source, content store,
//! scanner and reconciler together for one workspace root.

use crate::config::{Config, DEFAULT_CONFIG_PATH, FileConfigSource};
use assetlink_core::{
    AttachedAsset, CancellationFlag, CleanupExecutor, ConfigSource, FsContentStore, FsFileSource,
    PickAction, PickItem, ReconciliationResult, Reconciler, ScanResult, ScanScope, Settings,
    SyntaxRegistry, WorkspaceScanner, attach_files, insert_markers, marker_lines,
    remove_extensions, require_rule,
};
use eyre::{Result, WrapErr, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct Workspace {
    root: PathBuf,
    config: Arc<FileConfigSource>,
    registry: Arc<SyntaxRegistry>,
    files: Arc<FsFileSource>,
    scanner: WorkspaceScanner,
}

/// Result of `attach`
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub attached: Vec<AttachedAsset>,
    pub inserted_into: Option<PathBuf>,
    pub lines: Vec<String>,
}

impl Workspace {
    /// Open `root` with the config at `config_path` (default
    /// `.config/assetlink/config.json` under the root).
    pub fn open(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let root = root
            .canonicalize()
            .wrap_err_with(|| format!("Workspace root {} not found", root.display()))?;
        if !root.is_dir() {
            bail!("Workspace root {} is not a directory", root.display());
        }

        let config_path = match config_path {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => root.join(path),
            None => root.join(DEFAULT_CONFIG_PATH),
        };
        let config = Arc::new(FileConfigSource::load(&root, config_path)?);
        let source: Arc<dyn ConfigSource> = config.clone();
        let registry = Arc::new(SyntaxRegistry::new(Arc::clone(&source)));
        let files = Arc::new(FsFileSource::new(&root));
        let scanner = WorkspaceScanner::new(files.clone(), source, Arc::clone(&registry));

        Ok(Self {
            root,
            config,
            registry,
            files,
            scanner,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Arc<FileConfigSource> {
        &self.config
    }

    pub fn settings(&self) -> Settings {
        self.config.settings()
    }

    pub fn registry(&self) -> &Arc<SyntaxRegistry> {
        &self.registry
    }

    pub fn files(&self) -> &Arc<FsFileSource> {
        &self.files
    }

    pub fn scanner(&self) -> &WorkspaceScanner {
        &self.scanner
    }

    /// Re-read the config file and drop the compiled comment map.
    pub async fn reload_config(&self) -> Result<()> {
        self.config.reload().await?;
        self.registry.invalidate();
        Ok(())
    }

    /// Resolve a user-supplied file against the workspace root.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.root.join(file)
        }
    }

    /// Scope for an optional `--file` argument. The file must exist.
    pub fn scope(&self, file: Option<&Path>) -> Result<ScanScope> {
        let Some(file) = file else {
            return Ok(ScanScope::Workspace);
        };
        let path = self.resolve(file);
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        Ok(ScanScope::File(path))
    }

    /// Content store for the current settings.
    pub fn store(&self) -> Arc<FsContentStore> {
        let settings = self.settings();
        Arc::new(FsContentStore::new(settings.store_root, settings.case))
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store(), self.settings().case)
    }

    pub fn executor(&self) -> CleanupExecutor {
        CleanupExecutor::new(self.files.clone(), self.store(), self.settings().case)
    }

    /// Scan a scope and reconcile it against the store.
    pub async fn check(
        &self,
        scope: ScanScope,
        cancel: &CancellationFlag,
    ) -> Result<(ScanResult, ReconciliationResult)> {
        let scan = self.scanner.scan(scope.clone(), cancel).await?;
        let result = self
            .reconciler()
            .reconcile(scan.markers().cloned(), &scope)
            .await?;
        Ok((scan, result))
    }

    /// Copy files into the store and optionally insert markers into `into`
    /// before 1-based `line`.
    pub async fn attach(
        &self,
        sources: &[PathBuf],
        sub_dir: Option<&str>,
        name: Option<&str>,
        into: Option<&Path>,
        line: Option<usize>,
    ) -> Result<AttachOutcome> {
        for source in sources {
            if !source.is_file() {
                bail!("{} is not a file", source.display());
            }
        }

        let map = self.registry.effective_map();
        let target = into.map(|t| self.resolve(t));
        if let Some(target) = &target {
            if !target.is_file() {
                bail!("{} is not a file", target.display());
            }
            require_rule(&map, target)?;
        }

        let store = self.store();
        let attached = attach_files(store.as_ref(), sources, sub_dir, name).await?;

        let mut lines = Vec::new();
        if let Some(target) = &target {
            let rels: Vec<String> = attached.iter().map(|a| a.relative_path.clone()).collect();
            lines = marker_lines(&map, target, &rels);
            let at = line.map(|n| n.saturating_sub(1));
            insert_markers(self.files.as_ref(), target, at, &lines).await?;
            info!("Inserted {} markers into {}", lines.len(), target.display());
        }

        Ok(AttachOutcome {
            attached,
            inserted_into: target,
            lines,
        })
    }

    /// Remove extensions from the configured rules and persist the result.
    /// Returns the new rule list.
    pub fn remove_rules(&self, extensions: &[String]) -> Result<Vec<String>> {
        let current = self.config.config();
        let rules = remove_extensions(&current.rules, extensions);
        let config = Config {
            rules: rules.clone(),
            ..current
        };
        self.config.save(config)?;
        self.registry.invalidate();
        Ok(rules)
    }
}

/// Narrow a pick list to what `clean` was asked for.
///
/// With neither `broken` nor `orphans` set both kinds are kept. `pattern`
/// keeps items whose label or detail contains it, ignoring case.
pub fn filter_picks(
    items: Vec<PickItem>,
    broken: bool,
    orphans: bool,
    pattern: Option<&str>,
) -> Vec<PickItem> {
    let (broken, orphans) = if broken || orphans {
        (broken, orphans)
    } else {
        (true, true)
    };
    let pattern = pattern.map(str::to_lowercase);
    items
        .into_iter()
        .filter(|item| match item.action {
            PickAction::Unlink(_) => broken,
            PickAction::DeleteOrphan(_) => orphans,
        })
        .filter(|item| {
            pattern.as_deref().is_none_or(|p| {
                item.label.to_lowercase().contains(p) || item.detail.to_lowercase().contains(p)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetlink_core::{ContentStoreEntry, MarkerOccurrence, extract_markers, CaseFolding};

    fn marker(raw: &str) -> MarkerOccurrence {
        extract_markers(
            Path::new("/ws/a.js"),
            &format!("// @link@:{raw}"),
            CaseFolding::Sensitive,
        )
        .remove(0)
    }

    fn items() -> Vec<PickItem> {
        vec![
            PickItem {
                label: "Remove broken link: images/Bad.png".into(),
                detail: "a.js:1".into(),
                action: PickAction::Unlink(marker("images/Bad.png")),
            },
            PickItem {
                label: "Delete orphan asset: docs/unused.md".into(),
                detail: "/ws/store/docs/unused.md".into(),
                action: PickAction::DeleteOrphan(ContentStoreEntry::new("docs/unused.md")),
            },
        ]
    }

    #[test]
    fn test_filter_picks_defaults_to_everything() {
        assert_eq!(filter_picks(items(), false, false, None).len(), 2);
    }

    #[test]
    fn test_filter_picks_by_kind() {
        let broken = filter_picks(items(), true, false, None);
        assert_eq!(broken.len(), 1);
        assert!(matches!(broken[0].action, PickAction::Unlink(_)));

        let orphans = filter_picks(items(), false, true, None);
        assert_eq!(orphans.len(), 1);
        assert!(matches!(orphans[0].action, PickAction::DeleteOrphan(_)));
    }

    #[test]
    fn test_filter_picks_by_pattern() {
        let found = filter_picks(items(), false, false, Some("bad.PNG"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].detail, "a.js:1");

        let by_detail = filter_picks(items(), false, false, Some("/ws/store"));
        assert_eq!(by_detail.len(), 1);

        assert!(filter_picks(items(), false, false, Some("nothing")).is_empty());
    }
}
