//! Reconciliation of markers against the content store
//!
//! Each in-scope marker is classified valid or broken, and (for workspace
//! scans) every store entry no marker claims is reported as an orphan.

use crate::lexer::MarkerOccurrence;
use crate::path::{CaseFolding, is_contained, normalize};
use crate::scan::ScanScope;
use crate::store::{ContentStore, ContentStoreEntry};
use eyre::Result;
use futures_util::future::join_all;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// How many broken markers / orphans to log at debug level
const SAMPLE_SIZE: usize = 20;

/// Number of existence-probe workers: available parallelism, at least 4.
pub fn probe_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconciliationResult {
    pub scope: ScanScope,
    pub store_root: PathBuf,
    /// Contained markers whose target exists
    pub valid: Vec<MarkerOccurrence>,
    /// Contained markers whose target is missing
    pub broken: Vec<MarkerOccurrence>,
    /// Store entries no in-scope marker refers to (workspace scope only)
    pub orphans: Vec<ContentStoreEntry>,
    /// Markers pointing outside the store, left out entirely
    pub excluded: usize,
}

impl ReconciliationResult {
    pub fn is_clean(&self) -> bool {
        self.broken.is_empty() && self.orphans.is_empty()
    }

    /// User-facing items, broken markers first, then orphans.
    pub fn pick_list(&self, workspace_root: &Path) -> Vec<PickItem> {
        let broken = self.broken.iter().map(|m| {
            let file = m.source_file.strip_prefix(workspace_root).unwrap_or(&m.source_file);
            PickItem {
                label: format!("Remove broken link: {}", m.raw_path),
                detail: format!("{}:{}", file.to_string_lossy().replace('\\', "/"), m.line + 1),
                action: PickAction::Unlink(m.clone()),
            }
        });
        let orphans = self.orphans.iter().map(|e| PickItem {
            label: format!("Delete orphan asset: {}", e.relative_path),
            detail: self.store_root.join(&e.relative_path).display().to_string(),
            action: PickAction::DeleteOrphan(e.clone()),
        });
        broken.chain(orphans).collect()
    }
}

/// What selecting a [`PickItem`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickAction {
    /// Remove the marker text
    Unlink(MarkerOccurrence),
    /// Delete the store file
    DeleteOrphan(ContentStoreEntry),
}

/// One selectable cleanup item with a label and a locating detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickItem {
    pub label: String,
    pub detail: String,
    pub action: PickAction,
}

/// Cross-references markers with a [`ContentStore`].
pub struct Reconciler {
    store: Arc<dyn ContentStore>,
    case: CaseFolding,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ContentStore>, case: CaseFolding) -> Self {
        Self { store, case }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Classify markers and find orphans.
    ///
    /// In workspace scope the store is listed once and existence is set
    /// membership, with a direct probe as fallback. In single-file scope
    /// every marker is probed directly and no orphans are computed.
    pub async fn reconcile(
        &self,
        markers: impl IntoIterator<Item = MarkerOccurrence>,
        scope: &ScanScope,
    ) -> Result<ReconciliationResult> {
        let root = self.store.root().to_path_buf();

        let mut in_scope = Vec::new();
        let mut excluded = 0;
        for mut marker in markers {
            let key = normalize(&marker.raw_path, self.case);
            if !is_contained(&key, &root, self.case) {
                debug!(
                    "Ignoring {:?} in {}: outside the store",
                    marker.raw_path,
                    marker.source_file.display()
                );
                excluded += 1;
                continue;
            }
            marker.normalized_path = key;
            in_scope.push(marker);
        }

        let listing = if scope.is_workspace() {
            Some(self.store.list().await?)
        } else {
            None
        };
        let listed: HashSet<String> = listing
            .iter()
            .flatten()
            .map(|e| e.key(self.case))
            .collect();

        let to_probe: BTreeSet<String> = in_scope
            .iter()
            .map(|m| m.normalized_path.clone())
            .filter(|k| !k.is_empty() && !listed.contains(k))
            .collect();
        let probed = self.probe_all(to_probe).await;

        let (valid, broken): (Vec<_>, Vec<_>) = in_scope.iter().cloned().partition(|m| {
            let key = &m.normalized_path;
            key.is_empty() || listed.contains(key) || probed.contains(key)
        });

        let claimed: HashSet<&str> = in_scope
            .iter()
            .map(|m| m.normalized_path.as_str())
            .collect();
        let orphans: Vec<ContentStoreEntry> = listing
            .into_iter()
            .flatten()
            .filter(|e| !claimed.contains(e.key(self.case).as_str()))
            .collect();

        debug!(
            "Reconciled {} markers: {} valid, {} broken, {} excluded, {} orphans",
            in_scope.len(),
            valid.len(),
            broken.len(),
            excluded,
            orphans.len()
        );
        debug!(
            "Broken sample: {:?}",
            broken
                .iter()
                .take(SAMPLE_SIZE)
                .map(|m| (m.source_file.display().to_string(), &m.normalized_path))
                .collect::<Vec<_>>()
        );
        debug!(
            "Orphan sample: {:?}",
            orphans
                .iter()
                .take(SAMPLE_SIZE)
                .map(|e| &e.relative_path)
                .collect::<Vec<_>>()
        );

        Ok(ReconciliationResult {
            scope: scope.clone(),
            store_root: root,
            valid,
            broken,
            orphans,
            excluded,
        })
    }

    /// Probe keys concurrently; returns the ones that exist.
    async fn probe_all(&self, keys: BTreeSet<String>) -> HashSet<String> {
        if keys.is_empty() {
            return HashSet::new();
        }
        let queue = Mutex::new(keys.into_iter().collect::<VecDeque<_>>());
        let found = Mutex::new(HashSet::new());

        let queue = &queue;
        let found = &found;
        join_all((0..probe_workers()).map(|_| async move {
            loop {
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(key) = next else { break };
                if self.store.exists(&key).await {
                    found
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key);
                }
            }
        }))
        .await;

        std::mem::take(&mut *found.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::extract_markers;
    use crate::store::MemoryContentStore;

    fn markers(text: &str) -> Vec<MarkerOccurrence> {
        extract_markers(Path::new("/ws/a.js"), text, CaseFolding::Sensitive)
    }

    fn reconciler(store: MemoryContentStore) -> Reconciler {
        Reconciler::new(Arc::new(store), CaseFolding::Sensitive)
    }

    #[tokio::test]
    async fn test_partition_and_orphans() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive)
            .with_entry("images/ok.png")
            .with_entry("docs/unused.md");
        let result = reconciler(store)
            .reconcile(
                markers("// @link@:images/ok.png\n// @link@:images/bad.png"),
                &ScanScope::Workspace,
            )
            .await
            .unwrap();

        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.valid[0].normalized_path, "images/ok.png");
        assert_eq!(result.broken.len(), 1);
        assert_eq!(result.broken[0].normalized_path, "images/bad.png");
        assert_eq!(result.orphans, vec![ContentStoreEntry::new("docs/unused.md")]);
        assert!(!result.is_clean());
    }

    #[tokio::test]
    async fn test_outside_markers_are_excluded() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive);
        let result = reconciler(store)
            .reconcile(
                markers("@link@:\"../../etc/passwd\" @link@:C:\\x @link@:https://x.png"),
                &ScanScope::Workspace,
            )
            .await
            .unwrap();
        assert!(result.valid.is_empty());
        assert!(result.broken.is_empty());
        assert_eq!(result.excluded, 3);
    }

    #[tokio::test]
    async fn test_root_marker_always_valid() {
        let store =
            MemoryContentStore::new("/ws/store", CaseFolding::Sensitive).with_entry("a.png");
        let result = reconciler(store)
            .reconcile(markers("@link@:./"), &ScanScope::Workspace)
            .await
            .unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.orphans.len(), 1);
    }

    #[tokio::test]
    async fn test_insensitive_policy_folds_entries() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Insensitive)
            .with_entry("Images/A.png");
        let result = Reconciler::new(Arc::new(store), CaseFolding::Insensitive)
            .reconcile(markers("@link@:images/a.png"), &ScanScope::Workspace)
            .await
            .unwrap();
        assert_eq!(result.valid.len(), 1);
        assert!(result.orphans.is_empty());
    }

    #[tokio::test]
    async fn test_single_file_scope_probes_without_orphans() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive)
            .with_entry("images/ok.png")
            .with_entry("docs/unused.md");
        let result = reconciler(store)
            .reconcile(
                markers("@link@:images/ok.png @link@:images/gone.png"),
                &ScanScope::File(PathBuf::from("/ws/a.js")),
            )
            .await
            .unwrap();
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.broken.len(), 1);
        assert!(result.orphans.is_empty());
    }

    #[tokio::test]
    async fn test_partition_is_exhaustive_and_disjoint() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive)
            .with_entry("a.png")
            .with_entry("c/d.png");
        let input = markers(
            "@link@:a.png @link@:b.png @link@:./c/d.png @link@:../x.png @link@:a.png @link@:/c\\d.png",
        );
        let result = reconciler(store)
            .reconcile(input.clone(), &ScanScope::Workspace)
            .await
            .unwrap();

        let in_scope = input.len() - result.excluded;
        assert_eq!(result.valid.len() + result.broken.len(), in_scope);
        for v in &result.valid {
            assert!(!result.broken.contains(v));
        }
        assert_eq!(result.valid.len(), 4);
        assert_eq!(result.broken.len(), 1);
    }

    #[tokio::test]
    async fn test_pick_list() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive)
            .with_entry("docs/unused.md");
        let result = reconciler(store)
            .reconcile(markers("\n\n// @link@:images/bad.png"), &ScanScope::Workspace)
            .await
            .unwrap();

        let items = result.pick_list(Path::new("/ws"));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, "Remove broken link: images/bad.png");
        assert_eq!(items[0].detail, "a.js:3");
        assert!(matches!(items[0].action, PickAction::Unlink(_)));
        assert_eq!(items[1].label, "Delete orphan asset: docs/unused.md");
        assert!(matches!(items[1].action, PickAction::DeleteOrphan(_)));
    }
}
