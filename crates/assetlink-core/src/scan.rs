//! Workspace scanning
//!
//! Enumerates candidate files, reads them through a [`FileSource`] with a
//! bounded pool of workers, and aggregates the markers found per file.

use crate::config::{ConfigSource, Settings};
use crate::lexer::{MarkerOccurrence, extract_markers};
use crate::path::CaseFolding;
use crate::sources::{FileFilter, FileSource};
use crate::syntax::{CommentMap, SyntaxRegistry};
use eyre::Result;
use futures_util::future::join_all;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Directories never scanned: version control, dependencies, build output.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/.svn/**",
    "**/.hg/**",
    "**/.vscode/**",
    "**/out/**",
    "**/dist/**",
    "**/build/**",
    "**/coverage/**",
];

/// How many candidate paths to log at debug level
const SAMPLE_SIZE: usize = 10;

/// Number of scanning workers: available parallelism, at least 2.
pub fn scan_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(2)
}

/// What a scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanScope {
    /// Every candidate file; orphans are computed
    Workspace,
    /// One file; the store listing is not consulted
    File(PathBuf),
}

impl ScanScope {
    pub fn is_workspace(&self) -> bool {
        matches!(self, ScanScope::Workspace)
    }
}

/// Cooperative cancellation shared between a caller and a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Include globs derived from the configured extensions; empty means "all files".
pub fn derived_include(map: &CommentMap) -> Vec<String> {
    let extensions: Vec<&str> = map.extensions().collect();
    match extensions.as_slice() {
        [] => Vec::new(),
        [ext] => vec![format!("**/*.{ext}")],
        many => vec![format!("**/*.{{{}}}", many.join(","))],
    }
}

/// The filter a workspace scan enumerates with.
///
/// Explicit include globs win over the derived ones; excludes are the
/// default denylist plus any configured extras.
pub fn scan_filter(settings: &Settings, map: &CommentMap) -> FileFilter {
    let include = if settings.include.is_empty() {
        derived_include(map)
    } else {
        settings.include.clone()
    };
    let exclude = DEFAULT_EXCLUDES
        .iter()
        .map(|s| s.to_string())
        .chain(settings.exclude.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    FileFilter { include, exclude }
}

/// Aggregated output of one scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub scope: ScanScope,
    /// Files with at least one marker
    pub files: BTreeMap<PathBuf, Vec<MarkerOccurrence>>,
    /// Number of files read
    pub scanned: usize,
    /// Whether enumeration fell back to "all files"
    pub widened: bool,
    /// Whether the scan stopped early
    pub cancelled: bool,
}

impl ScanResult {
    pub fn markers(&self) -> impl Iterator<Item = &MarkerOccurrence> {
        self.files.values().flatten()
    }

    pub fn marker_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Candidate files plus how they were found.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub files: Vec<PathBuf>,
    pub widened: bool,
}

/// Scans files for markers.
pub struct WorkspaceScanner {
    files: Arc<dyn FileSource>,
    config: Arc<dyn ConfigSource>,
    registry: Arc<SyntaxRegistry>,
}

impl WorkspaceScanner {
    pub fn new(
        files: Arc<dyn FileSource>,
        config: Arc<dyn ConfigSource>,
        registry: Arc<SyntaxRegistry>,
    ) -> Self {
        Self {
            files,
            config,
            registry,
        }
    }

    pub fn file_source(&self) -> &Arc<dyn FileSource> {
        &self.files
    }

    /// Filter for the current configuration.
    pub fn filter(&self) -> FileFilter {
        scan_filter(&self.config.settings(), &self.registry.effective_map())
    }

    /// Enumerate candidate files.
    ///
    /// Falls back to "all files" once if the primary filter finds nothing,
    /// and always merges in open documents, even excluded ones.
    pub async fn candidates(&self) -> Result<Candidates> {
        let filter = self.filter();
        let mut files = self.files.enumerate(&filter).await?;
        let mut widened = false;

        if files.is_empty() && !filter.include.is_empty() {
            info!("No files matched {:?}; scanning all files", filter.include);
            files = self.files.enumerate(&filter.widened()).await?;
            widened = true;
        }

        let mut seen: BTreeSet<PathBuf> = files.iter().cloned().collect();
        for doc in self.files.open_documents().await {
            if seen.insert(doc.clone()) {
                files.push(doc);
            }
        }

        debug!(
            "{} candidate files, e.g. {:?}",
            files.len(),
            files.iter().take(SAMPLE_SIZE).collect::<Vec<_>>()
        );
        Ok(Candidates { files, widened })
    }

    /// Scan the given scope.
    pub async fn scan(&self, scope: ScanScope, cancel: &CancellationFlag) -> Result<ScanResult> {
        match scope {
            ScanScope::File(path) => {
                let markers = self.rescan_one(&path).await;
                let mut files = BTreeMap::new();
                if !markers.is_empty() {
                    files.insert(path.clone(), markers);
                }
                Ok(ScanResult {
                    scope: ScanScope::File(path),
                    files,
                    scanned: 1,
                    widened: false,
                    cancelled: false,
                })
            }
            ScanScope::Workspace => {
                let candidates = self.candidates().await?;
                let case = self.config.settings().case;
                let scanned = candidates.files.len();
                let files = self.read_all(candidates.files, case, cancel).await;
                let result = ScanResult {
                    scope: ScanScope::Workspace,
                    files,
                    scanned,
                    widened: candidates.widened,
                    cancelled: cancel.is_cancelled(),
                };
                info!(
                    "Scanned {} files, {} markers in {} files{}",
                    result.scanned,
                    result.marker_count(),
                    result.files.len(),
                    if result.cancelled { " (cancelled)" } else { "" }
                );
                Ok(result)
            }
        }
    }

    /// Re-read one file. Unreadable files yield no markers.
    pub async fn rescan_one(&self, path: &Path) -> Vec<MarkerOccurrence> {
        let case = self.config.settings().case;
        self.read_markers(path, case).await
    }

    async fn read_markers(&self, path: &Path, case: CaseFolding) -> Vec<MarkerOccurrence> {
        match self.files.read_text(path).await {
            Ok(text) => extract_markers(path, &text, case),
            Err(e) => {
                debug!("Skipping {}: {e:#}", path.display());
                Vec::new()
            }
        }
    }

    async fn read_all(
        &self,
        paths: Vec<PathBuf>,
        case: CaseFolding,
        cancel: &CancellationFlag,
    ) -> BTreeMap<PathBuf, Vec<MarkerOccurrence>> {
        let queue = Mutex::new(VecDeque::from(paths));
        let results = Mutex::new(BTreeMap::new());

        let queue = &queue;
        let results = &results;
        join_all((0..scan_workers()).map(|_| async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                let Some(path) = next else { break };
                let markers = self.read_markers(&path, case).await;
                if !markers.is_empty() {
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(path, markers);
                }
            }
        }))
        .await;

        std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Live per-file marker view, kept current with cheap single-file refreshes.
#[derive(Debug, Default)]
pub struct ScanCache {
    files: BTreeMap<PathBuf, Vec<MarkerOccurrence>>,
    widened: bool,
    version: u64,
}

impl ScanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh workspace scan.
    pub async fn full_refresh(
        &mut self,
        scanner: &WorkspaceScanner,
        cancel: &CancellationFlag,
    ) -> Result<ScanResult> {
        let result = scanner.scan(ScanScope::Workspace, cancel).await?;
        self.files = result.files.clone();
        self.widened = result.widened;
        self.version += 1;
        Ok(result)
    }

    /// Re-scan one file; its entry is replaced, or removed if it now has no
    /// markers. Returns the file's marker count.
    pub async fn refresh_one(&mut self, scanner: &WorkspaceScanner, path: &Path) -> usize {
        let markers = scanner.rescan_one(path).await;
        let count = markers.len();
        if markers.is_empty() {
            self.files.remove(path);
        } else {
            self.files.insert(path.to_path_buf(), markers);
        }
        self.version += 1;
        count
    }

    /// Drop a file (e.g. it was deleted).
    pub fn remove(&mut self, path: &Path) {
        if self.files.remove(path).is_some() {
            self.version += 1;
        }
    }

    /// Whether the last full refresh fell back to "all files"
    pub fn widened(&self) -> bool {
        self.widened
    }

    /// The filter the last full refresh effectively enumerated with.
    pub fn effective_filter(&self, scanner: &WorkspaceScanner) -> FileFilter {
        let filter = scanner.filter();
        if self.widened { filter.widened() } else { filter }
    }

    pub fn get(&self, path: &Path) -> Option<&[MarkerOccurrence]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn markers(&self) -> Vec<MarkerOccurrence> {
        self.files.values().flatten().cloned().collect()
    }

    pub fn marker_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Bumped on every change
    pub fn version(&self) -> u64 {
        self.version
    }
}
