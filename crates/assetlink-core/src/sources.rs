//! File providers for marker scanning
//!
//! A [`FileSource`] enumerates candidate files, reads their text (preferring
//! unsaved in-memory content over disk), and applies grouped edits.

use crate::lexer::SourceSpan;
use async_trait::async_trait;
use eyre::{Result, WrapErr, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// File content overlay - maps absolute paths to unsaved content
pub type FileOverlay = HashMap<PathBuf, String>;

/// Include/exclude glob patterns, matched against workspace-relative paths
/// with forward slashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileFilter {
    /// Empty means "all files"
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl FileFilter {
    pub fn new(
        include: impl IntoIterator<Item = impl Into<String>>,
        exclude: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    /// Same excludes, but every file is included.
    pub fn widened(&self) -> Self {
        Self {
            include: Vec::new(),
            exclude: self.exclude.clone(),
        }
    }

    /// Compile the patterns. Invalid patterns are skipped with a warning.
    pub fn compile(&self) -> CompiledFilter {
        CompiledFilter {
            include: (!self.include.is_empty()).then(|| build_set(&self.include)),
            exclude: build_set(&self.exclude),
        }
    }
}

fn build_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(&pattern.replace('\\', "/")) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!("Skipping invalid glob {pattern:?}: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("Failed to build glob set: {e}");
        GlobSet::empty()
    })
}

/// Compiled form of a [`FileFilter`].
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl CompiledFilter {
    /// Whether a workspace-relative file path passes the filter.
    pub fn matches(&self, relative: &str) -> bool {
        let relative = relative.replace('\\', "/");
        if self.exclude.is_match(&relative) {
            return false;
        }
        self.include
            .as_ref()
            .is_none_or(|include| include.is_match(&relative))
    }

    /// Whether everything under a workspace-relative directory is excluded,
    /// so the walker can skip descending into it.
    pub fn excludes_dir(&self, relative_dir: &str) -> bool {
        let relative_dir = relative_dir.replace('\\', "/");
        // probe with a child path: `**/build/**` matches `build/x`, not `build`
        self.exclude.is_match(format!("{relative_dir}/x"))
    }
}

/// Path of `path` relative to `root`, with forward slashes.
pub fn relative_slash(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

/// One replacement in a grouped edit. An empty `new_text` deletes the span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub span: SourceSpan,
    pub new_text: String,
}

impl TextEdit {
    pub fn delete(span: SourceSpan) -> Self {
        Self {
            span,
            new_text: String::new(),
        }
    }

    pub fn insert(offset: usize, new_text: impl Into<String>) -> Self {
        Self {
            span: SourceSpan::new(offset, 0),
            new_text: new_text.into(),
        }
    }
}

/// Apply a group of edits to `text` as one transaction.
///
/// All spans refer to the original text. They must lie on char boundaries
/// and must not overlap; otherwise nothing is applied.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<String> {
    let mut sorted: Vec<&TextEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.span.offset, e.span.length));

    let mut prev_end = 0;
    for edit in &sorted {
        let span = edit.span;
        if span.end() > text.len()
            || !text.is_char_boundary(span.offset)
            || !text.is_char_boundary(span.end())
        {
            bail!(
                "edit {}..{} is outside the text ({} bytes)",
                span.offset,
                span.end(),
                text.len()
            );
        }
        if span.offset < prev_end {
            bail!("edits overlap at byte {}", span.offset);
        }
        prev_end = span.end();
    }

    let mut out = text.to_string();
    for edit in sorted.iter().rev() {
        out.replace_range(edit.span.offset..edit.span.end(), &edit.new_text);
    }
    Ok(out)
}

/// Capability: the set of files markers may live in.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Workspace root; filters match paths relative to it
    fn root(&self) -> &Path;

    /// Absolute paths of all files passing `filter`.
    async fn enumerate(&self, filter: &FileFilter) -> Result<Vec<PathBuf>>;

    /// Files currently open with in-memory content.
    async fn open_documents(&self) -> Vec<PathBuf>;

    /// Current text of a file, unsaved content first.
    async fn read_text(&self, path: &Path) -> Result<String>;

    /// Replace a file's text and persist it.
    async fn write_text(&self, path: &Path, text: &str) -> Result<()>;

    /// Apply a grouped edit to one file and persist it.
    async fn apply_edits(&self, path: &Path, edits: &[TextEdit]) -> Result<()> {
        let text = self.read_text(path).await?;
        let edited = apply_edits(&text, edits)
            .wrap_err_with(|| format!("Failed to edit {}", path.display()))?;
        self.write_text(path, &edited).await
    }
}

/// Write through a sibling temp file and rename it into place.
pub async fn write_atomic(path: &Path, text: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| eyre::eyre!("Not a file path: {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.assetlink-tmp", file_name.to_string_lossy()));

    tokio::fs::write(&tmp, text)
        .await
        .wrap_err_with(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).wrap_err_with(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

/// Filesystem-backed [`FileSource`] with an overlay for unsaved buffers.
pub struct FsFileSource {
    root: PathBuf,
    overlay: RwLock<FileOverlay>,
}

impl FsFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overlay: RwLock::new(FileOverlay::new()),
        }
    }

    /// Register unsaved content for a file.
    pub async fn open(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.overlay
            .write()
            .await
            .insert(path.into(), content.into());
    }

    /// Drop unsaved content for a file.
    pub async fn close(&self, path: &Path) {
        self.overlay.write().await.remove(path);
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(feature = "walk")]
fn walk_files(root: &Path, filter: &CompiledFilter) -> Vec<PathBuf> {
    use ignore::WalkBuilder;

    let prune_root = root.to_path_buf();
    let prune = filter.clone();
    let walker = WalkBuilder::new(root)
        .follow_links(true)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir
                && entry.depth() > 0
                && prune.excludes_dir(&relative_slash(&prune_root, entry.path())))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if filter.matches(&relative_slash(root, path)) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

#[async_trait]
impl FileSource for FsFileSource {
    fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(feature = "walk")]
    async fn enumerate(&self, filter: &FileFilter) -> Result<Vec<PathBuf>> {
        let root = self.root.clone();
        let compiled = filter.compile();
        tokio::task::spawn_blocking(move || walk_files(&root, &compiled))
            .await
            .wrap_err("File walker task failed")
    }

    #[cfg(not(feature = "walk"))]
    async fn enumerate(&self, _filter: &FileFilter) -> Result<Vec<PathBuf>> {
        bail!("Directory walking requires the `walk` feature")
    }

    async fn open_documents(&self) -> Vec<PathBuf> {
        let overlay = self.overlay.read().await;
        let mut paths: Vec<PathBuf> = overlay.keys().cloned().collect();
        paths.sort();
        paths
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        let path = self.absolute(path);
        if let Some(content) = self.overlay.read().await.get(&path) {
            return Ok(content.clone());
        }
        tokio::fs::read_to_string(&path)
            .await
            .wrap_err_with(|| format!("Failed to read {}", path.display()))
    }

    async fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        let path = self.absolute(path);
        write_atomic(&path, text).await?;
        let mut overlay = self.overlay.write().await;
        if let Some(content) = overlay.get_mut(&path) {
            *content = text.to_string();
        }
        Ok(())
    }
}

/// In-memory [`FileSource`] (useful for testing and embedding)
pub struct MemoryFileSource {
    root: PathBuf,
    files: RwLock<HashMap<PathBuf, String>>,
    open: BTreeSet<PathBuf>,
}

impl MemoryFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(HashMap::new()),
            open: BTreeSet::new(),
        }
    }

    /// Add a file with content (path relative to the root)
    pub fn add(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        let path = self.root.join(path);
        self.files.get_mut().insert(path, content.into());
        self
    }

    /// Add a file that is also reported as an open document
    pub fn add_open(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        let path = self.root.join(path);
        self.open.insert(path.clone());
        self.files.get_mut().insert(path, content.into());
        self
    }

    /// Current content of a file
    pub async fn content(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.read().await.get(&self.root.join(path)).cloned()
    }
}

#[async_trait]
impl FileSource for MemoryFileSource {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn enumerate(&self, filter: &FileFilter) -> Result<Vec<PathBuf>> {
        let compiled = filter.compile();
        let files = self.files.read().await;
        let mut paths: Vec<PathBuf> = files
            .keys()
            .filter(|p| compiled.matches(&relative_slash(&self.root, p)))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn open_documents(&self) -> Vec<PathBuf> {
        self.open.iter().cloned().collect()
    }

    async fn read_text(&self, path: &Path) -> Result<String> {
        let path = self.root.join(path);
        self.files
            .read()
            .await
            .get(&path)
            .cloned()
            .ok_or_else(|| eyre::eyre!("No such file: {}", path.display()))
    }

    async fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        let path = self.root.join(path);
        self.files.write().await.insert(path, text.to_string());
        Ok(())
    }
}
