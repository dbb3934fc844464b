//! Content store capability
//!
//! The content store is a directory tree of attachable assets. Entries are
//! addressed by their forward-slash path relative to the store root.

use crate::path::{CaseFolding, is_contained, normalize, to_slash};
use async_trait::async_trait;
use eyre::{Result, WrapErr, bail};
use facet::Facet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// A file that exists under the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Facet)]
pub struct ContentStoreEntry {
    /// Path relative to the store root, forward slashes, original case
    pub relative_path: String,
}

impl ContentStoreEntry {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }

    /// Comparison key, normalized the same way as marker paths
    pub fn key(&self, case: CaseFolding) -> String {
        normalize(&self.relative_path, case)
    }
}

/// Capability: list, probe, delete and add store entries.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Absolute store root
    fn root(&self) -> &Path;

    /// Every file under the root. A missing root lists as empty.
    async fn list(&self) -> Result<Vec<ContentStoreEntry>>;

    /// Whether a normalized path exists under the root.
    async fn exists(&self, normalized: &str) -> bool;

    /// Delete one entry. Paths outside the root are refused.
    async fn delete(&self, relative_path: &str) -> Result<()>;

    /// Copy `source` to `<sub_dir>/<file_name>` without overwriting anything,
    /// appending `-1`, `-2`, ... to the stem on collision. Returns the
    /// store-relative path of the copy.
    async fn import(&self, source: &Path, sub_dir: &str, file_name: &str) -> Result<String>;
}

/// `name` with `-n` inserted before the extension (`a.png` -> `a-2.png`).
pub fn suffixed_name(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}-{n}{}", &file_name[..dot], &file_name[dot..]),
        _ => format!("{file_name}-{n}"),
    }
}

fn join_relative(sub_dir: &str, file_name: &str) -> String {
    let sub_dir = sub_dir.trim_matches('/');
    if sub_dir.is_empty() {
        file_name.to_string()
    } else {
        format!("{sub_dir}/{file_name}")
    }
}

/// Filesystem-backed [`ContentStore`].
pub struct FsContentStore {
    root: PathBuf,
    case: CaseFolding,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>, case: CaseFolding) -> Self {
        Self {
            root: root.into(),
            case,
        }
    }

    /// Find `key` by walking it one segment at a time and matching entry
    /// names by their folded form. Used when the key was folded but the
    /// filesystem is not.
    async fn find_folded(&self, key: &str) -> Option<PathBuf> {
        let mut current = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            let mut read_dir = tokio::fs::read_dir(&current).await.ok()?;
            let mut next = None;
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let name = entry.file_name();
                if normalize(&name.to_string_lossy(), self.case) == segment {
                    next = Some(entry.path());
                    break;
                }
            }
            current = next?;
        }
        Some(current)
    }

    fn checked_path(&self, relative: &str) -> Result<PathBuf> {
        let key = normalize(relative, CaseFolding::Sensitive);
        if !is_contained(&key, &self.root, self.case) {
            bail!("{relative:?} is outside the content store");
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    fn root(&self) -> &Path {
        &self.root
    }

    /// Symlinks are skipped, so a linked file or directory is never
    /// reported as an orphan (and never deleted by cleanup). Markers that
    /// point through a link still resolve via [`ContentStore::exists`].
    async fn list(&self) -> Result<Vec<ContentStoreEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == self.root => {
                    debug!("Content store {} does not exist yet", self.root.display());
                    return Ok(Vec::new());
                }
                Err(e) => {
                    return Err(e).wrap_err_with(|| format!("Failed to list {}", dir.display()));
                }
            };
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .wrap_err_with(|| format!("Failed to list {}", dir.display()))?
            {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_symlink() {
                    debug!("Not listing symlink {}", path.display());
                } else if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    entries.push(ContentStoreEntry::new(to_slash(relative)));
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn exists(&self, normalized: &str) -> bool {
        if !is_contained(normalized, &self.root, self.case) {
            return false;
        }
        if tokio::fs::metadata(self.root.join(normalized)).await.is_ok() {
            return true;
        }
        match self.case {
            CaseFolding::Sensitive => false,
            CaseFolding::Insensitive => self.find_folded(normalized).await.is_some(),
        }
    }

    async fn delete(&self, relative_path: &str) -> Result<()> {
        let path = self.checked_path(relative_path)?;
        tokio::fs::remove_file(&path)
            .await
            .wrap_err_with(|| format!("Failed to delete {}", path.display()))
    }

    async fn import(&self, source: &Path, sub_dir: &str, file_name: &str) -> Result<String> {
        let dir = self.checked_path(sub_dir)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .wrap_err_with(|| format!("Failed to create {}", dir.display()))?;

        let mut n = 0;
        let name = loop {
            let candidate = suffixed_name(file_name, n);
            if !tokio::fs::try_exists(dir.join(&candidate)).await? {
                break candidate;
            }
            n += 1;
        };

        let target = dir.join(&name);
        tokio::fs::copy(source, &target).await.wrap_err_with(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                target.display()
            )
        })?;
        debug!("Imported {} as {}", source.display(), target.display());
        Ok(join_relative(sub_dir, &name))
    }
}

/// In-memory [`ContentStore`] (useful for testing)
pub struct MemoryContentStore {
    root: PathBuf,
    case: CaseFolding,
    entries: RwLock<BTreeSet<String>>,
}

impl MemoryContentStore {
    pub fn new(root: impl Into<PathBuf>, case: CaseFolding) -> Self {
        Self {
            root: root.into(),
            case,
            entries: RwLock::new(BTreeSet::new()),
        }
    }

    /// Add an entry (forward-slash path relative to the root)
    pub fn with_entry(mut self, relative_path: impl Into<String>) -> Self {
        self.entries.get_mut().insert(relative_path.into());
        self
    }

    /// Whether an entry with exactly this relative path is present
    pub async fn contains(&self, relative_path: &str) -> bool {
        self.entries.read().await.contains(relative_path)
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn list(&self) -> Result<Vec<ContentStoreEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().map(ContentStoreEntry::new).collect())
    }

    async fn exists(&self, normalized: &str) -> bool {
        if !is_contained(normalized, &self.root, self.case) {
            return false;
        }
        let entries = self.entries.read().await;
        entries.iter().any(|e| {
            let key = normalize(e, self.case);
            key == normalized || key.starts_with(&format!("{normalized}/"))
        })
    }

    async fn delete(&self, relative_path: &str) -> Result<()> {
        if !self.entries.write().await.remove(relative_path) {
            bail!("No such entry: {relative_path}");
        }
        Ok(())
    }

    async fn import(&self, _source: &Path, sub_dir: &str, file_name: &str) -> Result<String> {
        let mut entries = self.entries.write().await;
        let mut n = 0;
        loop {
            let relative = join_relative(sub_dir, &suffixed_name(file_name, n));
            if !entries.contains(&relative) {
                entries.insert(relative.clone());
                return Ok(relative);
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name("a.png", 0), "a.png");
        assert_eq!(suffixed_name("a.png", 2), "a-2.png");
        assert_eq!(suffixed_name("archive.tar.gz", 1), "archive.tar-1.gz");
        assert_eq!(suffixed_name("README", 1), "README-1");
        assert_eq!(suffixed_name(".env", 1), ".env-1");
    }

    #[tokio::test]
    async fn test_fs_store_list_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path().join("nope"), CaseFolding::Sensitive);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_list_exists_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        std::fs::create_dir_all(root.join("images/nested")).unwrap();
        std::fs::write(root.join("images/a.png"), "a").unwrap();
        std::fs::write(root.join("images/nested/b.png"), "b").unwrap();
        std::fs::write(dir.path().join("outside.txt"), "x").unwrap();

        let store = FsContentStore::new(&root, CaseFolding::Sensitive);
        let entries = store.list().await.unwrap();
        assert_eq!(
            entries,
            vec![
                ContentStoreEntry::new("images/a.png"),
                ContentStoreEntry::new("images/nested/b.png"),
            ]
        );

        assert!(store.exists("images/a.png").await);
        assert!(!store.exists("images/missing.png").await);
        assert!(!store.exists("../outside.txt").await);

        assert!(store.delete("../outside.txt").await.is_err());
        assert!(dir.path().join("outside.txt").exists());

        store.delete("images/a.png").await.unwrap();
        assert!(!root.join("images/a.png").exists());
        assert!(store.delete("images/a.png").await.is_err());
    }

    #[tokio::test]
    async fn test_fs_store_import_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shot.png");
        std::fs::write(&source, "pixels").unwrap();

        let store = FsContentStore::new(dir.path().join("store"), CaseFolding::Sensitive);
        let first = store.import(&source, "images", "shot.png").await.unwrap();
        let second = store.import(&source, "images", "shot.png").await.unwrap();
        let third = store.import(&source, "images", "shot.png").await.unwrap();
        assert_eq!(first, "images/shot.png");
        assert_eq!(second, "images/shot-1.png");
        assert_eq!(third, "images/shot-2.png");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("store/images/shot-2.png")).unwrap(),
            "pixels"
        );

        assert!(store.import(&source, "../escape", "x.png").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryContentStore::new("/store", CaseFolding::Insensitive)
            .with_entry("Images/A.png");
        assert!(store.exists("images/a.png").await);
        assert!(store.exists("images").await);
        assert!(!store.exists("images/b.png").await);

        let rel = store.import(Path::new("/tmp/A.png"), "Images", "A.png").await.unwrap();
        assert_eq!(rel, "Images/A-1.png");

        store.delete("Images/A.png").await.unwrap();
        assert!(!store.contains("Images/A.png").await);
    }

    #[tokio::test]
    async fn test_fs_store_insensitive_exists_matches_any_case() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        std::fs::create_dir_all(root.join("Images")).unwrap();
        std::fs::write(root.join("Images/Logo.png"), "png").unwrap();

        let store = FsContentStore::new(&root, CaseFolding::Insensitive);
        assert!(store.exists("images/logo.png").await);
        assert!(store.exists("images").await);
        assert!(!store.exists("images/other.png").await);

        let store = FsContentStore::new(&root, CaseFolding::Sensitive);
        assert!(store.exists("Images/Logo.png").await);
        assert!(!store.exists("images/logo.png").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fs_store_list_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let shared = dir.path().join("shared");
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::create_dir_all(&shared).unwrap();
        std::fs::write(root.join("images/a.png"), "a").unwrap();
        std::fs::write(shared.join("b.png"), "b").unwrap();
        std::os::unix::fs::symlink(&shared, root.join("linked")).unwrap();

        let store = FsContentStore::new(&root, CaseFolding::Sensitive);
        assert_eq!(
            store.list().await.unwrap(),
            vec![ContentStoreEntry::new("images/a.png")]
        );
        // markers can still point through the link
        assert!(store.exists("linked/b.png").await);
    }
}
