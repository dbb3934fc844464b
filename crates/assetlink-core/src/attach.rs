//! Attaching external files to source code
//!
//! Files are copied into the content store under a sanitized name and a
//! marker line per copy is inserted into the target file.

use crate::lexer::format_marker;
use crate::sources::{FileSource, TextEdit};
use crate::store::ContentStore;
use crate::syntax::{CommentMap, line_comment_token};
use eyre::{Result, bail};
use facet::Facet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Extensions stored under `images/`; everything else goes to `docs/`.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp"];

const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Store sub-directory for a file when none is given.
pub fn default_sub_dir(path: &Path) -> &'static str {
    if is_image(path) { "images" } else { "docs" }
}

fn clean_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if FORBIDDEN_NAME_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Make a base name (no extension) safe for the store.
///
/// Characters not allowed in file names become spaces, the result is
/// trimmed and whitespace runs become `-`. An empty result falls back to
/// the cleaned `fallback`, then to `asset`.
pub fn sanitize_base_name(name: &str, fallback: &str) -> String {
    let cleaned = clean_name(name);
    if !cleaned.is_empty() {
        return cleaned;
    }
    let cleaned = clean_name(fallback);
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}

/// Store file name for `source`, optionally renamed; the extension is kept.
pub fn target_file_name(source: &Path, rename: Option<&str>) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = sanitize_base_name(rename.unwrap_or(&stem), &stem);
    match source.extension() {
        Some(ext) => format!("{base}.{}", ext.to_string_lossy()),
        None => base,
    }
}

/// One file copied into the store.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct AttachedAsset {
    pub source: PathBuf,
    /// Store-relative path of the copy, forward slashes
    pub relative_path: String,
}

/// Copy files into the store. `sub_dir` of `None` picks `images` or `docs`
/// per file; `rename` replaces each file's stem (collisions get suffixes).
pub async fn attach_files(
    store: &dyn ContentStore,
    sources: &[PathBuf],
    sub_dir: Option<&str>,
    rename: Option<&str>,
) -> Result<Vec<AttachedAsset>> {
    let mut attached = Vec::with_capacity(sources.len());
    for source in sources {
        let dir = sub_dir.unwrap_or_else(|| default_sub_dir(source));
        let relative_path = store
            .import(source, dir, &target_file_name(source, rename))
            .await?;
        info!("Attached {} as {relative_path}", source.display());
        attached.push(AttachedAsset {
            source: source.clone(),
            relative_path,
        });
    }
    Ok(attached)
}

/// Refuse to insert into files whose extension has no configured rule.
pub fn require_rule(map: &CommentMap, target: &Path) -> Result<()> {
    if map.token_for_file(target).is_none() {
        bail!(
            "No comment rule for {}; add one (e.g. {{{}}}-{{//}}) to the config first",
            target.display(),
            target
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "ext".to_string())
        );
    }
    Ok(())
}

/// Marker lines for a target file, one per store-relative path.
pub fn marker_lines(map: &CommentMap, target: &Path, relative_paths: &[String]) -> Vec<String> {
    let token = line_comment_token(map, None, target);
    relative_paths
        .iter()
        .map(|rel| format_marker(token, rel))
        .collect()
}

/// Insert `lines` before 0-based line `at` (or at the end of the text when
/// `at` is `None` or past the last line).
pub fn insertion_edit(text: &str, at: Option<usize>, lines: &[String]) -> TextEdit {
    let block = lines.join("\n");
    let line_offset = at.and_then(|at| {
        if at == 0 {
            return Some(0);
        }
        text.match_indices('\n')
            .nth(at - 1)
            .map(|(i, _)| i + 1)
            .filter(|&offset| offset < text.len())
    });
    match line_offset {
        Some(offset) => TextEdit::insert(offset, format!("{block}\n")),
        None if text.is_empty() || text.ends_with('\n') => {
            TextEdit::insert(text.len(), format!("{block}\n"))
        }
        None => TextEdit::insert(text.len(), format!("\n{block}")),
    }
}

/// Insert marker lines into `target` through the file source.
pub async fn insert_markers(
    files: &dyn FileSource,
    target: &Path,
    at: Option<usize>,
    lines: &[String],
) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let text = files.read_text(target).await?;
    files
        .apply_edits(target, &[insertion_edit(&text, at, lines)])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::CaseFolding;
    use crate::sources::{MemoryFileSource, apply_edits};
    use crate::store::MemoryContentStore;

    #[test]
    fn test_sanitize_base_name() {
        assert_eq!(sanitize_base_name("my screenshot", "x"), "my-screenshot");
        assert_eq!(sanitize_base_name("  a:b*c?  ", "x"), "a-b-c");
        assert_eq!(sanitize_base_name("a   \t b", "x"), "a-b");
        assert_eq!(sanitize_base_name("<>|", "orig name"), "orig-name");
        assert_eq!(sanitize_base_name("", ""), "asset");
    }

    #[test]
    fn test_target_file_name() {
        assert_eq!(target_file_name(Path::new("/tmp/My Shot.PNG"), None), "My-Shot.PNG");
        assert_eq!(target_file_name(Path::new("/tmp/a.md"), Some("design notes")), "design-notes.md");
        assert_eq!(target_file_name(Path::new("/tmp/LICENSE"), None), "LICENSE");
    }

    #[test]
    fn test_default_sub_dir() {
        assert_eq!(default_sub_dir(Path::new("a.PNG")), "images");
        assert_eq!(default_sub_dir(Path::new("a.webp")), "images");
        assert_eq!(default_sub_dir(Path::new("a.pdf")), "docs");
        assert_eq!(default_sub_dir(Path::new("README")), "docs");
    }

    #[test]
    fn test_require_rule() {
        let map = CommentMap::compile(&["{py}-{#}"]);
        assert!(require_rule(&map, Path::new("a.py")).is_ok());
        assert!(require_rule(&map, Path::new("a.js")).is_err());
    }

    #[test]
    fn test_marker_lines_use_rule_token() {
        let map = CommentMap::compile(&["{py}-{#}"]);
        let lines = marker_lines(&map, Path::new("a.py"), &["images/a.png".to_string()]);
        assert_eq!(lines, vec!["# @link@:images/a.png"]);
    }

    #[test]
    fn test_insertion_edit() {
        let lines = vec!["// @link@:a.png".to_string(), "// @link@:b.png".to_string()];
        let insert = |text: &str, at| apply_edits(text, &[insertion_edit(text, at, &lines)]).unwrap();

        assert_eq!(insert("x\ny\n", Some(1)), "x\n// @link@:a.png\n// @link@:b.png\ny\n");
        assert_eq!(insert("x\ny\n", Some(0)), "// @link@:a.png\n// @link@:b.png\nx\ny\n");
        assert_eq!(insert("x\ny\n", None), "x\ny\n// @link@:a.png\n// @link@:b.png\n");
        assert_eq!(insert("x", None), "x\n// @link@:a.png\n// @link@:b.png");
        assert_eq!(insert("x\n", Some(9)), "x\n// @link@:a.png\n// @link@:b.png\n");
        assert_eq!(insert("", None), "// @link@:a.png\n// @link@:b.png\n");
    }

    #[tokio::test]
    async fn test_attach_and_insert() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive).with_entry("images/shot.png");
        let attached = attach_files(
            &store,
            &[PathBuf::from("/tmp/shot.png"), PathBuf::from("/tmp/spec v2.md")],
            None,
            None,
        )
        .await
        .unwrap();
        let rels: Vec<String> = attached.iter().map(|a| a.relative_path.clone()).collect();
        assert_eq!(rels, vec!["images/shot-1.png", "docs/spec-v2.md"]);

        let files = MemoryFileSource::new("/ws").add("main.py", "print(1)\n");
        let map = CommentMap::compile(&["{py}-{#}"]);
        let lines = marker_lines(&map, Path::new("main.py"), &rels);
        insert_markers(&files, Path::new("main.py"), Some(0), &lines)
            .await
            .unwrap();
        assert_eq!(
            files.content("main.py").await.unwrap(),
            "# @link@:images/shot-1.png\n# @link@:docs/spec-v2.md\nprint(1)\n"
        );
    }

    #[tokio::test]
    async fn test_attach_with_rename() {
        let store = MemoryContentStore::new("/ws/store", CaseFolding::Sensitive);
        let attached = attach_files(
            &store,
            &[PathBuf::from("/tmp/IMG_0042.png"), PathBuf::from("/tmp/other.png")],
            Some("diagrams"),
            Some("login flow"),
        )
        .await
        .unwrap();
        let rels: Vec<&str> = attached.iter().map(|a| a.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["diagrams/login-flow.png", "diagrams/login-flow-1.png"]);

        // a name that sanitizes to nothing keeps the original stem
        let attached = attach_files(&store, &[PathBuf::from("/tmp/keep.md")], None, Some("???"))
            .await
            .unwrap();
        assert_eq!(attached[0].relative_path, "docs/keep.md");
    }
}
