//! assetlink-core - Core library for asset marker integrity
//!
//! This crate provides the building blocks for:
//! - Extracting `@link@` markers from arbitrary source files
//! - Mapping file extensions to line comment tokens
//! - Reconciling markers against a content store (valid, broken, orphaned)
//! - Cleaning up broken markers and orphan store files in grouped edits
//!
//! # Features
//!
//! - `walk` - Enable directory walking in [`FsFileSource`] (brings in `ignore`)
//!
//! # Markers
//!
//! A marker is the `@link@` tag, a colon (ASCII or full-width) and a path,
//! usually inside a line comment:
//!
//! ```text
//! // @link@:images/foo.png
//! # @link@: "docs/spec.md"
//! -- @link@:'images/logo.svg'
//! ```
//!
//! Extract markers from text with [`extract_markers`]:
//!
//! ```
//! use assetlink_core::{CaseFolding, PathQuoting, extract_markers};
//! use std::path::Path;
//!
//! let text = "fn main() {}\n# @link@: \"docs/my spec.md\"\n";
//! let markers = extract_markers(Path::new("build.py"), text, CaseFolding::Sensitive);
//!
//! assert_eq!(markers.len(), 1);
//! assert_eq!(markers[0].raw_path, "docs/my spec.md");
//! assert_eq!(markers[0].quoting, PathQuoting::DoubleQuoted);
//! assert_eq!(markers[0].line, 1);
//! ```
//!
//! # Scanning and reconciling
//!
//! The scanner and reconciler only talk to collaborator traits
//! ([`ConfigSource`], [`FileSource`], [`ContentStore`]), so they run the
//! same over the filesystem or in memory:
//!
//! ```ignore
//! use assetlink_core::*;
//! use std::sync::Arc;
//!
//! let config: Arc<dyn ConfigSource> = Arc::new(SharedConfig::new(
//!     Settings::new("/ws").with_rules(["{js}-{//}"]),
//! ));
//! let registry = Arc::new(SyntaxRegistry::new(config.clone()));
//! let files = Arc::new(FsFileSource::new("/ws"));
//! let store = Arc::new(FsContentStore::new("/ws/.vscode/code-assets", CaseFolding::Sensitive));
//!
//! let scanner = WorkspaceScanner::new(files, config, registry);
//! let scan = scanner.scan(ScanScope::Workspace, &CancellationFlag::new()).await?;
//! let result = Reconciler::new(store, CaseFolding::Sensitive)
//!     .reconcile(scan.markers().cloned(), &ScanScope::Workspace)
//!     .await?;
//! println!("{} broken, {} orphans", result.broken.len(), result.orphans.len());
//! ```

mod attach;
mod cleanup;
mod config;
mod lexer;
mod path;
mod reconcile;
mod scan;
mod sources;
mod store;
mod syntax;

pub use attach::{
    AttachedAsset, IMAGE_EXTENSIONS, attach_files, default_sub_dir, insert_markers,
    insertion_edit, is_image, marker_lines, require_rule, sanitize_base_name, target_file_name,
};
pub use cleanup::{
    CleanupExecutor, CleanupFailure, CleanupReport, CleanupSelection, expand_deletion,
    merge_spans,
};
pub use config::{ConfigSource, DEFAULT_STORE_ROOT, Settings, SharedConfig};
pub use lexer::{
    MARKER_TAG, MarkerOccurrence, PathQuoting, SourceSpan, extract_markers, format_marker,
    locate_marker,
};
pub use path::{CaseFolding, is_contained, normalize, resolve_lexically, to_slash};
pub use reconcile::{PickAction, PickItem, ReconciliationResult, Reconciler, probe_workers};
pub use scan::{
    CancellationFlag, Candidates, DEFAULT_EXCLUDES, ScanCache, ScanResult, ScanScope,
    WorkspaceScanner, derived_include, scan_filter, scan_workers,
};
pub use sources::{
    CompiledFilter, FileFilter, FileOverlay, FileSource, FsFileSource, MemoryFileSource,
    TextEdit, apply_edits, relative_slash, write_atomic,
};
pub use store::{ContentStore, ContentStoreEntry, FsContentStore, MemoryContentStore, suffixed_name};
pub use syntax::{
    COMMENT_PREFIX_TOKENS, CommentMap, CommentRule, DEFAULT_COMMENT_TOKEN, SyntaxRegistry,
    language_comment_token, language_for_file, line_comment_token, remove_extensions,
};
