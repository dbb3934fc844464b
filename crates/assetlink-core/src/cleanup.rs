//! Cleanup of broken markers and orphan store entries
//!
//! Marker removals are grouped per file and applied as one edit per file.
//! Orphans are deleted one at a time. Every item is attempted; failures are
//! collected into the [`CleanupReport`] instead of aborting.

use crate::lexer::{MarkerOccurrence, SourceSpan, locate_marker};
use crate::path::CaseFolding;
use crate::reconcile::{PickAction, PickItem};
use crate::scan::CancellationFlag;
use crate::sources::{FileSource, TextEdit, apply_edits};
use crate::store::{ContentStore, ContentStoreEntry};
use crate::syntax::COMMENT_PREFIX_TOKENS;
use facet::Facet;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Widen a marker's span so removing it leaves no dangling comment token.
///
/// Leftward: whitespace, then one comment token, then the whitespace before
/// it; or to the start of the line if only whitespace precedes the marker.
/// Rightward: to the end of the line (not including the line break) if only
/// whitespace follows.
pub fn expand_deletion(text: &str, span: SourceSpan) -> SourceSpan {
    let line_start = text[..span.offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut line_end = text[span.end()..]
        .find('\n')
        .map(|i| span.end() + i)
        .unwrap_or(text.len());
    if line_end > span.end() && text[..line_end].ends_with('\r') {
        line_end -= 1;
    }

    let before = &text[line_start..span.offset];
    let after = &text[span.end()..line_end];

    let trimmed = before.trim_end();
    let start = match COMMENT_PREFIX_TOKENS
        .iter()
        .find(|token| trimmed.ends_with(*token))
    {
        Some(token) => {
            let without_token = &trimmed[..trimmed.len() - token.len()];
            line_start + without_token.trim_end().len()
        }
        None if trimmed.is_empty() => line_start,
        None => span.offset,
    };

    let end = if after.trim().is_empty() {
        line_end
    } else {
        span.end()
    };

    SourceSpan::new(start, end - start)
}

/// Sort spans and merge any that overlap or touch.
pub fn merge_spans(mut spans: Vec<SourceSpan>) -> Vec<SourceSpan> {
    spans.sort_by_key(|s| s.offset);
    let mut merged: Vec<SourceSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.offset <= last.end() => {
                let end = last.end().max(span.end());
                last.length = end - last.offset;
            }
            _ => merged.push(span),
        }
    }
    merged
}

/// The user-approved items to clean up.
#[derive(Debug, Clone, Default)]
pub struct CleanupSelection {
    /// Broken markers whose text should be removed
    pub unlink: Vec<MarkerOccurrence>,
    /// Orphan entries whose files should be deleted
    pub delete: Vec<ContentStoreEntry>,
}

impl CleanupSelection {
    pub fn from_picks<'a>(items: impl IntoIterator<Item = &'a PickItem>) -> Self {
        let mut selection = Self::default();
        for item in items {
            match &item.action {
                PickAction::Unlink(marker) => selection.unlink.push(marker.clone()),
                PickAction::DeleteOrphan(entry) => selection.delete.push(entry.clone()),
            }
        }
        selection
    }

    pub fn len(&self) -> usize {
        self.unlink.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One item that could not be cleaned up.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct CleanupFailure {
    /// `file:line` for markers, the store-relative path for orphans
    pub target: String,
    pub reason: String,
}

/// Summary of a cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct CleanupReport {
    /// Items actually removed
    pub succeeded: usize,
    /// Items tried before finishing or being cancelled
    pub attempted: usize,
    /// Items in the selection
    pub selected: usize,
    pub cancelled: bool,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.succeeded == self.selected
    }
}

fn marker_target(marker: &MarkerOccurrence) -> String {
    format!("{}:{}", marker.source_file.display(), marker.line + 1)
}

/// Applies a [`CleanupSelection`].
///
/// Callers must not run two cleanups over the same workspace at once.
pub struct CleanupExecutor {
    files: Arc<dyn FileSource>,
    store: Arc<dyn ContentStore>,
    case: CaseFolding,
}

impl CleanupExecutor {
    pub fn new(files: Arc<dyn FileSource>, store: Arc<dyn ContentStore>, case: CaseFolding) -> Self {
        Self { files, store, case }
    }

    /// Remove selected markers and delete selected orphans.
    ///
    /// Cancellation is checked before each file group and each deletion;
    /// whatever was applied stays applied.
    pub async fn apply(&self, selection: &CleanupSelection, cancel: &CancellationFlag) -> CleanupReport {
        let mut report = CleanupReport {
            selected: selection.len(),
            ..Default::default()
        };

        let mut by_file: BTreeMap<PathBuf, Vec<&MarkerOccurrence>> = BTreeMap::new();
        for marker in &selection.unlink {
            by_file
                .entry(marker.source_file.clone())
                .or_default()
                .push(marker);
        }

        for (path, markers) in by_file {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += markers.len();
            self.unlink_in_file(&path, &markers, &mut report).await;
        }

        for entry in &selection.delete {
            if report.cancelled || cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;
            match self.store.delete(&entry.relative_path).await {
                Ok(()) => {
                    debug!("Deleted orphan {}", entry.relative_path);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {e:#}", entry.relative_path);
                    report.failures.push(CleanupFailure {
                        target: entry.relative_path.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        info!(
            "Cleanup: {}/{} succeeded ({} selected){}",
            report.succeeded,
            report.attempted,
            report.selected,
            if report.cancelled { ", cancelled" } else { "" }
        );
        report
    }

    /// One grouped edit for all markers in a file.
    async fn unlink_in_file(
        &self,
        path: &std::path::Path,
        markers: &[&MarkerOccurrence],
        report: &mut CleanupReport,
    ) {
        let text = match self.files.read_text(path).await {
            Ok(text) => text,
            Err(e) => {
                for marker in markers {
                    report.failures.push(CleanupFailure {
                        target: marker_target(marker),
                        reason: format!("{e:#}"),
                    });
                }
                return;
            }
        };

        let mut located = Vec::new();
        let mut spans = Vec::new();
        for marker in markers {
            match locate_marker(&text, marker, self.case) {
                Some(span) if !spans.iter().any(|s: &SourceSpan| s.offset == span.offset) => {
                    located.push(*marker);
                    spans.push(span);
                }
                _ => report.failures.push(CleanupFailure {
                    target: marker_target(marker),
                    reason: format!("marker {:?} not found", marker.raw_path),
                }),
            }
        }
        if spans.is_empty() {
            return;
        }

        let edits: Vec<TextEdit> = merge_spans(
            spans
                .into_iter()
                .map(|span| expand_deletion(&text, span))
                .collect(),
        )
        .into_iter()
        .map(TextEdit::delete)
        .collect();

        let result = match apply_edits(&text, &edits) {
            Ok(edited) => self.files.write_text(path, &edited).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!("Removed {} markers from {}", located.len(), path.display());
                report.succeeded += located.len();
            }
            Err(e) => {
                warn!("Failed to edit {}: {e:#}", path.display());
                for marker in located {
                    report.failures.push(CleanupFailure {
                        target: marker_target(marker),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
    }
}
