//! Marker lexer
//!
//! Finds `@link@:<path>` markers anywhere in a file's text. The lexer is
//! syntax-agnostic: it does not care which comment token precedes the tag,
//! only that the tag is followed by a colon (ASCII `:` or full-width `：`)
//! and a path.
//!
//! ```text
//! // @link@:images/foo.png
//! # @link@: "docs/spec.md"
//! -- @link@:'images/logo.svg'
//! ```

use crate::path::{CaseFolding, normalize};
use facet::Facet;
use std::path::{Path, PathBuf};

/// Literal tag that starts every marker.
pub const MARKER_TAG: &str = "@link@";

const FULLWIDTH_COLON: char = '：';

/// How far (in lines) to look around a recorded line when re-locating a marker.
const RELOCATE_WINDOW: usize = 3;

/// Byte span in source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
pub struct SourceSpan {
    /// Byte offset from start of file
    pub offset: usize,
    /// Byte length
    pub length: usize,
}

impl SourceSpan {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Exclusive end offset
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Which of the four path forms a marker used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum PathQuoting {
    /// `"images/a.png"`
    DoubleQuoted,
    /// `'images/a.png'`
    SingleQuoted,
    /// `` `images/a.png` ``
    Backtick,
    /// `images/a.png`
    Bare,
}

impl PathQuoting {
    fn from_delimiter(c: char) -> Option<Self> {
        match c {
            '"' => Some(PathQuoting::DoubleQuoted),
            '\'' => Some(PathQuoting::SingleQuoted),
            '`' => Some(PathQuoting::Backtick),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathQuoting::DoubleQuoted => "double-quoted",
            PathQuoting::SingleQuoted => "single-quoted",
            PathQuoting::Backtick => "backtick",
            PathQuoting::Bare => "bare",
        }
    }
}

/// One matched marker in one file.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct MarkerOccurrence {
    /// File the marker was found in
    pub source_file: PathBuf,
    /// Path exactly as written, without its quotes
    pub raw_path: String,
    /// Comparison key derived from `raw_path`
    pub normalized_path: String,
    /// Quoting style of the path
    pub quoting: PathQuoting,
    /// Line number (0-based)
    pub line: usize,
    /// Column of the tag (0-based, in chars)
    pub column: usize,
    /// Byte span of the whole marker, tag through path
    pub span: SourceSpan,
}

/// A marker match before it is attached to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawMatch {
    length: usize,
    path: String,
    quoting: PathQuoting,
}

/// Try to match a full marker whose tag starts at `start`.
fn match_marker_at(text: &str, start: usize) -> Option<RawMatch> {
    let after_tag = start + MARKER_TAG.len();
    let rest = text.get(after_tag..)?;
    let rest_trimmed = rest.trim_start();
    let colon_offset = after_tag + (rest.len() - rest_trimmed.len());

    let colon = rest_trimmed.chars().next()?;
    if colon != ':' && colon != FULLWIDTH_COLON {
        return None;
    }
    let after_colon = colon_offset + colon.len_utf8();
    let rest = &text[after_colon..];
    let rest_trimmed = rest.trim_start();
    let path_offset = after_colon + (rest.len() - rest_trimmed.len());

    let first = rest_trimmed.chars().next()?;
    if let Some(quoting) = PathQuoting::from_delimiter(first) {
        // Quoted paths must close on the same line and be non-empty.
        let body = &rest_trimmed[1..];
        let close = body.find(|c| c == first || c == '\n')?;
        if close == 0 || !body[close..].starts_with(first) {
            return None;
        }
        return Some(RawMatch {
            length: path_offset + 1 + close + 1 - start,
            path: body[..close].to_string(),
            quoting,
        });
    }

    let end = rest_trimmed
        .find(|c: char| c.is_whitespace() || PathQuoting::from_delimiter(c).is_some())
        .unwrap_or(rest_trimmed.len());
    if end == 0 {
        return None;
    }
    Some(RawMatch {
        length: path_offset + end - start,
        path: rest_trimmed[..end].to_string(),
        quoting: PathQuoting::Bare,
    })
}

/// Extract every marker from a file's text.
///
/// Offsets are byte offsets into `text`. Markers may appear anywhere on a
/// line; the character before the tag does not matter.
pub fn extract_markers(file: &Path, text: &str, case: CaseFolding) -> Vec<MarkerOccurrence> {
    // Track line starts for computing line numbers from byte offsets
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let line_of = |offset: usize| -> usize {
        match line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line - 1,
        }
    };

    let mut markers = Vec::new();
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(MARKER_TAG) {
        let start = cursor + found;
        let Some(m) = match_marker_at(text, start) else {
            // '@' is one byte, so this stays on a char boundary
            cursor = start + 1;
            continue;
        };

        let line = line_of(start);
        let column = text[line_starts[line]..start].chars().count();
        markers.push(MarkerOccurrence {
            source_file: file.to_path_buf(),
            normalized_path: normalize(&m.path, case),
            raw_path: m.path,
            quoting: m.quoting,
            line,
            column,
            span: SourceSpan::new(start, m.length),
        });
        cursor = start + m.length;
    }
    markers
}

/// Re-locate a marker in text that may have changed since it was scanned.
///
/// Looks at the recorded span first, then within a few lines of the
/// recorded line (nearest first), then anywhere in the text.
pub fn locate_marker(text: &str, marker: &MarkerOccurrence, case: CaseFolding) -> Option<SourceSpan> {
    if let Some(found) = match_marker_at_span(text, marker.span)
        && normalize(&found.path, case) == marker.normalized_path
        && found.length == marker.span.length
    {
        return Some(marker.span);
    }

    let candidates: Vec<MarkerOccurrence> = extract_markers(&marker.source_file, text, case)
        .into_iter()
        .filter(|m| m.normalized_path == marker.normalized_path)
        .collect();

    for distance in 0..=RELOCATE_WINDOW {
        let lines = [
            marker.line.checked_sub(distance),
            marker.line.checked_add(distance),
        ];
        for line in lines.into_iter().flatten() {
            if let Some(m) = candidates.iter().find(|m| m.line == line) {
                return Some(m.span);
            }
        }
    }
    candidates.first().map(|m| m.span)
}

fn match_marker_at_span(text: &str, span: SourceSpan) -> Option<RawMatch> {
    if !text.get(span.offset..)?.starts_with(MARKER_TAG) {
        return None;
    }
    match_marker_at(text, span.offset)
}

/// Render a marker line for insertion, e.g. `// @link@:images/a.png`.
///
/// Paths containing whitespace or a quote character are wrapped in the
/// first quote style they do not contain.
pub fn format_marker(comment_token: &str, rel_path: &str) -> String {
    let needs_quotes = rel_path
        .chars()
        .any(|c| c.is_whitespace() || PathQuoting::from_delimiter(c).is_some());
    if !needs_quotes {
        return format!("{comment_token} {MARKER_TAG}:{rel_path}");
    }
    let quote = ['"', '\'', '`']
        .into_iter()
        .find(|q| !rel_path.contains(*q))
        .unwrap_or('"');
    format!("{comment_token} {MARKER_TAG}:{quote}{rel_path}{quote}")
}
