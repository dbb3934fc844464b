//! Marker path normalization and store containment
//!
//! Every marker path and every store entry is reduced to a comparable key
//! with [`normalize`] before anything is compared. [`is_contained`] then
//! decides whether such a key, resolved against the store root, stays inside
//! the store.

use std::path::{Component, Path, PathBuf};

/// Case-folding policy applied to normalized keys.
///
/// This is an explicit input rather than a runtime platform probe so both
/// policies can be exercised on any host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseFolding {
    /// Keys keep their case (POSIX-style filesystems)
    #[default]
    Sensitive,
    /// Keys are lowercased (Windows-style filesystems)
    Insensitive,
}

impl CaseFolding {
    /// The policy matching the filesystem of the current host.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            CaseFolding::Insensitive
        } else {
            CaseFolding::Sensitive
        }
    }

    /// Pick the policy from an optional explicit setting.
    pub fn from_setting(case_insensitive: Option<bool>) -> Self {
        match case_insensitive {
            Some(true) => CaseFolding::Insensitive,
            Some(false) => CaseFolding::Sensitive,
            None => Self::platform_default(),
        }
    }

    fn fold(self, s: &str) -> String {
        match self {
            CaseFolding::Sensitive => s.to_string(),
            CaseFolding::Insensitive => s.to_lowercase(),
        }
    }
}

/// Canonicalize a raw marker path into a comparison key.
///
/// Trims, turns backslashes into forward slashes, strips a leading `./`
/// and any leading `/`, then applies the case policy. The strip steps are
/// repeated until nothing changes, so `normalize(normalize(x)) == normalize(x)`
/// holds for inputs like `/./a` or `./ a`.
pub fn normalize(raw: &str, case: CaseFolding) -> String {
    let mut key = raw.replace('\\', "/");
    loop {
        let trimmed = key.trim();
        let stripped = trimmed.strip_prefix("./").unwrap_or(trimmed);
        let stripped = stripped.trim_start_matches('/');
        if stripped.len() == key.len() {
            break;
        }
        key = stripped.to_string();
    }
    case.fold(&key)
}

/// Turn a path relative to some root into the forward-slash form used for
/// store entries (`images\a.png` -> `images/a.png`).
pub fn to_slash(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// `C:` style prefix (also rejects things like `a:b`)
fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

/// `scheme://` prefix
fn has_scheme_prefix(path: &str) -> bool {
    match path.find("://") {
        Some(0) | None => false,
        Some(idx) => path[..idx].chars().all(|c| c.is_ascii_alphabetic()),
    }
}

/// Resolve `rel` against `base` without touching the filesystem, collapsing
/// `.` and `..` components. A `..` that has nothing left to pop is kept.
pub fn resolve_lexically(base: &Path, rel: &str) -> PathBuf {
    let joined = if rel.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rel)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lexical relative path from `from` to `to`, with `..` for every
/// component of `from` that `to` does not share.
fn relative_between(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

/// Decide whether a normalized marker path stays within the store root.
///
/// Protocol (`http://...`) and drive-letter (`C:...`) forms are rejected
/// before any resolution. The empty path points at the root itself and is
/// contained. No file-existence check happens here.
pub fn is_contained(normalized: &str, store_root: &Path, case: CaseFolding) -> bool {
    if has_drive_prefix(normalized) || has_scheme_prefix(normalized) {
        return false;
    }

    let root = resolve_lexically(store_root, "");
    let resolved = resolve_lexically(&root, normalized);
    let relative = relative_between(&root, &resolved);

    if relative.as_os_str().is_empty() {
        return true;
    }
    if relative.is_absolute()
        || matches!(relative.components().next(), Some(Component::ParentDir))
    {
        return false;
    }

    let resolved_key = PathBuf::from(case.fold(&resolved.to_string_lossy()));
    let root_key = PathBuf::from(case.fold(&root.to_string_lossy()));
    resolved_key.starts_with(&root_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/work/project/.vscode/code-assets")
    }

    #[test]
    fn test_normalize_strips_prefixes() {
        let n = |s| normalize(s, CaseFolding::Sensitive);
        assert_eq!(n("./images/test.png"), "images/test.png");
        assert_eq!(n("/images/test.png"), "images/test.png");
        assert_eq!(n("///images/test.png"), "images/test.png");
        assert_eq!(n("images\\test.png"), "images/test.png");
        assert_eq!(n("  images/test.png  "), "images/test.png");
        assert_eq!(n(""), "");
    }

    #[test]
    fn test_normalize_case_policy() {
        assert_eq!(
            normalize("Images/Logo.PNG", CaseFolding::Insensitive),
            "images/logo.png"
        );
        assert_eq!(
            normalize("Images/Logo.PNG", CaseFolding::Sensitive),
            "Images/Logo.PNG"
        );
    }

    #[test]
    fn test_normalize_idempotent() {
        let inputs = [
            "",
            " ",
            "./a",
            "././a",
            "/./a",
            "./ a",
            " /\\./b\\c ",
            ".\\x.png",
            "../up.png",
            "C:\\x",
            "http://example.com/a.png",
            "Mixed/Case.PNG",
            "a/./b",
        ];
        for case in [CaseFolding::Sensitive, CaseFolding::Insensitive] {
            for input in inputs {
                let once = normalize(input, case);
                assert_eq!(normalize(&once, case), once, "input {input:?}");
            }
        }
    }

    #[test]
    fn test_containment_basic() {
        let case = CaseFolding::Sensitive;
        assert!(!is_contained("../x", &root(), case));
        assert!(is_contained("sub/x", &root(), case));
        assert!(!is_contained("C:\\x", &root(), case));
        assert!(!is_contained("C:/x", &root(), case));
        assert!(!is_contained("http://x", &root(), case));
        assert!(is_contained("", &root(), case));
    }

    #[test]
    fn test_containment_dot_segments() {
        let case = CaseFolding::Sensitive;
        assert!(is_contained("a/../b.png", &root(), case));
        assert!(is_contained("a/./b.png", &root(), case));
        assert!(is_contained("a/..", &root(), case));
        assert!(!is_contained("a/../../b.png", &root(), case));
        assert!(!is_contained("../../etc/passwd", &root(), case));
        assert!(!is_contained("../code-assets-evil/x.png", &root(), case));
    }

    #[test]
    fn test_containment_relative_root() {
        let case = CaseFolding::Sensitive;
        let root = Path::new("assets");
        assert!(is_contained("images/a.png", root, case));
        assert!(!is_contained("../src/main.rs", root, case));
    }

    #[test]
    fn test_scheme_detection() {
        assert!(has_scheme_prefix("https://x"));
        assert!(has_scheme_prefix("file:///etc"));
        assert!(!has_scheme_prefix("://x"));
        assert!(!has_scheme_prefix("images/a.png"));
        assert!(!has_scheme_prefix("a1://x"));
    }

    #[test]
    fn test_to_slash() {
        assert_eq!(to_slash(Path::new("images/a.png")), "images/a.png");
        assert_eq!(to_slash(Path::new("./docs/b.md")), "docs/b.md");
    }
}
