//! Comment syntax rules and the cached extension -> token map
//!
//! Users declare rules like `{ts,tsx}-{//}` or `{py,sh}-#`. They are compiled
//! into a [`CommentMap`] that drives two things: which file extensions get
//! scanned, and which comment token prefixes a freshly inserted marker.
//! Files without a rule fall back to a small per-language table.

use crate::config::ConfigSource;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Comment tokens recognized in front of a marker when deleting it.
pub const COMMENT_PREFIX_TOKENS: &[&str] = &["//", "#", "--", ";", "%"];

/// Token used when neither a rule nor the language table applies.
pub const DEFAULT_COMMENT_TOKEN: &str = "//";

/// Compiled `extension -> token` map.
///
/// Keys are lowercase and carry no leading dot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMap {
    tokens: BTreeMap<String, String>,
}

impl CommentMap {
    /// Compile rule strings; later rules win for the same extension and
    /// malformed rules are skipped.
    pub fn compile(rules: &[impl AsRef<str>]) -> Self {
        let mut tokens = BTreeMap::new();
        for raw in rules {
            let Some(rule) = CommentRule::parse(raw.as_ref()) else {
                debug!("Skipping malformed comment rule {:?}", raw.as_ref());
                continue;
            };
            for ext in rule.extensions {
                tokens.insert(ext, rule.token.clone());
            }
        }
        Self { tokens }
    }

    /// Token configured for an extension (any case, with or without dot)
    pub fn token_for_extension(&self, ext: &str) -> Option<&str> {
        let key = ext.trim_start_matches('.').to_lowercase();
        self.tokens.get(&key).map(String::as_str)
    }

    /// Token configured for a file, looked up by its extension
    pub fn token_for_file(&self, file: &Path) -> Option<&str> {
        file.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.token_for_extension(ext))
    }

    /// Extensions with a rule, sorted
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    /// All `(extension, token)` pairs, sorted by extension
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tokens.iter().map(|(e, t)| (e.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// One parsed `{ext,...}-{token}` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRule {
    /// Lowercase extensions without leading dot, blanks removed
    pub extensions: Vec<String>,
    /// Comment token, trimmed and non-empty
    pub token: String,
}

impl CommentRule {
    /// Parse `{a,b}-{token}` or `{a,b}-token`.
    ///
    /// Returns `None` for anything that does not fit the grammar or whose
    /// token is blank.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        let rest = s.strip_prefix('{')?;
        let close = rest.find('}')?;
        let left = &rest[..close];
        if left.is_empty() {
            return None;
        }

        let right = rest[close + 1..].trim_start().strip_prefix('-')?.trim_start();
        if right.is_empty() {
            return None;
        }
        // A braced token wins when the braces wrap the whole remainder;
        // otherwise the remainder is taken verbatim.
        let token = match right.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            Some(inner) if !inner.is_empty() && !inner.contains('}') => inner,
            _ => right,
        };
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let extensions: Vec<String> = left
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| e.strip_prefix('.').unwrap_or(e).to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Some(Self {
            extensions,
            token: token.to_string(),
        })
    }

    /// Canonical `{a,b}-{token}` form.
    pub fn to_rule_string(&self) -> String {
        format!("{{{}}}-{{{}}}", self.extensions.join(","), self.token)
    }
}

/// Remove extensions from a rule list.
///
/// Rules left without extensions are dropped, surviving rules are re-emitted
/// in canonical form and malformed rules are discarded.
pub fn remove_extensions(rules: &[impl AsRef<str>], remove: &[impl AsRef<str>]) -> Vec<String> {
    let remove: Vec<String> = remove
        .iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
        .collect();

    rules
        .iter()
        .filter_map(|raw| CommentRule::parse(raw.as_ref()))
        .filter_map(|mut rule| {
            rule.extensions.retain(|e| !remove.contains(e));
            (!rule.extensions.is_empty()).then(|| rule.to_rule_string())
        })
        .collect()
}

/// Static fallback: language identifier -> line comment token.
pub fn language_comment_token(language_id: &str) -> &'static str {
    match language_id {
        "python" | "shellscript" | "makefile" | "dockerfile" | "yaml" | "toml" | "r" | "perl"
        | "ruby" | "coffeescript" | "elixir" | "powershell" => "#",
        "lua" | "haskell" | "sql" => "--",
        "matlab" | "erlang" => "%",
        _ => DEFAULT_COMMENT_TOKEN,
    }
}

/// Best-effort language identifier for a file, for hosts that only have a path.
pub fn language_for_file(file: &Path) -> Option<&'static str> {
    let name = file.file_name()?.to_str()?;
    match name {
        "Makefile" | "makefile" | "GNUmakefile" => return Some("makefile"),
        "Dockerfile" => return Some("dockerfile"),
        _ => {}
    }
    let ext = file.extension()?.to_str()?.to_lowercase();
    let id = match ext.as_str() {
        "py" | "pyw" => "python",
        "sh" | "bash" | "zsh" => "shellscript",
        "mk" => "makefile",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "r" => "r",
        "pl" | "pm" => "perl",
        "rb" => "ruby",
        "coffee" => "coffeescript",
        "ex" | "exs" => "elixir",
        "ps1" | "psm1" | "psd1" => "powershell",
        "lua" => "lua",
        "hs" | "lhs" => "haskell",
        "sql" => "sql",
        "erl" | "hrl" => "erlang",
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" | "cts" => "typescript",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "java" => "java",
        _ => return None,
    };
    Some(id)
}

/// Line comment token for a file: configured rule by extension first, then
/// the language table, then `//`.
pub fn line_comment_token<'a>(
    map: &'a CommentMap,
    language_id: Option<&str>,
    file: &Path,
) -> &'a str {
    if let Some(token) = map.token_for_file(file) {
        return token;
    }
    match language_id.or_else(|| language_for_file(file)) {
        Some(id) => language_comment_token(id),
        None => DEFAULT_COMMENT_TOKEN,
    }
}

struct CacheCell {
    generation: u64,
    map: Option<Arc<CommentMap>>,
}

/// Owner of the cached [`CommentMap`].
///
/// [`SyntaxRegistry::effective_map`] hands out the same `Arc` until
/// [`SyntaxRegistry::invalidate`] is called, so callers can use
/// [`Arc::ptr_eq`] to detect "no change".
pub struct SyntaxRegistry {
    config: Arc<dyn ConfigSource>,
    cell: Mutex<CacheCell>,
}

impl SyntaxRegistry {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            cell: Mutex::new(CacheCell {
                generation: 0,
                map: None,
            }),
        }
    }

    /// Cached effective map, compiled on first use after an invalidation.
    pub fn effective_map(&self) -> Arc<CommentMap> {
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = &cell.map {
            return Arc::clone(map);
        }
        let map = Arc::new(CommentMap::compile(&self.config.settings().rules));
        debug!(
            "Compiled comment map (generation {}, {} extensions)",
            cell.generation,
            map.len()
        );
        cell.map = Some(Arc::clone(&map));
        map
    }

    /// Drop the cached map; the next read recompiles into a new instance.
    pub fn invalidate(&self) {
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        cell.generation += 1;
        cell.map = None;
    }

    /// Number of invalidations so far
    pub fn generation(&self) -> u64 {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Invalidate on every configuration change until the source goes away.
    ///
    /// The subscription is taken before the future is returned, so changes
    /// made right after this call are never missed.
    pub fn follow_config(self: Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.config.subscribe();
        async move {
            while rx.changed().await.is_ok() {
                self.invalidate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SharedConfig};

    #[test]
    fn test_parse_braced_token() {
        let rule = CommentRule::parse("{ts,tsx}-{//}").unwrap();
        assert_eq!(rule.extensions, vec!["ts", "tsx"]);
        assert_eq!(rule.token, "//");
    }

    #[test]
    fn test_parse_bare_token() {
        let rule = CommentRule::parse("  { .PY , sh ,, } - #  ").unwrap();
        assert_eq!(rule.extensions, vec!["py", "sh"]);
        assert_eq!(rule.token, "#");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(CommentRule::parse("").is_none());
        assert!(CommentRule::parse("ts-//").is_none());
        assert!(CommentRule::parse("{}-{//}").is_none());
        assert!(CommentRule::parse("{ts}").is_none());
        assert!(CommentRule::parse("{ts}-").is_none());
        assert!(CommentRule::parse("{ts}-{  }").is_none());
    }

    #[test]
    fn test_parse_unbalanced_braces_taken_verbatim() {
        let rule = CommentRule::parse("{html}-<!--").unwrap();
        assert_eq!(rule.token, "<!--");
        let rule = CommentRule::parse("{x}-{a}}").unwrap();
        assert_eq!(rule.token, "{a}}");
    }

    #[test]
    fn test_compile_last_rule_wins() {
        let map = CommentMap::compile(&["{js,ts}-{//}", "garbage", "{ts,py}-{#}"]);
        assert_eq!(map.token_for_extension("js"), Some("//"));
        assert_eq!(map.token_for_extension("ts"), Some("#"));
        assert_eq!(map.token_for_extension(".PY"), Some("#"));
        assert_eq!(map.extensions().collect::<Vec<_>>(), vec!["js", "py", "ts"]);
    }

    #[test]
    fn test_line_comment_token_priority() {
        let map = CommentMap::compile(&["{lua}-{//}"]);
        // rule beats the language table
        assert_eq!(line_comment_token(&map, Some("lua"), Path::new("a.lua")), "//");
        assert_eq!(line_comment_token(&map, None, Path::new("a.sql")), "--");
        assert_eq!(line_comment_token(&map, None, Path::new("a.py")), "#");
        assert_eq!(line_comment_token(&map, None, Path::new("a.erl")), "%");
        assert_eq!(line_comment_token(&map, None, Path::new("Makefile")), "#");
        assert_eq!(line_comment_token(&map, Some("yaml"), Path::new("x.conf")), "#");
        assert_eq!(line_comment_token(&map, None, Path::new("a.unknown")), "//");
    }

    #[test]
    fn test_remove_extensions() {
        let rules = ["{c,cpp,h}-{//}", "{py}-#", "not a rule"];
        let next = remove_extensions(&rules, &[".CPP", "py"]);
        assert_eq!(next, vec!["{c,h}-{//}".to_string()]);
    }

    #[test]
    fn test_registry_reference_stability() {
        let config = Arc::new(SharedConfig::new(
            Settings::new("/ws").with_rules(["{js}-{//}"]),
        ));
        let registry = SyntaxRegistry::new(config.clone());

        let first = registry.effective_map();
        let second = registry.effective_map();
        assert!(Arc::ptr_eq(&first, &second));

        registry.invalidate();
        let third = registry.effective_map();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
        assert_eq!(registry.generation(), 1);
    }

    #[tokio::test]
    async fn test_registry_follows_config_changes() {
        let config = Arc::new(SharedConfig::new(
            Settings::new("/ws").with_rules(["{js}-{//}"]),
        ));
        let registry = Arc::new(SyntaxRegistry::new(config.clone()));
        let before = registry.effective_map();

        let follower = tokio::spawn(Arc::clone(&registry).follow_config());
        config.replace(Settings::new("/ws").with_rules(["{py}-{#}"]));

        for _ in 0..100 {
            if registry.generation() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let after = registry.effective_map();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.token_for_extension("py"), Some("#"));
        assert_eq!(after.token_for_extension("js"), None);
        follower.abort();
    }
}
