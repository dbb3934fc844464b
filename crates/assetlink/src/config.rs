//! Configuration file for assetlink
//!
//! Config lives at `.config/assetlink/config.json` relative to the workspace
//! root. A missing file means "all defaults".
//!
//! ```json
//! {
//!   "rules": ["{ts,tsx,js}-{//}", "{py,sh}-{#}"],
//!   "storeRoot": ".vscode/code-assets",
//!   "exclude": ["generated/**"],
//!   "verbose": false
//! }
//! ```

use assetlink_core::{CaseFolding, ConfigSource, DEFAULT_STORE_ROOT, Settings};
use eyre::{Result, WrapErr, bail};
use facet::Facet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Config path relative to the workspace root
pub const DEFAULT_CONFIG_PATH: &str = ".config/assetlink/config.json";

/// Root configuration for assetlink
#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(rename_all = "camelCase")]
pub struct Config {
    /// Comment syntax rules, e.g. `{ts,tsx}-{//}`
    #[facet(default)]
    pub rules: Vec<String>,

    /// Content store root, absolute or relative to the workspace root
    #[facet(default)]
    pub store_root: Option<String>,

    /// Include globs; replaces the ones derived from the rules
    #[facet(default)]
    pub include: Vec<String>,

    /// Extra exclude globs
    #[facet(default)]
    pub exclude: Vec<String>,

    /// More diagnostic logging
    #[facet(default)]
    pub verbose: bool,

    /// Fold case when comparing paths; unset follows the platform
    #[facet(default)]
    pub case_insensitive: Option<bool>,
}

impl Config {
    /// Parse a config document.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        facet_json::from_str(content).wrap_err("Invalid config JSON")
    }

    /// Absolute store root for a workspace.
    pub fn store_root(&self, workspace_root: &Path) -> Result<PathBuf> {
        match self.store_root.as_deref().map(str::trim) {
            None => Ok(workspace_root.join(DEFAULT_STORE_ROOT)),
            Some("") => bail!("storeRoot is set but empty; remove it or point it at a directory"),
            Some(dir) => {
                let dir = Path::new(dir);
                if dir.is_absolute() {
                    Ok(dir.to_path_buf())
                } else {
                    Ok(workspace_root.join(dir))
                }
            }
        }
    }

    /// Settings snapshot for the core.
    pub fn to_settings(&self, workspace_root: &Path) -> Result<Settings> {
        let mut settings = Settings::new(workspace_root)
            .with_rules(self.rules.iter().cloned())
            .with_store_root(self.store_root(workspace_root)?)
            .with_case(CaseFolding::from_setting(self.case_insensitive));
        settings.include = self.include.clone();
        settings.exclude = self.exclude.clone();
        settings.verbose = self.verbose;
        Ok(settings)
    }
}

/// Load a config file. A missing file yields the default config.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(e) => {
            return Err(e)
                .wrap_err_with(|| format!("Failed to read config file: {}", path.display()));
        }
    };
    Config::parse(&content)
        .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
}

/// Write a config file, creating its directory.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = facet_json::to_string_pretty(config)
        .map_err(|e| eyre::eyre!("Failed to serialize config: {e}"))?;
    std::fs::write(path, format!("{json}\n"))
        .wrap_err_with(|| format!("Failed to write config file: {}", path.display()))
}

struct Loaded {
    config: Config,
    settings: Settings,
}

/// [`ConfigSource`] backed by the config file.
///
/// The initial load is strict. Later reloads keep the previous config when
/// the file turns bad, and report the error to the caller.
pub struct FileConfigSource {
    workspace_root: PathBuf,
    path: PathBuf,
    current: Mutex<Loaded>,
    epoch: watch::Sender<u64>,
}

impl FileConfigSource {
    pub fn load(workspace_root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Result<Self> {
        let workspace_root = workspace_root.into();
        let path = path.into();
        let config = load_config(&path)?;
        let settings = config.to_settings(&workspace_root)?;
        let (epoch, _) = watch::channel(0);
        Ok(Self {
            workspace_root,
            path,
            current: Mutex::new(Loaded { config, settings }),
            epoch,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> Config {
        self.lock().config.clone()
    }

    /// Re-read the file. On error the previous config stays in effect.
    pub async fn reload(&self) -> Result<()> {
        let config = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Config::parse(&content).wrap_err_with(|| {
                format!("Config file {} has errors", self.path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Config file {} not found, using defaults",
                    self.path.display()
                );
                Ok(Config::default())
            }
            Err(e) => Err(e).wrap_err_with(|| {
                format!("Config file {} not readable", self.path.display())
            }),
        };
        let loaded = config.and_then(|config| {
            let settings = config.to_settings(&self.workspace_root)?;
            Ok(Loaded { config, settings })
        });
        match loaded {
            Ok(loaded) => {
                *self.lock() = loaded;
                self.epoch.send_modify(|epoch| *epoch += 1);
                Ok(())
            }
            Err(e) => {
                warn!("{e:#}; keeping the previous config");
                Err(e)
            }
        }
    }

    /// Persist a new config and make it current.
    pub fn save(&self, config: Config) -> Result<()> {
        let settings = config.to_settings(&self.workspace_root)?;
        save_config(&self.path, &config)?;
        *self.lock() = Loaded { config, settings };
        self.epoch.send_modify(|epoch| *epoch += 1);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Loaded> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigSource for FileConfigSource {
    fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_keys() {
        let config = Config::parse(
            r#"{"rules": ["{py}-{#}"], "storeRoot": "assets", "caseInsensitive": true}"#,
        )
        .unwrap();
        assert_eq!(config.rules, vec!["{py}-{#}"]);
        assert_eq!(config.store_root.as_deref(), Some("assets"));
        assert_eq!(config.case_insensitive, Some(true));
        assert!(config.include.is_empty());
        assert!(!config.verbose);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(Config::parse("  \n").unwrap(), Config::default());
    }

    #[test]
    fn test_store_root_resolution() {
        let root = Path::new("/ws");
        let mut config = Config::default();
        assert_eq!(
            config.store_root(root).unwrap(),
            PathBuf::from("/ws/.vscode/code-assets")
        );

        config.store_root = Some("docs/assets".into());
        assert_eq!(config.store_root(root).unwrap(), PathBuf::from("/ws/docs/assets"));

        config.store_root = Some("  ".into());
        assert!(config.store_root(root).is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        let config = Config {
            rules: vec!["{js}-{//}".into()],
            exclude: vec!["gen/**".into()],
            ..Default::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[tokio::test]
    async fn test_reload_keeps_previous_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"rules": ["{js}-{//}"]}"#).unwrap();

        let source = FileConfigSource::load(dir.path(), &path).unwrap();
        let mut rx = source.subscribe();

        std::fs::write(&path, "{ not json").unwrap();
        assert!(source.reload().await.is_err());
        assert_eq!(source.settings().rules, vec!["{js}-{//}"]);
        assert!(!rx.has_changed().unwrap());

        std::fs::write(&path, r#"{"rules": ["{py}-{#}"]}"#).unwrap();
        source.reload().await.unwrap();
        assert_eq!(source.settings().rules, vec!["{py}-{#}"]);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_initial_load_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(FileConfigSource::load(dir.path(), &path).is_err());
    }
}
