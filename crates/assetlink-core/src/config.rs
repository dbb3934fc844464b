//! Configuration capability consumed by the core
//!
//! The core never reads a settings file itself. It asks a [`ConfigSource`]
//! for the current [`Settings`] snapshot and subscribes to its change epoch.

use crate::path::CaseFolding;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Default location of the content store, relative to the workspace root.
pub const DEFAULT_STORE_ROOT: &str = ".vscode/code-assets";

/// Settings snapshot used by scanning, reconciliation and cleanup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Raw comment syntax rules, e.g. `{ts,tsx}-{//}`
    pub rules: Vec<String>,
    /// Absolute content-store root
    pub store_root: PathBuf,
    /// Explicit include globs; empty means "derive from the rules"
    pub include: Vec<String>,
    /// Extra exclude globs, unioned with the default denylist
    pub exclude: Vec<String>,
    /// Gates diagnostic detail only
    pub verbose: bool,
    /// Case policy for normalized keys
    pub case: CaseFolding,
}

impl Settings {
    /// Settings with no rules and the default store under `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            rules: Vec::new(),
            store_root: workspace_root.join(DEFAULT_STORE_ROOT),
            include: Vec::new(),
            exclude: Vec::new(),
            verbose: false,
            case: CaseFolding::platform_default(),
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rules = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_store_root(mut self, store_root: impl Into<PathBuf>) -> Self {
        self.store_root = store_root.into();
        self
    }

    pub fn with_case(mut self, case: CaseFolding) -> Self {
        self.case = case;
        self
    }
}

/// Source of settings plus a change notification.
pub trait ConfigSource: Send + Sync {
    /// Current settings snapshot
    fn settings(&self) -> Settings;

    /// Receiver whose value is bumped every time the settings change
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-memory [`ConfigSource`]; replacing the settings bumps the epoch.
pub struct SharedConfig {
    settings: Mutex<Settings>,
    epoch: watch::Sender<u64>,
}

impl SharedConfig {
    pub fn new(settings: Settings) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            settings: Mutex::new(settings),
            epoch,
        }
    }

    /// Swap in new settings and notify subscribers.
    pub fn replace(&self, settings: Settings) {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings;
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// Current change epoch (0 until the first replacement)
    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }
}

impl ConfigSource for SharedConfig {
    fn settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_bumps_epoch() {
        let config = SharedConfig::new(Settings::new("/ws"));
        let rx = config.subscribe();
        assert_eq!(config.epoch(), 0);

        config.replace(Settings::new("/ws").with_rules(["{js}-{//}"]));
        assert_eq!(config.epoch(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(config.settings().rules, vec!["{js}-{//}".to_string()]);
    }

    #[test]
    fn test_default_store_root() {
        let settings = Settings::new("/ws");
        assert_eq!(settings.store_root, PathBuf::from("/ws/.vscode/code-assets"));
    }
}
