//! assetlink library - keep `@link@` asset markers and their store in sync
//!
//! This library exposes the pieces behind the `assetlink` command line tool
//! (config file, workspace wiring, report rendering, live view, file
//! watching) for testing and embedding purposes. The scanning and
//! reconciliation logic lives in `assetlink-core`.

pub mod config;
pub mod engine;
pub mod output;
pub mod watcher;
pub mod workspace;

pub use config::{Config, DEFAULT_CONFIG_PATH, FileConfigSource, load_config, save_config};
pub use engine::{ChangeKind, Engine, Summary};
pub use output::OutputFormat;
pub use workspace::{AttachOutcome, Workspace, filter_picks};
