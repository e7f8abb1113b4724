//! Configuration merge system
//!
//! Three layers, later wins:
//! 1. Built-in defaults
//! 2. Config file (`--config gorelease.toml`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, SCHEMA_ID};
pub use merge::{deep_merge, merge_layers};
pub use settings::{default_staging_dir, InstallerRecipes, ReleaseConfig};
