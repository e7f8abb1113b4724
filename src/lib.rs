//! gorelease - Go toolchain release pipeline
//!
//! Turns a Go source revision into verified release files for every target
//! in a catalogue: a source archive, per-target tar.gz archives, zip
//! archives for Windows and platform installers. Builds and tests run on
//! ephemeral build agents; output is staged and committed per target only
//! when every stage for that target has succeeded.

pub mod blob;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod manifest;
pub mod mock;
pub mod orchestrator;
pub mod session;
pub mod signal;
pub mod stages;
pub mod staging;

pub use catalog::{BuildConfig, InstallerKind, Target, TargetCatalog, TomlCatalog};
pub use config::{ConfigError, EffectiveConfig, ReleaseConfig};
pub use orchestrator::{Orchestrator, ReleaseError, ReleaseReport, TargetResult};
pub use stages::{Stage, StageError};
