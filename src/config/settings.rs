//! Typed view of the merged configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::defaults::BuiltinDefaults;
use crate::catalog::InstallerKind;
use crate::logging::LoggerConfig;
use crate::stages::{BinaryBuildOptions, InstallerRecipe};

/// Installer recipes by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerRecipes {
    pub msi: InstallerRecipe,
    pub pkg: InstallerRecipe,
}

/// Everything one release run needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Release version, e.g. `go1.22.1`
    pub version: String,
    /// Where staged files are written before commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub skip_tests: bool,
    #[serde(default)]
    pub watch: bool,
    pub bootstrap_dir: String,
    pub host_osarch: String,
    /// Target catalogue file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub log: LoggerConfig,
    pub installer: InstallerRecipes,
}

/// A fresh staging directory name under `output_dir`
pub fn default_staging_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(format!("go-release-staging_{}", Ulid::new()))
}

impl ReleaseConfig {
    /// Built-in defaults for `version`, committing into `output_dir`
    pub fn new(version: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        let defaults = BuiltinDefaults::default();
        let output_dir = output_dir.into();
        Self {
            version: version.into(),
            staging_dir: Some(default_staging_dir(&output_dir)),
            output_dir,
            skip_tests: defaults.skip_tests,
            watch: defaults.watch,
            bootstrap_dir: defaults.bootstrap_dir,
            host_osarch: defaults.host_osarch,
            catalog: None,
            log: LoggerConfig::default(),
            installer: InstallerRecipes {
                msi: defaults.msi,
                pkg: defaults.pkg,
            },
        }
    }

    /// Pick a staging directory if none was configured
    pub fn resolve_staging_dir(mut self) -> Self {
        if self.staging_dir.is_none() {
            self.staging_dir = Some(default_staging_dir(&self.output_dir));
        }
        self
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| default_staging_dir(&self.output_dir))
    }

    pub fn recipe(&self, kind: InstallerKind) -> &InstallerRecipe {
        match kind {
            InstallerKind::Msi => &self.installer.msi,
            InstallerKind::Pkg => &self.installer.pkg,
        }
    }

    pub fn binary_options(&self) -> BinaryBuildOptions {
        BinaryBuildOptions {
            bootstrap_dir: self.bootstrap_dir.clone(),
            host_osarch: self.host_osarch.clone(),
        }
    }
}
