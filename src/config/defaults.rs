//! Built-in defaults (first layer)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::stages::InstallerRecipe;

/// Values every release run starts from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Where committed release files land (default: ".")
    pub output_dir: String,

    /// Skip the test and long-test branches (default: false)
    pub skip_tests: bool,

    /// Copy remote command output to stdout (default: false)
    pub watch: bool,

    /// Agent directory for the bootstrap toolchain (default: "go1.4")
    pub bootstrap_dir: String,

    /// GOOS_GOARCH of cross-compiling builders (default: "linux_amd64")
    pub host_osarch: String,

    /// Log filter (default: "info")
    pub log_level: String,

    /// Log format (default: "text")
    pub log_format: String,

    pub msi: InstallerRecipe,

    pub pkg: InstallerRecipe,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            skip_tests: false,
            watch: false,
            bootstrap_dir: "go1.4".to_string(),
            host_osarch: gorelease_archive::DEFAULT_HOST_OSARCH.to_string(),
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            msi: InstallerRecipe::msi(None),
            pkg: InstallerRecipe::pkg(None),
        }
    }
}

fn recipe_value(recipe: &InstallerRecipe) -> Value {
    json!({
        "remote_path": recipe.remote_path,
        "command": recipe.command,
        "args": recipe.args,
        "dir": recipe.dir,
        "output_dir": recipe.output_dir,
        "archive_dir": recipe.archive_dir,
        "script_mode": recipe.script_mode,
    })
}

impl BuiltinDefaults {
    /// The defaults as a mergeable layer
    pub fn to_value(&self) -> Value {
        json!({
            "output_dir": self.output_dir,
            "skip_tests": self.skip_tests,
            "watch": self.watch,
            "bootstrap_dir": self.bootstrap_dir,
            "host_osarch": self.host_osarch,
            "log": {
                "level": self.log_level,
                "format": self.log_format,
            },
            "installer": {
                "msi": recipe_value(&self.msi),
                "pkg": recipe_value(&self.pkg),
            }
        })
    }
}
