//! Installer stage (msi and pkg)
//!
//! The packaging script is an opaque payload; this stage only pushes it,
//! runs it and fetches the single file it leaves behind.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{fetch_file, StageError};
use crate::catalog::{InstallerKind, Target};
use crate::session::{RemoteSession, SessionExec};

fn default_script_mode() -> u32 {
    0o666
}

/// How to produce one installer kind on an agent
///
/// The script is an opaque payload: it is pushed next to the unpacked
/// binary archive and run with `command`, and whatever single file it
/// leaves in `output_dir` is the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerRecipe {
    /// Local packaging script; without one the installer cannot be built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Where the script is written on the agent
    pub remote_path: String,
    pub command: String,
    /// Arguments; `{version}` is replaced by the release version
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory on the agent; defaults to the command's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Agent directory holding the finished installer
    pub output_dir: String,
    /// Agent directory the binary archive is unpacked into
    #[serde(default)]
    pub archive_dir: String,
    #[serde(default = "default_script_mode")]
    pub script_mode: u32,
}

impl InstallerRecipe {
    /// `go run releaselet.go` in the work directory, output in `msi/`
    pub fn msi(script: Option<PathBuf>) -> Self {
        Self {
            script,
            remote_path: "releaselet.go".to_string(),
            command: "go/bin/go".to_string(),
            args: vec!["run".to_string(), "releaselet.go".to_string()],
            dir: Some(".".to_string()),
            output_dir: "msi".to_string(),
            archive_dir: String::new(),
            script_mode: default_script_mode(),
        }
    }

    /// `bash pkg.bash {version}` with the tree under `pkg-root/usr/local`, output in `pkg-out/`
    pub fn pkg(script: Option<PathBuf>) -> Self {
        Self {
            script,
            remote_path: "pkg.bash".to_string(),
            command: "bash".to_string(),
            args: vec!["pkg.bash".to_string(), "{version}".to_string()],
            dir: Some(".".to_string()),
            output_dir: "pkg-out".to_string(),
            archive_dir: "pkg-root/usr/local".to_string(),
            script_mode: 0o755,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.script.is_some()
    }

    fn args_for(&self, version: &str) -> Vec<String> {
        self.args.iter().map(|arg| arg.replace("{version}", version)).collect()
    }
}

/// Build the `kind` installer for `target` and copy it into `out`
///
/// Returns the installer size in bytes.
pub fn build_installer<W: Write>(
    session: &mut RemoteSession,
    target: &Target,
    kind: InstallerKind,
    recipe: &InstallerRecipe,
    version: &str,
    binary_tgz: &mut dyn Read,
    out: &mut W,
) -> Result<u64, StageError> {
    let script_path = recipe.script.as_ref().ok_or(StageError::MissingRecipe(kind))?;
    let mut script = File::open(script_path)?;

    session.push_tar(binary_tgz, &recipe.archive_dir)?;
    tracing::info!(target = %target.name, %kind, script = %recipe.remote_path, "pushing and running installer script");
    session.push_file(&mut script, &recipe.remote_path, recipe.script_mode)?;

    let mut exec = SessionExec::with_args(recipe.args_for(version));
    exec.dir = recipe.dir.clone();
    session.exec(&recipe.command, exec)?;

    let size = fetch_file(session, &recipe.output_dir, out)?;
    tracing::info!(target = %target.name, %kind, size, "installer fetched");
    Ok(size)
}
