//! Stage functions
//!
//! Each stage does one step of a target's release against a
//! [`RemoteSession`](crate::session::RemoteSession) or a local stream, and
//! reports failures as [`StageError`].

mod binary;
mod installer;
mod source;

use std::fmt;
use std::io::{self, Write};

use gorelease_agent::AgentError;
use gorelease_archive::{extract_file, ArchiveError};

use crate::catalog::{BuildConfig, CatalogError, InstallerKind, Target};
use crate::session::RemoteSession;
use crate::staging::StagingError;

pub use binary::{binary_adjustments, build_binary, BinaryBuildOptions};
pub use installer::{build_installer, InstallerRecipe};
pub use source::write_source_archive;
pub use test::run_tests;

/// Directory the toolchain tree lives in, both on agents and inside archives
pub const GO_DIR: &str = "go";

/// Which step of a target's release failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Source,
    Build,
    Installer,
    Zip,
    Test,
    LongTest,
    Commit,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Source => "source",
            Stage::Build => "build",
            Stage::Installer => "installer",
            Stage::Zip => "zip",
            Stage::Test => "test",
            Stage::LongTest => "long-test",
            Stage::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage failures
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The agent could not be reached or rejected an operation
    #[error("Agent error: {0}")]
    Agent(AgentError),

    /// A command ran on the agent and failed
    #[error("Command {command} failed: {message}\nOutput:\n{output}")]
    Remote {
        command: String,
        message: String,
        output: String,
    },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("No installer recipe configured for {0}")]
    MissingRecipe(InstallerKind),

    #[error("Cancelled")]
    Cancelled,
}

impl From<AgentError> for StageError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Cancelled => StageError::Cancelled,
            other => StageError::Agent(other),
        }
    }
}

impl StageError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StageError::Cancelled)
    }
}

/// Build environment for the make and test scripts
///
/// `GOROOT_FINAL` first (builder override or the target OS default), then
/// the target's extra entries.
pub fn make_env(target: &Target, builder: &BuildConfig) -> Vec<(String, String)> {
    let goroot_final = builder
        .goroot_final
        .clone()
        .unwrap_or_else(|| target.default_goroot_final().to_string());
    let mut env = vec![("GOROOT_FINAL".to_string(), goroot_final)];
    env.extend(target.extra_env_pairs());
    env
}

/// Copy the first regular file directly under remote `dir` into `dest`
pub fn fetch_file<W: Write>(session: &mut RemoteSession, dir: &str, dest: &mut W) -> Result<u64, StageError> {
    tracing::info!(dir, "downloading file");
    let tgz = session.fetch_tar(dir)?;
    Ok(extract_file(tgz, dest, "*")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(goos: &str) -> Target {
        Target {
            name: format!("{}-amd64", goos),
            goos: goos.to_string(),
            goarch: "amd64".to_string(),
            builder: "b".to_string(),
            long_test_builder: None,
            build_only: false,
            race: false,
            extra_env: vec!["GOAMD64=v1".to_string()],
            versions: Vec::new(),
        }
    }

    #[test]
    fn test_make_env_defaults_goroot_final_per_os() {
        let builder = BuildConfig::named("b");

        let linux = make_env(&target("linux"), &builder);
        assert_eq!(linux[0], ("GOROOT_FINAL".to_string(), "/usr/local/go".to_string()));
        assert_eq!(linux[1], ("GOAMD64".to_string(), "v1".to_string()));

        let windows = make_env(&target("windows"), &builder);
        assert_eq!(windows[0].1, r"c:\go");
    }

    #[test]
    fn test_make_env_builder_override() {
        let mut builder = BuildConfig::named("b");
        builder.goroot_final = Some("/opt/go".to_string());
        assert_eq!(make_env(&target("linux"), &builder)[0].1, "/opt/go");
    }

    #[test]
    fn test_agent_cancellation_maps_to_cancelled() {
        assert!(StageError::from(AgentError::Cancelled).is_cancelled());
        assert!(matches!(
            StageError::from(AgentError::UnsupportedUrl("ftp://x".into())),
            StageError::Agent(_)
        ));
    }

    #[test]
    fn test_remote_error_embeds_output() {
        let err = StageError::Remote {
            command: "go/src/make.bash".to_string(),
            message: "exit status: 2".to_string(),
            output: "cmd/compile: internal compiler error".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("go/src/make.bash"));
        assert!(text.contains("internal compiler error"));
    }
}
