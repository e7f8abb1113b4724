//! Build agent and agent pool interfaces
//!
//! Every remote operation takes the caller's [`CancelToken`] and is expected
//! to return [`AgentError::Cancelled`] promptly once it fires.

use std::io::{Read, Write};

use crate::{AgentError, CancelToken};

/// How to run one command on an agent
#[derive(Default)]
pub struct ExecOptions<'a> {
    pub args: Vec<String>,
    /// Environment entries applied on top of the agent's own environment
    pub env: Vec<(String, String)>,
    /// Working directory relative to the agent's work directory
    ///
    /// Defaults to the directory containing the command when the command is
    /// a relative path with a `/`, otherwise the work directory itself.
    pub dir: Option<String>,
    /// Receives combined stdout and stderr as it is produced
    pub output: Option<&'a mut (dyn Write + Send)>,
}

impl std::fmt::Debug for ExecOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("args", &self.args)
            .field("env", &self.env)
            .field("dir", &self.dir)
            .field("output", &self.output.is_some())
            .finish()
    }
}

/// Result of a command that the agent managed to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Success,
    /// The command ran but did not succeed (non-zero exit, killed by signal)
    Failed { message: String },
}

impl RemoteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOutcome::Success)
    }
}

/// One ephemeral build machine
///
/// Every operation that talks to the machine takes the caller's
/// cancellation token and returns `AgentError::Cancelled` once it fires.
/// Paths are `/`-separated and relative to the work directory.
pub trait BuildAgent: Send {
    /// Builder name this agent was created for
    fn name(&self) -> &str;

    /// Absolute path of the agent's work directory, as the agent sees it
    fn work_dir(&mut self, cancel: &CancelToken) -> Result<String, AgentError>;

    /// Unpack a gzip-compressed tar stream into `dir` ("" for the work directory)
    fn put_tar(&mut self, cancel: &CancelToken, tgz: &mut dyn Read, dir: &str) -> Result<(), AgentError>;

    /// Have the agent download a gzip-compressed tarball and unpack it into `dir`
    fn put_tar_from_url(&mut self, cancel: &CancelToken, url: &str, dir: &str) -> Result<(), AgentError>;

    /// Write a single file
    fn put(&mut self, cancel: &CancelToken, content: &mut dyn Read, path: &str, mode: u32) -> Result<(), AgentError>;

    /// Run `cmd` to completion
    fn exec(&mut self, cancel: &CancelToken, cmd: &str, opts: ExecOptions<'_>) -> Result<RemoteOutcome, AgentError>;

    /// Stream the contents of `dir` as a gzip-compressed tar, names relative to `dir`
    fn get_tar(&mut self, cancel: &CancelToken, dir: &str) -> Result<Box<dyn Read + Send>, AgentError>;

    /// Release the machine; later calls are no-ops
    fn close(&mut self) -> Result<(), AgentError>;
}

/// Source of build agents
pub trait AgentPool: Send + Sync {
    fn create(&self, cancel: &CancelToken, builder: &str) -> Result<Box<dyn BuildAgent>, AgentError>;
}
