//! Remote build session
//!
//! Wraps one [`BuildAgent`] for the lifetime of a stage. Commands run with
//! the builder's base environment plus `GOPATH` under the agent's work
//! directory, overridden by whatever the caller passes. A failed command
//! becomes [`StageError::Remote`] carrying everything the command printed.

mod env;

use std::io::{self, Read, Write};

use gorelease_agent::{AgentPool, BuildAgent, CancelToken, ExecOptions, RemoteOutcome};
use tracing::Span;

use crate::catalog::BuildConfig;
use crate::stages::{StageError, GO_DIR};

pub use env::merge_env;

/// Options for [`RemoteSession::exec`]
#[derive(Default)]
pub struct SessionExec<'a> {
    pub args: Vec<String>,
    /// Wins over the builder and session environment
    pub extra_env: Vec<(String, String)>,
    /// Working directory relative to the agent work directory
    pub dir: Option<String>,
    /// Also receives the command's combined output
    pub output: Option<&'a mut (dyn Write + Send)>,
}

impl SessionExec<'_> {
    pub fn with_args<S: Into<String>>(args: impl IntoIterator<Item = S>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.extra_env = env;
        self
    }

    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

/// One agent, held from construction until [`close`](RemoteSession::close)
pub struct RemoteSession {
    agent: Box<dyn BuildAgent>,
    builder: BuildConfig,
    builder_env: Vec<(String, String)>,
    cancel: CancelToken,
    watch: bool,
    span: Span,
    closed: bool,
}

impl RemoteSession {
    /// Acquire an agent for `builder` from `pool`
    ///
    /// With `watch`, command output is also copied to stdout as it arrives.
    pub fn open(
        pool: &dyn AgentPool,
        builder: &BuildConfig,
        cancel: &CancelToken,
        watch: bool,
    ) -> Result<Self, StageError> {
        cancel.check()?;
        let span = tracing::info_span!("session", builder = %builder.name);
        let agent = span.in_scope(|| pool.create(cancel, &builder.name))?;
        tracing::debug!(parent: &span, agent = agent.name(), "session opened");

        Ok(Self {
            agent,
            builder_env: builder.env_pairs(),
            builder: builder.clone(),
            cancel: cancel.clone(),
            watch,
            span,
            closed: false,
        })
    }

    pub fn builder(&self) -> &BuildConfig {
        &self.builder
    }

    pub fn work_dir(&mut self) -> Result<String, StageError> {
        Ok(self.agent.work_dir(&self.cancel)?)
    }

    /// Unpack a tar.gz stream into remote `dir` ("" for the work directory)
    pub fn push_tar(&mut self, tgz: &mut dyn Read, dir: &str) -> Result<(), StageError> {
        let _entered = self.span.enter();
        tracing::info!(dir, "pushing tarball");
        self.agent.put_tar(&self.cancel, tgz, dir)?;
        Ok(())
    }

    pub fn push_file(&mut self, content: &mut dyn Read, path: &str, mode: u32) -> Result<(), StageError> {
        let _entered = self.span.enter();
        tracing::info!(path, mode = format!("{:o}", mode), "pushing file");
        self.agent.put(&self.cancel, content, path, mode)?;
        Ok(())
    }

    pub fn push_from_url(&mut self, url: &str, dir: &str) -> Result<(), StageError> {
        let _entered = self.span.enter();
        tracing::info!(url, dir, "pushing tarball from URL");
        self.agent.put_tar_from_url(&self.cancel, url, dir)?;
        Ok(())
    }

    /// Install the builder's bootstrap toolchain into `dir`, if it has one
    pub fn push_bootstrap(&mut self, dir: &str) -> Result<bool, StageError> {
        match self.builder.bootstrap_url.clone() {
            Some(url) if !url.is_empty() => {
                self.push_from_url(&url, dir)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Run `cmd` on the agent, failing with the captured output on non-zero exit
    pub fn exec(&mut self, cmd: &str, opts: SessionExec<'_>) -> Result<(), StageError> {
        let work = self.work_dir()?;
        let session_env = vec![("GOPATH".to_string(), format!("{}/gopath", work))];
        let env = merge_env([
            self.builder_env.as_slice(),
            session_env.as_slice(),
            opts.extra_env.as_slice(),
        ]);
        let command = std::iter::once(cmd)
            .chain(opts.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let _entered = self.span.enter();
        tracing::debug!(command = %command, env = ?env, dir = ?opts.dir, "exec");

        let mut capture = Capture {
            buf: Vec::new(),
            sink: opts.output,
            watch: self.watch,
        };
        let outcome = self.agent.exec(
            &self.cancel,
            cmd,
            ExecOptions {
                args: opts.args,
                env,
                dir: opts.dir,
                output: Some(&mut capture),
            },
        )?;

        match outcome {
            RemoteOutcome::Success => Ok(()),
            RemoteOutcome::Failed { message } => {
                tracing::warn!(command = %command, %message, "remote command failed");
                Err(StageError::Remote {
                    command,
                    message,
                    output: String::from_utf8_lossy(&capture.buf).into_owned(),
                })
            }
        }
    }

    /// Run the freshly built `go` command
    pub fn run_go(&mut self, opts: SessionExec<'_>) -> Result<(), StageError> {
        self.exec(&format!("{}/bin/go", GO_DIR), opts)
    }

    /// Stream remote `dir` as a tar.gz; names are relative to `dir`
    pub fn fetch_tar(&mut self, dir: &str) -> Result<Box<dyn Read + Send>, StageError> {
        let _entered = self.span.enter();
        tracing::info!(dir, "fetching tarball");
        Ok(self.agent.get_tar(&self.cancel, dir)?)
    }

    /// Release the agent; safe to call more than once
    pub fn close(&mut self) -> Result<(), StageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(parent: &self.span, "session closed");
        self.agent.close()?;
        Ok(())
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(parent: &self.span, error = %e, "failed to release agent");
        }
    }
}

/// Keeps a copy of everything a command prints
struct Capture<'a> {
    buf: Vec<u8>,
    sink: Option<&'a mut (dyn Write + Send)>,
    watch: bool,
}

impl Write for Capture<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(data)?;
        }
        if self.watch {
            io::stdout().write_all(data)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}
