//! In-memory agents and the pool that hands them out

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gorelease_agent::{AgentError, AgentPool, BuildAgent, CancelToken, ExecOptions, RemoteOutcome};

use super::{ExecCall, MockFs, MockRun, MockState, Reply};

/// Work directory every mock agent reports
pub const MOCK_WORK_DIR: &str = "/workdir";

/// Upper bound on a [`Reply::Block`] command that nobody cancels
const BLOCK_LIMIT: Duration = Duration::from_secs(30);
const BLOCK_POLL: Duration = Duration::from_millis(5);

/// Pool of in-memory agents with scripted commands
///
/// Clones share state, so a test keeps one handle for assertions while the
/// orchestrator owns another.
#[derive(Clone, Default)]
pub struct MockPool {
    state: Arc<Mutex<MockState>>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script `cmd` on every builder
    pub fn on_exec<F>(&self, cmd: &str, handler: F)
    where
        F: Fn(&mut MockRun<'_>) -> Reply + Send + Sync + 'static,
    {
        self.lock().handlers.push((None, cmd.to_string(), Arc::new(handler)));
    }

    /// Script `cmd` on one builder, overriding [`on_exec`](Self::on_exec)
    pub fn on_exec_for<F>(&self, builder: &str, cmd: &str, handler: F)
    where
        F: Fn(&mut MockRun<'_>) -> Reply + Send + Sync + 'static,
    {
        self.lock()
            .handlers
            .push((Some(builder.to_string()), cmd.to_string(), Arc::new(handler)));
    }

    /// Make `create` fail for `builder`
    pub fn fail_create(&self, builder: &str, message: &str) {
        self.lock()
            .create_failures
            .insert(builder.to_string(), message.to_string());
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.lock().calls.clone()
    }

    /// Operation log, one line per agent call
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Agents created so far
    pub fn created(&self) -> usize {
        self.lock().created
    }

    /// Agents closed so far
    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    /// Agents created and not yet closed
    pub fn live(&self) -> usize {
        let state = self.lock();
        state.created - state.closed
    }
}

impl AgentPool for MockPool {
    fn create(&self, cancel: &CancelToken, builder: &str) -> Result<Box<dyn BuildAgent>, AgentError> {
        cancel.check()?;
        let mut state = self.lock();
        if let Some(message) = state.create_failures.get(builder).cloned() {
            state.events.push(format!("create_failed {}", builder));
            return Err(AgentError::Create {
                builder: builder.to_string(),
                message,
            });
        }
        state.next_id += 1;
        state.created += 1;
        let id = state.next_id;
        state.events.push(format!("create {}", builder));

        Ok(Box::new(MockAgent {
            id,
            name: format!("mock-{}-{}", builder, id),
            builder: builder.to_string(),
            state: Arc::clone(&self.state),
            fs: MockFs::new(),
            closed: false,
        }))
    }
}

/// One in-memory agent
pub struct MockAgent {
    id: u64,
    name: String,
    builder: String,
    state: Arc<Mutex<MockState>>,
    fs: MockFs,
    closed: bool,
}

fn shown(dir: &str) -> &str {
    if dir.is_empty() {
        "."
    } else {
        dir
    }
}

impl MockAgent {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, cancel: &CancelToken, event: String) -> Result<(), AgentError> {
        cancel.check()?;
        if self.closed {
            return Err(AgentError::Closed(self.name.clone()));
        }
        self.lock().events.push(event);
        Ok(())
    }
}

impl BuildAgent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn work_dir(&mut self, cancel: &CancelToken) -> Result<String, AgentError> {
        cancel.check()?;
        if self.closed {
            return Err(AgentError::Closed(self.name.clone()));
        }
        Ok(MOCK_WORK_DIR.to_string())
    }

    fn put_tar(&mut self, cancel: &CancelToken, tgz: &mut dyn Read, dir: &str) -> Result<(), AgentError> {
        self.begin(cancel, format!("put_tar {}", shown(dir)))?;
        self.fs.unpack_tgz(tgz, dir).map_err(|e| AgentError::Rejected {
            dest: shown(dir).to_string(),
            message: e.to_string(),
        })
    }

    fn put_tar_from_url(&mut self, cancel: &CancelToken, url: &str, dir: &str) -> Result<(), AgentError> {
        self.begin(cancel, format!("put_tar_from_url {} {}", url, shown(dir)))?;
        self.fs.mkdir(dir);
        Ok(())
    }

    fn put(&mut self, cancel: &CancelToken, content: &mut dyn Read, path: &str, mode: u32) -> Result<(), AgentError> {
        self.begin(cancel, format!("put {}", path))?;
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        self.fs.write(path, data, mode);
        Ok(())
    }

    fn exec(&mut self, cancel: &CancelToken, cmd: &str, opts: ExecOptions<'_>) -> Result<RemoteOutcome, AgentError> {
        self.begin(cancel, format!("exec {}", cmd))?;
        let call = ExecCall {
            agent: self.id,
            builder: self.builder.clone(),
            cmd: cmd.to_string(),
            args: opts.args,
            env: opts.env,
            dir: opts.dir,
        };
        let handler = {
            let mut state = self.lock();
            state.calls.push(call.clone());
            state.handler(&self.builder, cmd)
        };

        let reply = match handler {
            Some(handler) => handler(&mut MockRun {
                builder: &call.builder,
                cmd: &call.cmd,
                args: &call.args,
                env: &call.env,
                dir: call.dir.as_deref(),
                fs: &mut self.fs,
            }),
            None => Reply::ok(""),
        };

        let mut sink = opts.output;
        let mut emit = |text: &str| -> Result<(), AgentError> {
            if let Some(sink) = sink.as_mut() {
                sink.write_all(text.as_bytes())?;
            }
            Ok(())
        };

        match reply {
            Reply::Ok { output } => {
                emit(&output)?;
                Ok(RemoteOutcome::Success)
            }
            Reply::Fail { message, output } => {
                emit(&output)?;
                Ok(RemoteOutcome::Failed { message })
            }
            Reply::Transport(message) => Err(AgentError::Rejected {
                dest: cmd.to_string(),
                message,
            }),
            Reply::Block => {
                if cancel.sleep(BLOCK_LIMIT, BLOCK_POLL) {
                    Ok(RemoteOutcome::Failed {
                        message: "blocked command was never cancelled".to_string(),
                    })
                } else {
                    self.lock().events.push(format!("cancelled {}", cmd));
                    Err(AgentError::Cancelled)
                }
            }
        }
    }

    fn get_tar(&mut self, cancel: &CancelToken, dir: &str) -> Result<Box<dyn Read + Send>, AgentError> {
        self.begin(cancel, format!("get_tar {}", shown(dir)))?;
        if !dir.is_empty() && !self.fs.is_dir(dir) {
            return Err(AgentError::Rejected {
                dest: dir.to_string(),
                message: "no such directory".to_string(),
            });
        }
        Ok(Box::new(Cursor::new(self.fs.pack_tgz(dir)?)))
    }

    fn close(&mut self) -> Result<(), AgentError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = self.lock();
        state.closed += 1;
        state.events.push(format!("close {}", self.builder));
        Ok(())
    }
}
