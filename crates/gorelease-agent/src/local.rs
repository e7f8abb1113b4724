//! Process-backed agent on the local machine
//!
//! Each `LocalAgent` owns a private temporary work directory. Commands run
//! as child processes in their own process group so cancellation can take
//! down everything they started.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::{AgentError, AgentPool, BuildAgent, CancelToken, ExecOptions, RemoteOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type Sink<'a> = Mutex<Option<&'a mut (dyn Write + Send)>>;

/// A build agent backed by a temporary directory and child processes
pub struct LocalAgent {
    builder: String,
    work: Option<TempDir>,
}

impl LocalAgent {
    /// Create an agent with a work directory under the system temp dir
    pub fn new(builder: &str) -> Result<Self, AgentError> {
        Self::new_in(builder, None)
    }

    /// Create an agent with a work directory under `root`
    pub fn new_in(builder: &str, root: Option<&Path>) -> Result<Self, AgentError> {
        let mut dir = tempfile::Builder::new();
        dir.prefix("gorelease-agent-");
        let work = match root {
            Some(root) => dir.tempdir_in(root),
            None => dir.tempdir(),
        }
        .map_err(|e| AgentError::Create {
            builder: builder.to_string(),
            message: e.to_string(),
        })?;

        tracing::debug!(builder, dir = %work.path().display(), "created local agent");
        Ok(Self {
            builder: builder.to_string(),
            work: Some(work),
        })
    }

    fn root(&self) -> Result<&Path, AgentError> {
        self.work
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| AgentError::Closed(self.builder.clone()))
    }

    /// Resolve a work-relative path, refusing anything that escapes the work directory
    fn resolve(&self, rel: &str) -> Result<PathBuf, AgentError> {
        let root = self.root()?;
        let path = Path::new(rel);
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(AgentError::Rejected {
                dest: rel.to_string(),
                message: "path escapes the work directory".to_string(),
            });
        }
        Ok(root.join(path))
    }
}

impl BuildAgent for LocalAgent {
    fn name(&self) -> &str {
        &self.builder
    }

    fn work_dir(&mut self, cancel: &CancelToken) -> Result<String, AgentError> {
        cancel.check()?;
        Ok(self.root()?.display().to_string())
    }

    fn put_tar(&mut self, cancel: &CancelToken, tgz: &mut dyn Read, dir: &str) -> Result<(), AgentError> {
        cancel.check()?;
        let dest = self.resolve(dir)?;
        fs::create_dir_all(&dest)?;

        let mut archive = tar::Archive::new(GzDecoder::new(tgz));
        archive.set_preserve_mtime(true);
        archive.unpack(&dest).map_err(|e| AgentError::Rejected {
            dest: dir.to_string(),
            message: e.to_string(),
        })
    }

    fn put_tar_from_url(&mut self, cancel: &CancelToken, url: &str, dir: &str) -> Result<(), AgentError> {
        let path = url
            .strip_prefix("file://")
            .ok_or_else(|| AgentError::UnsupportedUrl(url.to_string()))?;
        let mut file = File::open(path)?;
        self.put_tar(cancel, &mut file, dir)
    }

    fn put(&mut self, cancel: &CancelToken, content: &mut dyn Read, path: &str, mode: u32) -> Result<(), AgentError> {
        cancel.check()?;
        let dest = self.resolve(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&dest)?;
        io::copy(content, &mut file)?;
        set_mode(&dest, mode)?;
        Ok(())
    }

    fn exec(&mut self, cancel: &CancelToken, cmd: &str, opts: ExecOptions<'_>) -> Result<RemoteOutcome, AgentError> {
        cancel.check()?;
        let root = self.root()?.to_path_buf();

        let relative = cmd.contains('/');
        let program = if relative { self.resolve(cmd)? } else { PathBuf::from(cmd) };
        let dir = match opts.dir {
            Some(ref dir) => self.resolve(dir)?,
            None if relative => program.parent().map(Path::to_path_buf).unwrap_or(root),
            None => root,
        };

        let mut command = Command::new(&program);
        command
            .args(&opts.args)
            .envs(opts.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| AgentError::Spawn {
            command: cmd.to_string(),
            source,
        })?;
        tracing::debug!(builder = %self.builder, cmd, pid = child.id(), "started command");

        let sink: Sink<'_> = Mutex::new(opts.output);
        let status = wait_streaming(&mut child, cancel, &sink)?;

        if status.success() {
            Ok(RemoteOutcome::Success)
        } else {
            Ok(RemoteOutcome::Failed {
                message: format!("{} failed: {}", cmd, status),
            })
        }
    }

    fn get_tar(&mut self, cancel: &CancelToken, dir: &str) -> Result<Box<dyn Read + Send>, AgentError> {
        cancel.check()?;
        let src = self.resolve(dir)?;
        if !src.is_dir() {
            return Err(AgentError::Rejected {
                dest: dir.to_string(),
                message: "not a directory".to_string(),
            });
        }

        // Spool to an anonymous file so the caller can stream without holding the tree in memory
        let mut spool = tempfile::tempfile()?;
        {
            let mut builder = tar::Builder::new(GzEncoder::new(&mut spool, Compression::default()));
            builder.follow_symlinks(false);
            for entry in WalkDir::new(&src).min_depth(1).sort_by_file_name() {
                cancel.check()?;
                let entry = entry.map_err(io::Error::from)?;
                let rel = entry
                    .path()
                    .strip_prefix(&src)
                    .map_err(|e| io::Error::new(ErrorKind::Other, e))?;
                // Directory names carry a trailing `/`, as in any tar a builder produces
                let mut name = rel.as_os_str().to_os_string();
                if entry.file_type().is_dir() {
                    name.push("/");
                }
                builder.append_path_with_name(entry.path(), PathBuf::from(name))?;
            }
            builder.into_inner()?.finish()?;
        }
        spool.seek(SeekFrom::Start(0))?;
        Ok(Box::new(spool))
    }

    fn close(&mut self) -> Result<(), AgentError> {
        if let Some(work) = self.work.take() {
            tracing::debug!(builder = %self.builder, "closing local agent");
            work.close()?;
        }
        Ok(())
    }
}

/// Wait for `child` while copying its output into `sink`, killing it on cancellation
fn wait_streaming(child: &mut Child, cancel: &CancelToken, sink: &Sink<'_>) -> Result<ExitStatus, AgentError> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    thread::scope(|scope| -> Result<ExitStatus, AgentError> {
        if let Some(out) = stdout {
            scope.spawn(move || pump(out, sink));
        }
        if let Some(err) = stderr {
            scope.spawn(move || pump(err, sink));
        }

        loop {
            if cancel.is_cancelled() {
                terminate(child);
                return Err(AgentError::Cancelled);
            }
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    })
}

fn pump(mut from: impl Read, sink: &Sink<'_>) {
    let mut buf = [0u8; 8192];
    loop {
        match from.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                if let Ok(mut guard) = sink.lock() {
                    if let Some(out) = guard.as_mut() {
                        let _ = out.write_all(&buf[..n]);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return,
        }
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

impl Drop for LocalAgent {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Hands out a fresh `LocalAgent` per request regardless of builder name
#[derive(Debug, Clone, Default)]
pub struct LocalPool {
    root: Option<PathBuf>,
}

impl LocalPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place agent work directories under `root`
    pub fn in_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl AgentPool for LocalPool {
    fn create(&self, cancel: &CancelToken, builder: &str) -> Result<Box<dyn BuildAgent>, AgentError> {
        cancel.check()?;
        Ok(Box::new(LocalAgent::new_in(builder, self.root.as_deref())?))
    }
}
