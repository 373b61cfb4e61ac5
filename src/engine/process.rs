use crate::args;
use crate::engine::types::CapturedOutput;
use crate::error::{LaunchError, RunError};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Everything needed to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The invocation as a single line of quoted tokens, for logs and reports.
    pub fn command_line(&self) -> String {
        args::command_line(&self.program.display().to_string(), &self.args)
    }

    fn to_tokio_command(&self, program: &Path) -> Command {
        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            std_cmd.current_dir(cwd);
        }
        for (k, v) in &self.env {
            std_cmd.env(k, v);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            std_cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }
}

/// One output stream read to end-of-stream by a spawned task.
struct Drain {
    stream: &'static str,
    task: Option<JoinHandle<io::Result<String>>>,
    done: Option<Result<String, RunError>>,
}

impl Drain {
    fn spawn<R>(stream: &'static str, reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            stream,
            task: reader.map(|r| tokio::spawn(read_to_end(r))),
            done: None,
        }
    }

    /// Wait for end-of-stream until `deadline`. False while the stream is still open.
    async fn settle(&mut self, deadline: Instant) -> bool {
        let Some(task) = self.task.as_mut() else {
            return true;
        };
        let Ok(joined) = timeout_at(deadline, task).await else {
            return false;
        };
        self.task = None;
        self.done = Some(match joined {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(source)) => Err(RunError::Stream {
                stream: self.stream,
                source,
            }),
            Err(join) => Err(RunError::Drain {
                stream: self.stream,
                message: join.to_string(),
            }),
        });
        true
    }

    fn take(&mut self) -> Result<String, RunError> {
        self.done.take().unwrap_or_else(|| Ok(String::new()))
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pending(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

/// A running worker plus the two tasks draining its output.
///
/// On unix the worker leads its own process group, so anything it starts can
/// be killed with it. Dropping the handle kills the process and aborts any
/// drain still pending, so no exit path can leak either.
pub struct ProcessHandle {
    pub(crate) child: Child,
    label: String,
    pid: Option<u32>,
    started: Instant,
    stdout: Drain,
    stderr: Drain,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Wait until `deadline` for both drains to hit end-of-stream and return
    /// the full output. `None` when a stream is still open at the deadline;
    /// the drains are left running so the caller can retry or abort them.
    pub async fn collect_until(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<CapturedOutput>, RunError> {
        if !(self.stdout.settle(deadline).await && self.stderr.settle(deadline).await) {
            return Ok(None);
        }
        let stdout = self.stdout.take()?;
        let stderr = self.stderr.take()?;
        debug!(
            "{} pid={:?} stdout={}B stderr={}B",
            self.label,
            self.pid,
            stdout.len(),
            stderr.len()
        );
        Ok(Some(CapturedOutput { stdout, stderr }))
    }

    /// Give the drains up to `grace` to reach end-of-stream, discarding their
    /// output, then abort whichever is still running.
    pub async fn settle_drains(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        if !(self.stdout.settle(deadline).await && self.stderr.settle(deadline).await) {
            debug!("{} pid={:?} output still open; aborting reader", self.label, self.pid);
        }
        self.abort_drains();
    }

    /// Stop draining without waiting for end-of-stream.
    pub fn abort_drains(&mut self) {
        self.stdout.abort();
        self.stderr.abort();
    }

    /// True while a drain task exists that has not finished.
    pub fn drains_pending(&self) -> bool {
        self.stdout.pending() || self.stderr.pending()
    }

    /// Kill every process left in the worker's process group. The worker
    /// itself may already be gone; an empty group is not an error.
    #[cfg(unix)]
    pub fn kill_group(&self) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pgid = i32::try_from(pid).map_err(io::Error::other)?;
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    pub fn kill_group(&self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.abort_drains();
    }
}

/// Check that `program` can be executed. Bare names are looked up on `PATH`.
pub fn resolve_executable(program: &Path) -> Result<PathBuf, LaunchError> {
    if program.components().count() == 1 && !program.exists() {
        return which::which(program)
            .map_err(|_| LaunchError::MissingExecutable(program.to_path_buf()));
    }
    if !is_executable(program) {
        return Err(LaunchError::MissingExecutable(program.to_path_buf()));
    }
    Ok(program.to_path_buf())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Start the worker with both output streams piped and drained from the start.
///
/// Must be called inside a tokio runtime.
pub fn launch(cmd: &WorkerCommand, label: &str) -> Result<ProcessHandle, LaunchError> {
    let program = resolve_executable(&cmd.program)?;
    debug!("{label} spawn: {}", cmd.command_line());

    let mut tokio_cmd = cmd.to_tokio_command(&program);
    let mut child = tokio_cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: program.clone(),
        source,
    })?;
    let started = Instant::now();
    let pid = child.id();

    let stdout = Drain::spawn("stdout", child.stdout.take());
    let stderr = Drain::spawn("stderr", child.stderr.take());

    debug!("{label} started pid={pid:?}");
    Ok(ProcessHandle {
        child,
        label: label.to_string(),
        pid,
        started,
        stdout,
        stderr,
    })
}

/// Read a stream to its end, decoding as UTF-8.
async fn read_to_end<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
