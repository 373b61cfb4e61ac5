use super::governor::supervise;
use super::process::{WorkerCommand, launch, resolve_executable};
use super::types::{CapturedOutput, RunRequest, WorkerExit};
use super::Engine;
use crate::args;
use crate::config::Config;
use crate::error::{LaunchError, RunError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs a worker script through an interpreter, e.g. `python main.py <args>`.
pub struct ScriptEngine {
    cfg: Config,
    python_exe: PathBuf,
    script: PathBuf,
}

impl ScriptEngine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cfg: cfg.clone(),
            python_exe: resolve_python_exe(&cfg.worker.python_exe),
            script: expand_tilde(&cfg.worker.script_path),
        }
    }

    pub fn python_exe(&self) -> &Path {
        &self.python_exe
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    fn base_command(&self) -> WorkerCommand {
        let mut cmd = WorkerCommand::new(&self.python_exe);
        if !self.cfg.worker.working_dir.is_empty() {
            cmd.cwd = Some(PathBuf::from(&self.cfg.worker.working_dir));
        }
        cmd.env = self.cfg.worker.env.clone();
        cmd
    }

    fn command(&self, req: &RunRequest) -> WorkerCommand {
        self.base_command()
            .arg(self.script.display().to_string())
            .args(req.worker_args())
    }

    /// Run the interpreter with `args` under the precheck deadline.
    /// `None` when it could not start, did not finish in time, or was cancelled.
    async fn probe(
        &self,
        label: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Option<(i32, CapturedOutput)> {
        let cmd = self.base_command().args(args);
        let mut handle = match launch(&cmd, label) {
            Ok(h) => h,
            Err(err) => {
                warn!("{label}: {err}");
                return None;
            }
        };
        let exit = supervise(
            &mut handle,
            self.cfg.timeouts.precheck(),
            self.cfg.timeouts.kill_grace(),
            cancel,
        )
        .await;
        match exit {
            Ok(WorkerExit::Exited { exit_code, output }) => {
                debug!(
                    "{label} exit={exit_code} stdout={:?} stderr={:?}",
                    output.stdout.trim(),
                    output.stderr.trim()
                );
                Some((exit_code, output))
            }
            Ok(other) => {
                warn!("{label} did not complete: {other:?}");
                None
            }
            Err(err) => {
                warn!("{label}: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl Engine for ScriptEngine {
    async fn check_environment(&self, cancel: &CancellationToken) -> bool {
        let marker = &self.cfg.precheck.version_marker;
        match self
            .probe("version check", vec!["--version".into()], cancel)
            .await
        {
            // Older interpreters print the version on stderr.
            Some((0, out)) => out.stdout.contains(marker) || out.stderr.contains(marker),
            _ => false,
        }
    }

    async fn check_dependencies(&self, cancel: &CancellationToken) -> bool {
        let stmt = import_statement(&self.cfg.precheck.modules);
        match self
            .probe("dependency check", vec!["-c".into(), stmt], cancel)
            .await
        {
            Some((0, out)) => out.stdout.contains("OK"),
            _ => false,
        }
    }

    fn install_hint(&self) -> String {
        format!(
            "{} -m {}",
            args::encode(&self.python_exe.display().to_string()),
            self.cfg.precheck.install_hint
        )
    }

    fn command_line(&self, req: &RunRequest) -> String {
        self.command(req).command_line()
    }

    async fn run(
        &self,
        req: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkerExit, RunError> {
        resolve_executable(&self.python_exe)?;
        if !self.script.is_file() {
            return Err(LaunchError::MissingScript(self.script.clone()).into());
        }
        if let Some(dir) = req
            .primary_output_path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
        {
            std::fs::create_dir_all(dir).map_err(|source| LaunchError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let cmd = self.command(req);
        let mut handle = launch(&cmd, "worker")?;
        info!(
            "worker pid={:?} mode={} format={} deadline={}s",
            handle.pid(),
            req.mode.worker_arg(),
            req.output_format.worker_arg(),
            self.cfg.timeouts.run_seconds
        );
        supervise(
            &mut handle,
            self.cfg.timeouts.run(),
            self.cfg.timeouts.kill_grace(),
            cancel,
        )
        .await
    }
}

/// Python one-liner that imports every module and prints `OK`.
pub fn import_statement(modules: &[String]) -> String {
    if modules.is_empty() {
        return "print('OK')".to_string();
    }
    format!("import {}; print('OK')", modules.join(", "))
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("DOCRUN_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from(if cfg!(windows) { "python" } else { "python3" });
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
