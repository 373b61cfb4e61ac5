use crate::{
    artifact,
    classify::{Classifier, Rule, Verdict},
    config::Config,
    engine::{Engine, RunOutcome, RunRequest, WorkerExit},
    error::RunError,
    history::{ArtifactEntry, HistoryStore, RunEntry, RunId},
    precheck,
    report::RunReport,
    util::now_rfc3339,
};
use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Pipeline<E: Engine, H: HistoryStore> {
    cfg: Config,
    engine: E,
    history: H,
    classifier: Classifier,
}

struct Execution {
    outcome: RunOutcome,
    decided_by: Option<Rule>,
    run_id: Option<RunId>,
    duration_ms: u64,
}

impl Execution {
    fn early(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            decided_by: None,
            run_id: None,
            duration_ms: 0,
        }
    }
}

impl<E: Engine, H: HistoryStore> Pipeline<E, H> {
    pub fn new(cfg: &Config, engine: E, history: H) -> Result<Self> {
        let classifier = Classifier::new(&cfg.markers).with_context(|| "markers.stderr_warning")?;
        Ok(Self {
            cfg: cfg.clone(),
            engine,
            history,
            classifier,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run one request end to end. Never fails: every problem is folded into
    /// the report's outcome.
    pub async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> RunReport {
        let started = now_rfc3339();
        let exec = self.execute(req, cancel).await;

        info!(
            "run finished status={} decided_by={:?} in {}ms",
            outcome_label(&exec.outcome),
            exec.decided_by,
            exec.duration_ms
        );

        RunReport {
            outcome: exec.outcome,
            run_id: exec.run_id,
            decided_by: exec.decided_by,
            mode: req.mode,
            output_format: req.output_format,
            primary_output: req.primary_output_path.clone(),
            command_line: Some(self.engine.command_line(req)),
            started,
            finished: now_rfc3339(),
            duration_ms: exec.duration_ms,
        }
    }

    async fn execute(&self, req: &RunRequest, cancel: &CancellationToken) -> Execution {
        if let Err(err) = req.validate(&self.cfg.limits) {
            return Execution::early(RunOutcome::Failure {
                reason: format!("invalid request: {err}"),
            });
        }

        if self.cfg.precheck.enabled {
            if let Some(outcome) = precheck::gate(&self.engine, cancel).await {
                return Execution::early(outcome);
            }
        }

        let run_id = self.log_run(req).await;

        let timer = Instant::now();
        let (outcome, decided_by) = self.supervised_run(req, cancel).await;
        let duration_ms = timer.elapsed().as_millis() as u64;

        let outcome = match outcome {
            RunOutcome::Success { .. } => {
                let artifact_path = tokio::select! {
                    found = artifact::resolve(req.output_format, &req.primary_output_path, &self.cfg.artifacts) => found,
                    _ = cancel.cancelled() => None,
                };
                if artifact_path.is_none() {
                    warn!(
                        "run succeeded but no {} artifact appeared next to {}",
                        req.output_format.worker_arg(),
                        req.primary_output_path.display()
                    );
                }
                RunOutcome::Success { artifact_path }
            }
            other => other,
        };

        if let Some(id) = &run_id {
            self.report_to_history(id, duration_ms, &outcome).await;
        }

        Execution {
            outcome,
            decided_by,
            run_id,
            duration_ms,
        }
    }

    /// Launch and supervise the worker under the caller-side deadline, then classify.
    async fn supervised_run(
        &self,
        req: &RunRequest,
        cancel: &CancellationToken,
    ) -> (RunOutcome, Option<Rule>) {
        let outer = self.cfg.timeouts.outer();
        let timer = Instant::now();
        let exit = match tokio::time::timeout(outer, self.engine.run(req, cancel)).await {
            Ok(exit) => exit,
            Err(_) => {
                // Dropping the run future kills the worker.
                warn!("caller deadline {:?} elapsed before the worker was reaped", outer);
                return (
                    RunOutcome::Timeout {
                        elapsed_seconds: timer.elapsed().as_secs_f64(),
                    },
                    None,
                );
            }
        };

        match exit {
            Ok(WorkerExit::Exited { exit_code, output }) => {
                let c = self
                    .classifier
                    .classify_exit(exit_code, &output, &req.primary_output_path);
                let outcome = match c.verdict {
                    Verdict::Success => RunOutcome::Success {
                        artifact_path: None,
                    },
                    Verdict::Failure(reason) => RunOutcome::Failure { reason },
                };
                (outcome, Some(c.rule))
            }
            Ok(WorkerExit::TimedOut { elapsed }) => (
                RunOutcome::Timeout {
                    elapsed_seconds: elapsed.as_secs_f64(),
                },
                None,
            ),
            Ok(WorkerExit::Cancelled { elapsed }) => (
                RunOutcome::Failure {
                    reason: format!("run cancelled after {:.1}s", elapsed.as_secs_f64()),
                },
                None,
            ),
            Err(RunError::Launch(err)) if err.is_precondition() => {
                warn!("precondition failed: {err}");
                (
                    RunOutcome::Failure {
                        reason: err.to_string(),
                    },
                    None,
                )
            }
            Err(RunError::Launch(err)) => {
                warn!("launch failed: {err}");
                (
                    RunOutcome::LaunchFailed {
                        reason: err.to_string(),
                    },
                    None,
                )
            }
            Err(err) => (
                RunOutcome::Failure {
                    reason: err.to_string(),
                },
                None,
            ),
        }
    }

    async fn log_run(&self, req: &RunRequest) -> Option<RunId> {
        let entry = RunEntry {
            user_id: self.cfg.history.user_id.clone(),
            input_kind: req.input_kind(),
            output_format: req.output_format,
            instruction: req.instruction.clone(),
            mode: req.mode,
        };
        match self.history.log_run(&entry).await {
            Ok(id) if !id.is_empty() => Some(id),
            Ok(_) => None,
            Err(err) => {
                warn!("history unavailable, continuing without it: {err:#}");
                None
            }
        }
    }

    async fn report_to_history(&self, run_id: &str, duration_ms: u64, outcome: &RunOutcome) {
        if let Err(err) = self.history.update_run_duration(run_id, duration_ms).await {
            warn!("history: recording duration for {run_id}: {err:#}");
        }
        let RunOutcome::Success {
            artifact_path: Some(path),
        } = outcome
        else {
            return;
        };
        // Hashing reads the whole file.
        let path = path.clone();
        let entry = tokio::task::spawn_blocking(move || ArtifactEntry::from_path(&path))
            .await
            .context("artifact hashing task failed")
            .and_then(|entry| entry);
        let logged = match entry {
            Ok(entry) => self.history.log_artifact(run_id, &entry).await,
            Err(err) => Err(err),
        };
        if let Err(err) = logged {
            warn!("history: recording artifact for {run_id}: {err:#}");
        }
    }
}

pub fn outcome_label(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Success { .. } => "success",
        RunOutcome::Failure { .. } => "failure",
        RunOutcome::Timeout { .. } => "timeout",
        RunOutcome::EnvironmentMissing { .. } => "environment_missing",
        RunOutcome::DependenciesMissing { .. } => "dependencies_missing",
        RunOutcome::LaunchFailed { .. } => "launch_failed",
    }
}
