use crate::engine::{Engine, RunOutcome};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Result of both environment checks, as printed by `docrun doctor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvDiag {
    pub interpreter: String,
    pub script: String,
    pub environment_ok: bool,
    pub dependencies_ok: bool,
    #[serde(default)]
    pub install_hint: Option<String>,
}

/// Run the environment check, then the dependency check.
///
/// Returns the outcome that must be reported instead of launching the worker,
/// or `None` when both pass. The dependency check is skipped when the
/// interpreter itself is unusable. A cancelled check is reported as a
/// cancellation, not as a missing environment.
pub async fn gate<E: Engine + ?Sized>(
    engine: &E,
    cancel: &CancellationToken,
) -> Option<RunOutcome> {
    let environment_ok = engine.check_environment(cancel).await;
    if cancel.is_cancelled() {
        return Some(cancelled());
    }
    if !environment_ok {
        return Some(RunOutcome::EnvironmentMissing {
            detail: "worker interpreter is missing or does not start".to_string(),
        });
    }

    let dependencies_ok = engine.check_dependencies(cancel).await;
    if cancel.is_cancelled() {
        return Some(cancelled());
    }
    if !dependencies_ok {
        return Some(RunOutcome::DependenciesMissing {
            hint: engine.install_hint(),
        });
    }
    info!("environment and dependency checks passed");
    None
}

fn cancelled() -> RunOutcome {
    RunOutcome::Failure {
        reason: "run cancelled during environment checks".to_string(),
    }
}

pub async fn diagnose<E: Engine + ?Sized>(
    engine: &E,
    interpreter: &str,
    script: &str,
    cancel: &CancellationToken,
) -> EnvDiag {
    let environment_ok = engine.check_environment(cancel).await;
    let dependencies_ok = environment_ok && engine.check_dependencies(cancel).await;
    EnvDiag {
        interpreter: interpreter.to_string(),
        script: script.to_string(),
        environment_ok,
        dependencies_ok,
        install_hint: (environment_ok && !dependencies_ok).then(|| engine.install_hint()),
    }
}
