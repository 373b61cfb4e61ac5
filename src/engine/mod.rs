pub mod governor;
pub mod process;
pub mod script;
pub mod types;

use crate::error::RunError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use types::{CapturedOutput, OutputFormat, RunMode, RunOutcome, RunRequest, WorkerExit};

/// The external worker, seen from the orchestrator.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Cheap check that the worker's interpreter starts at all.
    async fn check_environment(&self, cancel: &CancellationToken) -> bool;
    /// Cheap check that the worker's runtime dependencies import.
    async fn check_dependencies(&self, cancel: &CancellationToken) -> bool;
    /// Command the user can run to install missing dependencies.
    fn install_hint(&self) -> String;
    /// The exact invocation `run` would make, quoted for display.
    fn command_line(&self, req: &RunRequest) -> String;
    /// Launch the worker for `req` and supervise it until exit, deadline, or cancellation.
    async fn run(
        &self,
        req: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkerExit, RunError>;
}
