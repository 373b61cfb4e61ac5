use crate::classify::Rule;
use crate::engine::{OutputFormat, RunMode, RunOutcome};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything known about one run once it is over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Classification rule that decided the verdict, when the worker exited on its own.
    #[serde(default)]
    pub decided_by: Option<Rule>,
    pub mode: RunMode,
    pub output_format: OutputFormat,
    pub primary_output: PathBuf,
    #[serde(default)]
    pub command_line: Option<String>,
    pub started: String,
    pub finished: String,
    pub duration_ms: u64,
}
