use crate::config::Limits;
use crate::error::RequestError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const OCR_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Excel,
    Word,
    #[value(name = "txt", alias = "plain-text")]
    PlainText,
}

impl OutputFormat {
    /// Token the worker expects in its fourth positional argument.
    pub fn worker_arg(self) -> &'static str {
        match self {
            OutputFormat::Excel => "excel",
            OutputFormat::Word => "word",
            OutputFormat::PlainText => "txt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[value(name = "file")]
    FileToFile,
    Ocr,
    PromptOnly,
}

impl RunMode {
    pub fn worker_arg(self) -> &'static str {
        match self {
            RunMode::FileToFile => "file",
            RunMode::Ocr => "ocr",
            RunMode::PromptOnly => "prompt-only",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input_path: Option<PathBuf>,
    pub primary_output_path: PathBuf,
    pub instruction: String,
    pub output_format: OutputFormat,
    pub mode: RunMode,
}

impl RunRequest {
    pub fn validate(&self, limits: &Limits) -> Result<(), RequestError> {
        if self.instruction.trim().is_empty() {
            return Err(RequestError::EmptyInstruction);
        }
        let len = self.instruction.chars().count();
        if len > limits.max_instruction_chars {
            return Err(RequestError::InstructionTooLong {
                len,
                max: limits.max_instruction_chars,
            });
        }

        if self.mode == RunMode::PromptOnly {
            return Ok(());
        }

        let input = self
            .input_path
            .as_deref()
            .ok_or(RequestError::MissingInput {
                mode: self.mode.worker_arg(),
            })?;
        if !input.is_file() {
            return Err(RequestError::InputNotFound(input.to_path_buf()));
        }

        if self.mode == RunMode::Ocr {
            let ext = input
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_ascii_lowercase())
                .unwrap_or_default();
            if !OCR_EXTENSIONS.contains(&ext.as_str()) {
                return Err(RequestError::NotAnImage {
                    path: input.to_path_buf(),
                    supported: "jpg, jpeg, png, bmp, tiff",
                });
            }
        }
        Ok(())
    }

    /// Positional worker arguments after the script path, in the fixed order
    /// `input, primary output, instruction, format, mode`.
    pub fn worker_args(&self) -> Vec<String> {
        let input = match (self.mode, &self.input_path) {
            (RunMode::PromptOnly, _) | (_, None) => "none".to_string(),
            (_, Some(p)) => p.display().to_string(),
        };
        vec![
            input,
            self.primary_output_path.display().to_string(),
            self.instruction.clone(),
            self.output_format.worker_arg().to_string(),
            self.mode.worker_arg().to_string(),
        ]
    }

    /// Input kind recorded in history: upper-cased extension with a few aliases folded.
    pub fn input_kind(&self) -> String {
        if self.mode == RunMode::PromptOnly {
            return "PROMPT".to_string();
        }
        let ext = self
            .input_path
            .as_deref()
            .and_then(|p| p.extension())
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_uppercase())
            .unwrap_or_default();
        match ext.as_str() {
            "" => "UNKNOWN".to_string(),
            "JPEG" => "JPG".to_string(),
            "XLS" | "CSV" => "XLSX".to_string(),
            _ => ext,
        }
    }
}

/// Both worker streams, complete once both drains have reached end-of-stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// How a supervised worker process ended.
#[derive(Debug, Clone)]
pub enum WorkerExit {
    Exited {
        exit_code: i32,
        output: CapturedOutput,
    },
    TimedOut {
        elapsed: Duration,
    },
    Cancelled {
        elapsed: Duration,
    },
}

/// The only value handed back to callers of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { artifact_path: Option<PathBuf> },
    Failure { reason: String },
    Timeout { elapsed_seconds: f64 },
    EnvironmentMissing { detail: String },
    DependenciesMissing { hint: String },
    LaunchFailed { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }

    /// Process exit code the CLI reports for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success { .. } => 0,
            RunOutcome::Failure { .. } => 1,
            RunOutcome::Timeout { .. } => 2,
            RunOutcome::EnvironmentMissing { .. } => 3,
            RunOutcome::DependenciesMissing { .. } => 4,
            RunOutcome::LaunchFailed { .. } => 5,
        }
    }
}
