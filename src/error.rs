use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Reasons a worker could not be started. Nothing is spawned when any of
/// these is returned.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("worker executable not found or not executable: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("worker script not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    /// True when the run's own inputs are unusable: the worker script is
    /// missing or the output directory cannot be created. A missing
    /// interpreter is a launch refusal, like the OS rejecting the spawn.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LaunchError::MissingScript(_) | LaunchError::OutputDir { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("waiting for worker: {0}")]
    Wait(#[source] io::Error),

    #[error("reading worker {stream}: {source}")]
    Stream {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{stream} reader task failed: {message}")]
    Drain {
        stream: &'static str,
        message: String,
    },
}

/// A run request that must not reach the worker.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("instruction is empty")]
    EmptyInstruction,

    #[error("instruction is {len} characters; the limit is {max}")]
    InstructionTooLong { len: usize, max: usize },

    #[error("mode {mode} needs an input file")]
    MissingInput { mode: &'static str },

    #[error("input does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("ocr input is not a supported image ({}): {}", .supported, .path.display())]
    NotAnImage {
        path: PathBuf,
        supported: &'static str,
    },
}
