//! Run history. The orchestrator only reports to a `HistoryStore`; a failing
//! store never changes a run's outcome.

use crate::engine::{OutputFormat, RunMode};
use crate::util::{ensure_dir, hash_file, now_rfc3339, sha256_hex};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub type RunId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub user_id: String,
    pub input_kind: String,
    pub output_format: OutputFormat,
    pub instruction: String,
    pub mode: RunMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ArtifactEntry {
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_path: path.display().to_string(),
            size_bytes: meta.len(),
            sha256: Some(hash_file(path)?),
        })
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn log_run(&self, entry: &RunEntry) -> Result<RunId>;
    async fn update_run_duration(&self, run_id: &str, millis: u64) -> Result<()>;
    async fn log_artifact(&self, run_id: &str, artifact: &ArtifactEntry) -> Result<()>;
}

/// Used when history is disabled.
pub struct NullHistory;

#[async_trait]
impl HistoryStore for NullHistory {
    async fn log_run(&self, _entry: &RunEntry) -> Result<RunId> {
        Ok(String::new())
    }

    async fn update_run_duration(&self, _run_id: &str, _millis: u64) -> Result<()> {
        Ok(())
    }

    async fn log_artifact(&self, _run_id: &str, _artifact: &ArtifactEntry) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    Run {
        run_id: RunId,
        at: String,
        entry: RunEntry,
    },
    Duration {
        run_id: RunId,
        millis: u64,
    },
    Artifact {
        run_id: RunId,
        artifact: ArtifactEntry,
    },
}

/// One run folded from the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub run_id: RunId,
    pub at: String,
    pub entry: RunEntry,
    pub duration_ms: Option<u64>,
    pub artifacts: Vec<ArtifactEntry>,
}

/// Append-only JSON-lines log of run events.
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event on the blocking pool.
    async fn append(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || append_line(&path, &lock, &line))
            .await
            .context("history writer task failed")?
    }

    /// The `limit` most recent runs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let f = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("open history: {}", self.path.display()));
            }
        };

        let mut records: Vec<HistoryRecord> = Vec::new();
        for (n, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(err) => {
                    warn!("skipping history line {}: {err}", n + 1);
                    continue;
                }
            };
            match event {
                Event::Run { run_id, at, entry } => records.push(HistoryRecord {
                    run_id,
                    at,
                    entry,
                    duration_ms: None,
                    artifacts: Vec::new(),
                }),
                Event::Duration { run_id, millis } => {
                    if let Some(r) = records.iter_mut().rev().find(|r| r.run_id == run_id) {
                        r.duration_ms = Some(millis);
                    }
                }
                Event::Artifact { run_id, artifact } => {
                    if let Some(r) = records.iter_mut().rev().find(|r| r.run_id == run_id) {
                        r.artifacts.push(artifact);
                    }
                }
            }
        }

        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

fn append_line(path: &Path, lock: &Mutex<()>, line: &str) -> Result<()> {
    let _guard = lock.lock().map_err(|_| anyhow!("history lock poisoned"))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open history: {}", path.display()))?;
    writeln!(f, "{line}").with_context(|| format!("write history: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl HistoryStore for JsonlHistory {
    async fn log_run(&self, entry: &RunEntry) -> Result<RunId> {
        let at = now_rfc3339();
        let seq = RUN_SEQ.fetch_add(1, Ordering::Relaxed);
        let seed = format!(
            "{}:{}:{}:{}:{}",
            entry.user_id,
            at,
            std::process::id(),
            seq,
            entry.instruction
        );
        let run_id = sha256_hex(seed.as_bytes())[..16].to_string();
        self.append(&Event::Run {
            run_id: run_id.clone(),
            at,
            entry: entry.clone(),
        })
        .await?;
        Ok(run_id)
    }

    async fn update_run_duration(&self, run_id: &str, millis: u64) -> Result<()> {
        self.append(&Event::Duration {
            run_id: run_id.to_string(),
            millis,
        })
        .await
    }

    async fn log_artifact(&self, run_id: &str, artifact: &ArtifactEntry) -> Result<()> {
        self.append(&Event::Artifact {
            run_id: run_id.to_string(),
            artifact: artifact.clone(),
        })
        .await
    }
}
