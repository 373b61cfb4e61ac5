use crate::config::Artifacts;
use crate::engine::OutputFormat;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where the worker writes the format-specific file derived from `primary`.
///
/// `dir/result.txt` becomes `dir/result_parsed.xlsx`, `dir/result_output.docx`
/// or `dir/result_final.txt`.
pub fn secondary_path(format: OutputFormat, primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match format {
        OutputFormat::Excel => format!("{stem}_parsed.xlsx"),
        OutputFormat::Word => format!("{stem}_output.docx"),
        OutputFormat::PlainText => format!("{stem}_final.txt"),
    };
    primary.with_file_name(name)
}

/// A bounded wait for one file to appear.
#[derive(Debug, Clone)]
pub struct ArtifactProbe {
    pub expected_path: PathBuf,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ArtifactProbe {
    /// Polls often enough to cover `max_wait_seconds` at `poll_interval_ms`.
    /// A zero interval is treated as 1 ms.
    pub fn new(format: OutputFormat, primary: &Path, cfg: &Artifacts) -> Self {
        let interval_ms = cfg.poll_interval_ms.max(1);
        let budget_ms = u64::from(cfg.max_wait_seconds) * 1000;
        Self {
            expected_path: secondary_path(format, primary),
            max_attempts: u32::try_from(budget_ms.div_ceil(interval_ms)).unwrap_or(u32::MAX),
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Check once, then up to `max_attempts` more times `interval` apart.
    /// `None` means the file never showed up; that is not a failure.
    pub async fn wait(self) -> Option<PathBuf> {
        if self.expected_path.exists() {
            return Some(self.expected_path);
        }
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.interval).await;
            if self.expected_path.exists() {
                debug!(
                    "artifact {} appeared after {attempt} poll(s)",
                    self.expected_path.display()
                );
                return Some(self.expected_path);
            }
        }
        info!(
            "artifact {} did not appear after {} poll(s)",
            self.expected_path.display(),
            self.max_attempts
        );
        None
    }
}

/// Wait for the secondary artifact of a successful run.
pub async fn resolve(format: OutputFormat, primary: &Path, cfg: &Artifacts) -> Option<PathBuf> {
    ArtifactProbe::new(format, primary, cfg).wait().await
}
