use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub artifacts: Artifacts,
    #[serde(default)]
    pub markers: Markers,
    #[serde(default)]
    pub precheck: Precheck,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub history: History,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Interpreter used to run the worker script. `auto` checks `$DOCRUN_PYTHON`
    /// and then falls back to a `PATH` lookup.
    pub python_exe: String,
    pub script_path: String,
    pub working_dir: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}
impl Default for Worker {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            script_path: "engine/main.py".into(),
            working_dir: "".into(),
            env: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub run_seconds: u64,
    pub kill_grace_seconds: u64,
    pub precheck_seconds: u64,
}
impl Default for Timeouts {
    fn default() -> Self {
        Self {
            run_seconds: 300,
            kill_grace_seconds: 5,
            precheck_seconds: 5,
        }
    }
}
impl Timeouts {
    /// Deadline the governor enforces on a worker run.
    pub fn run(&self) -> Duration {
        Duration::from_secs(self.run_seconds)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    pub fn precheck(&self) -> Duration {
        Duration::from_secs(self.precheck_seconds)
    }

    /// Caller-side deadline wrapped around a whole run. The governor needs up
    /// to two grace periods past its own deadline to kill, reap and drain, so
    /// this leaves it a third.
    pub fn outer(&self) -> Duration {
        self.run() + self.kill_grace() * 3
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifacts {
    pub max_wait_seconds: u32,
    pub poll_interval_ms: u64,
}
impl Default for Artifacts {
    fn default() -> Self {
        Self {
            max_wait_seconds: 10,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Markers {
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub stderr_warning: String,
}
impl Default for Markers {
    fn default() -> Self {
        Self {
            success: vec!["OK".into(), "[SUCCESS]".into()],
            failure: vec!["[ERROR]".into(), "[FAILED]".into()],
            stderr_warning: "(?i)warning".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precheck {
    pub enabled: bool,
    pub version_marker: String,
    pub modules: Vec<String>,
    pub install_hint: String,
}
impl Default for Precheck {
    fn default() -> Self {
        Self {
            enabled: true,
            version_marker: "Python".into(),
            modules: vec![
                "pandas".into(),
                "openai".into(),
                "docx".into(),
                "PyPDF2".into(),
                "pytesseract".into(),
                "PIL.Image".into(),
            ],
            install_hint:
                "pip install pandas openai python-docx PyPDF2 pdf2image pytesseract pillow"
                    .into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_instruction_chars: usize,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_instruction_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub enabled: bool,
    pub path: String,
    pub user_id: String,
}
impl Default for History {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "docrun-history.jsonl".into(),
            user_id: "local".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub dir: String,
    pub primary_filename: String,
    pub write_report_json: bool,
    pub report_filename: String,
    pub print_summary: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            dir: "out".into(),
            primary_filename: "result.txt".into(),
            write_report_json: true,
            report_filename: "run-report.json".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}
