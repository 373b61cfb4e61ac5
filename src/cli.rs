use crate::{
    config::Config,
    engine::{OutputFormat, RunMode, RunRequest, script::ScriptEngine},
    history::{HistoryStore, JsonlHistory, NullHistory},
    pipeline::{Pipeline, outcome_label},
    precheck,
    report::RunReport,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docrun")]
#[command(about = "Run a document-conversion worker under a hard deadline and report a clear verdict")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./docrun.toml if present, else built-in defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the worker interpreter and its dependencies are usable.
    Doctor {},
    /// Run the worker once.
    Run {
        /// Input document or image. Not needed for prompt-only runs.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Primary output file. Defaults to <output.dir>/<output.primary_filename>.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, short = 'i')]
        instruction: String,
        #[arg(long, value_enum, default_value = "txt")]
        format: OutputFormat,
        #[arg(long, value_enum, default_value = "file")]
        mode: RunMode,
        /// Skip the interpreter and dependency checks.
        #[arg(long)]
        skip_precheck: bool,
    },
    /// Show recent runs from the local history log.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Execute the command and return the process exit code.
pub async fn dispatch(args: Args) -> Result<i32> {
    let mut cfg = load_config(args.config.as_deref())?;
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match args.cmd {
        Command::Doctor {} => doctor(&cfg).await,
        Command::Run {
            input,
            output,
            instruction,
            format,
            mode,
            skip_precheck,
        } => {
            if skip_precheck {
                cfg.precheck.enabled = false;
            }
            let primary_output_path = output.unwrap_or_else(|| {
                PathBuf::from(&cfg.output.dir).join(&cfg.output.primary_filename)
            });
            let req = RunRequest {
                input_path: input,
                primary_output_path,
                instruction,
                output_format: format,
                mode,
            };
            run(&cfg, &req).await
        }
        Command::History { limit } => history(&cfg, limit),
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    let default = PathBuf::from("docrun.toml");
    if default.exists() {
        Config::load(&default)
    } else {
        Ok(Config::default())
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = if args.log_level.is_some() {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    // Keep stdout for the JSON summary.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = match file_path {
        Some(path) => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            ensure_dir(parent)?;
            let file = std::fs::File::create(path)
                .with_context(|| format!("create log file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.output.dir).join("docrun.log"))
}

async fn doctor(cfg: &Config) -> Result<i32> {
    let engine = ScriptEngine::new(cfg);
    let diag = precheck::diagnose(
        &engine,
        &engine.python_exe().display().to_string(),
        &engine.script().display().to_string(),
        &CancellationToken::new(),
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(match (diag.environment_ok, diag.dependencies_ok) {
        (true, true) => 0,
        (false, _) => 3,
        (true, false) => 4,
    })
}

async fn run(cfg: &Config, req: &RunRequest) -> Result<i32> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping worker");
            on_signal.cancel();
        }
    });

    let engine = ScriptEngine::new(cfg);
    let report = if cfg.history.enabled {
        run_with(cfg, engine, JsonlHistory::new(&cfg.history.path), req, &cancel).await?
    } else {
        run_with(cfg, engine, NullHistory, req, &cancel).await?
    };

    if cfg.output.write_report_json {
        write_report(cfg, &report)?;
    }

    if cfg.output.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": outcome_label(&report.outcome),
                "outcome": report.outcome,
                "run_id": report.run_id,
                "duration_ms": report.duration_ms,
            }))?
        );
    }

    Ok(report.outcome.exit_code())
}

async fn run_with<H: HistoryStore>(
    cfg: &Config,
    engine: ScriptEngine,
    history: H,
    req: &RunRequest,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let pipeline = Pipeline::new(cfg, engine, history)?;
    info!(
        "running mode={} format={} output={}",
        req.mode.worker_arg(),
        req.output_format.worker_arg(),
        req.primary_output_path.display()
    );
    Ok(pipeline.run(req, cancel).await)
}

fn write_report(cfg: &Config, report: &RunReport) -> Result<()> {
    let dir = report
        .primary_output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;
    let path = dir.join(&cfg.output.report_filename);
    std::fs::write(&path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("writing report: {}", path.display()))
}

fn history(cfg: &Config, limit: usize) -> Result<i32> {
    let store = JsonlHistory::new(&cfg.history.path);
    let records = store.recent(limit)?;
    info!("{} run(s) from {}", records.len(), store.path().display());
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(0)
}
