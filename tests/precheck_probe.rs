#![cfg(unix)]

use docrun::config::Config;
use docrun::engine::Engine;
use docrun::engine::script::{ScriptEngine, import_statement};
use docrun::precheck;
use docrun::engine::RunOutcome;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const FAKE_PYTHON: &str = r#"#!/bin/sh
case "$1" in
  --version)
    [ -n "$SLOW_VERSION" ] && sleep 30
    echo "Python 3.12.1" ;;
  -c)
    case "$2" in
      *missingmod*) echo "ModuleNotFoundError: No module named 'missingmod'" >&2; exit 1 ;;
      *) echo OK ;;
    esac ;;
  *) exit 2 ;;
esac
"#;

#[test]
fn import_statement_prints_ok_marker() {
    assert_eq!(
        import_statement(&["pandas".into(), "PIL.Image".into()]),
        "import pandas, PIL.Image; print('OK')"
    );
    assert_eq!(import_statement(&[]), "print('OK')");
}

fn fake_python(dir: &std::path::Path) -> std::path::PathBuf {
    let exe = dir.join("python3");
    std::fs::write(&exe, FAKE_PYTHON).unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
    exe
}

#[tokio::test]
async fn checks_run_the_configured_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let exe = fake_python(dir.path());
    let cancel = CancellationToken::new();

    let mut cfg = Config::default();
    cfg.worker.python_exe = exe.display().to_string();
    let engine = ScriptEngine::new(&cfg);
    assert!(engine.check_environment(&cancel).await);
    assert!(engine.check_dependencies(&cancel).await);
    assert!(precheck::gate(&engine, &cancel).await.is_none());

    cfg.precheck.modules.push("missingmod".into());
    let engine = ScriptEngine::new(&cfg);
    assert!(engine.check_environment(&cancel).await);
    assert!(!engine.check_dependencies(&cancel).await);
    let hint = engine.install_hint();
    assert!(hint.starts_with(&exe.display().to_string()), "{hint}");
    assert!(hint.contains("pip install"));

    cfg.worker.python_exe = dir.path().join("absent").display().to_string();
    let engine = ScriptEngine::new(&cfg);
    assert!(!engine.check_environment(&cancel).await);
}

#[tokio::test]
async fn interrupt_stops_a_hanging_version_check() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.worker.python_exe = fake_python(dir.path()).display().to_string();
    cfg.worker.env.insert("SLOW_VERSION".into(), "1".into());
    cfg.timeouts.precheck_seconds = 60;
    let engine = ScriptEngine::new(&cfg);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = precheck::gate(&engine, &cancel).await;
    assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
    match outcome {
        Some(RunOutcome::Failure { reason }) => assert!(reason.contains("cancelled"), "{reason}"),
        other => panic!("expected a cancelled failure, got {other:?}"),
    }
}
