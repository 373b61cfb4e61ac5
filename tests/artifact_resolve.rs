use docrun::artifact::{ArtifactProbe, resolve, secondary_path};
use docrun::config::Artifacts;
use docrun::engine::OutputFormat;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[test]
fn secondary_names_follow_primary_stem() {
    let primary = Path::new("/tmp/out/result.txt");
    assert_eq!(
        secondary_path(OutputFormat::Excel, primary),
        PathBuf::from("/tmp/out/result_parsed.xlsx")
    );
    assert_eq!(
        secondary_path(OutputFormat::Word, primary),
        PathBuf::from("/tmp/out/result_output.docx")
    );
    assert_eq!(
        secondary_path(OutputFormat::PlainText, primary),
        PathBuf::from("/tmp/out/result_final.txt")
    );
}

#[test]
fn secondary_keeps_directory_with_spaces() {
    let primary = Path::new("/data/my runs/report.v2.txt");
    assert_eq!(
        secondary_path(OutputFormat::Word, primary),
        PathBuf::from("/data/my runs/report.v2_output.docx")
    );
}

#[cfg(windows)]
#[test]
fn secondary_on_windows_drive_path() {
    let primary = Path::new(r"C:\out\result.txt");
    assert_eq!(
        secondary_path(OutputFormat::Excel, primary),
        PathBuf::from(r"C:\out\result_parsed.xlsx")
    );
}

#[tokio::test]
async fn already_present_is_found_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("result.txt");
    std::fs::write(dir.path().join("result_output.docx"), b"PK").unwrap();

    let cfg = Artifacts {
        max_wait_seconds: 0,
        poll_interval_ms: 1000,
    };
    let found = resolve(OutputFormat::Word, &primary, &cfg).await;
    assert_eq!(found, Some(dir.path().join("result_output.docx")));
}

#[tokio::test(start_paused = true)]
async fn late_artifact_is_picked_up_on_next_poll() {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("result.txt");
    let expected = dir.path().join("result_parsed.xlsx");

    let writer_path = expected.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        std::fs::write(writer_path, b"PK").unwrap();
    });

    let start = tokio::time::Instant::now();
    let found = resolve(OutputFormat::Excel, &primary, &Artifacts::default()).await;
    assert_eq!(found, Some(expected));
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2500));
    writer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missing_artifact_gives_up_after_max_wait_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let probe = ArtifactProbe::new(
        OutputFormat::PlainText,
        &dir.path().join("result.txt"),
        &Artifacts {
            max_wait_seconds: 3,
            poll_interval_ms: 500,
        },
    );
    assert_eq!(probe.max_attempts, 6);

    let start = tokio::time::Instant::now();
    assert_eq!(probe.wait().await, None);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3500));
}

#[tokio::test(start_paused = true)]
async fn fast_polling_still_waits_the_configured_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Artifacts {
        max_wait_seconds: 30,
        poll_interval_ms: 100,
    };
    let start = tokio::time::Instant::now();
    let found = resolve(OutputFormat::Excel, &dir.path().join("result.txt"), &cfg).await;
    assert_eq!(found, None);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(30) && waited < Duration::from_millis(30_200));
}

#[test]
fn uneven_interval_rounds_attempts_up() {
    let probe = ArtifactProbe::new(
        OutputFormat::Word,
        Path::new("/tmp/result.txt"),
        &Artifacts {
            max_wait_seconds: 1,
            poll_interval_ms: 300,
        },
    );
    assert_eq!(probe.max_attempts, 4);

    let probe = ArtifactProbe::new(
        OutputFormat::Word,
        Path::new("/tmp/result.txt"),
        &Artifacts {
            max_wait_seconds: 1,
            poll_interval_ms: 0,
        },
    );
    assert_eq!(probe.max_attempts, 1000);
    assert_eq!(probe.interval, Duration::from_millis(1));
}
