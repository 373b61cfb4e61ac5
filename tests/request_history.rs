use docrun::config::Limits;
use docrun::engine::{OutputFormat, RunMode, RunRequest};
use docrun::error::RequestError;
use docrun::history::{ArtifactEntry, HistoryStore, JsonlHistory, RunEntry};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn request(input: Option<PathBuf>, mode: RunMode) -> RunRequest {
    RunRequest {
        input_path: input,
        primary_output_path: PathBuf::from("out/result.txt"),
        instruction: "extract the totals".into(),
        output_format: OutputFormat::Excel,
        mode,
    }
}

#[test]
fn prompt_only_ignores_input_and_passes_none() {
    let req = request(Some(PathBuf::from("/does/not/matter.pdf")), RunMode::PromptOnly);
    req.validate(&Limits::default()).unwrap();
    assert_eq!(
        req.worker_args(),
        vec![
            "none",
            "out/result.txt",
            "extract the totals",
            "excel",
            "prompt-only"
        ]
    );
    assert_eq!(req.input_kind(), "PROMPT");
}

#[test]
fn ocr_accepts_images_only() {
    let dir = tempfile::tempdir().unwrap();
    let scan = dir.path().join("scan.JPEG");
    let pdf = dir.path().join("scan.pdf");
    std::fs::write(&scan, b"\xff\xd8").unwrap();
    std::fs::write(&pdf, b"%PDF").unwrap();

    let req = request(Some(scan), RunMode::Ocr);
    req.validate(&Limits::default()).unwrap();
    assert_eq!(req.input_kind(), "JPG");

    let req = request(Some(pdf), RunMode::Ocr);
    assert!(matches!(
        req.validate(&Limits::default()),
        Err(RequestError::NotAnImage { .. })
    ));
}

#[test]
fn file_mode_needs_an_existing_input() {
    let req = request(None, RunMode::FileToFile);
    assert!(matches!(
        req.validate(&Limits::default()),
        Err(RequestError::MissingInput { mode: "file" })
    ));

    let req = request(Some(PathBuf::from("/no/such/sheet.xls")), RunMode::FileToFile);
    assert!(matches!(
        req.validate(&Limits::default()),
        Err(RequestError::InputNotFound(_))
    ));
    assert_eq!(req.input_kind(), "XLSX");
}

#[test]
fn instruction_limit_counts_characters() {
    let mut req = request(None, RunMode::PromptOnly);
    req.instruction = "é".repeat(5);
    let limits = Limits {
        max_instruction_chars: 5,
    };
    req.validate(&limits).unwrap();
    req.instruction.push('x');
    assert!(matches!(
        req.validate(&limits),
        Err(RequestError::InstructionTooLong { len: 6, max: 5 })
    ));
}

fn entry(instruction: &str) -> RunEntry {
    RunEntry {
        user_id: "local".into(),
        input_kind: "PDF".into(),
        output_format: OutputFormat::Word,
        instruction: instruction.into(),
        mode: RunMode::FileToFile,
    }
}

#[tokio::test]
async fn jsonl_history_folds_events_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonlHistory::new(dir.path().join("nested").join("history.jsonl"));

    let first = history.log_run(&entry("first")).await.unwrap();
    let second = history.log_run(&entry("second")).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(first.len(), 16);

    history.update_run_duration(&first, 1200).await.unwrap();
    let artifact_path = dir.path().join("result_output.docx");
    std::fs::write(&artifact_path, b"hello").unwrap();
    let artifact = ArtifactEntry::from_path(&artifact_path).unwrap();
    assert_eq!(
        artifact.sha256.as_deref(),
        Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
    );
    history.log_artifact(&first, &artifact).await.unwrap();

    let records = history.recent(10).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].run_id, second);
    assert_eq!(records[0].duration_ms, None);
    assert_eq!(records[1].run_id, first);
    assert_eq!(records[1].duration_ms, Some(1200));
    assert_eq!(records[1].artifacts, vec![artifact]);

    assert_eq!(history.recent(1).unwrap().len(), 1);
}

#[tokio::test]
async fn jsonl_history_skips_corrupt_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");
    let history = JsonlHistory::new(&path);
    history.log_run(&entry("kept")).await.unwrap();

    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(f, "{{not json").unwrap();
    writeln!(f).unwrap();
    drop(f);
    history.log_run(&entry("also kept")).await.unwrap();

    let records = history.recent(10).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].entry.instruction, "also kept");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_keep_lines_whole() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(JsonlHistory::new(dir.path().join("history.jsonl")));

    let mut tasks = Vec::new();
    for n in 0..32 {
        let history = Arc::clone(&history);
        tasks.push(tokio::spawn(async move {
            let id = history.log_run(&entry(&format!("run {n}"))).await.unwrap();
            history.update_run_duration(&id, n).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let records = history.recent(100).unwrap();
    assert_eq!(records.len(), 32);
    assert!(records.iter().all(|r| r.duration_ms.is_some()));
}

#[test]
fn missing_history_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let history = JsonlHistory::new(dir.path().join("never-written.jsonl"));
    assert!(history.recent(5).unwrap().is_empty());
}
