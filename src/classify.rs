//! Turns an exited worker's exit code, streams and primary output file into a
//! verdict.
//!
//! The signals are evaluated by an ordered list of rules; the first rule that
//! has an opinion decides. Order matters: marker text can legitimately appear
//! in otherwise failing output, so exit code and stderr are checked first and
//! the output file is only consulted when stdout carries no marker at all.

use crate::config::Markers;
use crate::engine::CapturedOutput;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    ExitCode,
    Stderr,
    SuccessMarker,
    FailureMarker,
    OutputFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub rule: Rule,
    pub verdict: Verdict,
}

/// State of the primary output file at classification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileProbe {
    Missing,
    Contents(String),
    Unreadable(String),
}

impl FileProbe {
    pub fn read(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => FileProbe::Contents(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == ErrorKind::NotFound => FileProbe::Missing,
            Err(e) => FileProbe::Unreadable(format!("{}: {e}", path.display())),
        }
    }
}

pub struct Signals<'a> {
    pub exit_code: i32,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub primary: &'a FileProbe,
}

pub type RuleFn = fn(&Classifier, &Signals<'_>) -> Option<Verdict>;

/// Evaluation order. The first `Some` wins.
pub const RULES: [(Rule, RuleFn); 5] = [
    (Rule::ExitCode, exit_code as RuleFn),
    (Rule::Stderr, stderr as RuleFn),
    (Rule::SuccessMarker, success_marker as RuleFn),
    (Rule::FailureMarker, failure_marker as RuleFn),
    (Rule::OutputFile, output_file as RuleFn),
];

pub struct Classifier {
    success: Vec<String>,
    failure: Vec<String>,
    stderr_warning: Regex,
}

impl Classifier {
    pub fn new(markers: &Markers) -> Result<Self, regex::Error> {
        Ok(Self {
            success: markers.success.clone(),
            failure: markers.failure.clone(),
            stderr_warning: Regex::new(&markers.stderr_warning)?,
        })
    }

    pub fn classify(&self, signals: &Signals<'_>) -> Classification {
        RULES
            .iter()
            .find_map(|(rule, f)| {
                f(self, signals).map(|verdict| Classification {
                    rule: *rule,
                    verdict,
                })
            })
            .unwrap_or(Classification {
                rule: Rule::OutputFile,
                verdict: Verdict::Failure("no classification rule matched".to_string()),
            })
    }

    /// Classify a finished run, probing `primary_output` on disk.
    pub fn classify_exit(
        &self,
        exit_code: i32,
        output: &CapturedOutput,
        primary_output: &Path,
    ) -> Classification {
        let primary = FileProbe::read(primary_output);
        self.classify(&Signals {
            exit_code,
            stdout: &output.stdout,
            stderr: &output.stderr,
            primary: &primary,
        })
    }

    fn has_success_marker(&self, text: &str) -> bool {
        self.success.iter().any(|m| text.contains(m.as_str()))
    }

    fn has_failure_marker(&self, text: &str) -> bool {
        self.failure.iter().any(|m| text.contains(m.as_str()))
    }

    fn starts_with_failure_marker(&self, text: &str) -> bool {
        let text = text.trim_start();
        self.failure.iter().any(|m| text.starts_with(m.as_str()))
    }
}

fn exit_code(_: &Classifier, s: &Signals<'_>) -> Option<Verdict> {
    (s.exit_code != 0).then(|| {
        Verdict::Failure(format!(
            "worker exited with code {}\nstderr: {}\nstdout: {}",
            s.exit_code,
            s.stderr.trim(),
            s.stdout.trim()
        ))
    })
}

fn stderr(c: &Classifier, s: &Signals<'_>) -> Option<Verdict> {
    let err = s.stderr.trim();
    (!err.is_empty() && !c.stderr_warning.is_match(err))
        .then(|| Verdict::Failure(format!("worker wrote to stderr: {err}")))
}

fn success_marker(c: &Classifier, s: &Signals<'_>) -> Option<Verdict> {
    c.has_success_marker(s.stdout).then_some(Verdict::Success)
}

fn failure_marker(c: &Classifier, s: &Signals<'_>) -> Option<Verdict> {
    c.has_failure_marker(s.stdout)
        .then(|| Verdict::Failure(s.stdout.to_string()))
}

fn output_file(c: &Classifier, s: &Signals<'_>) -> Option<Verdict> {
    let verdict = match s.primary {
        FileProbe::Contents(text)
            if !text.trim().is_empty() && !c.starts_with_failure_marker(text) =>
        {
            Verdict::Success
        }
        FileProbe::Contents(text) => Verdict::Failure(format!(
            "primary output is empty or reports an error: {}",
            text.trim()
        )),
        FileProbe::Missing => Verdict::Failure(format!(
            "primary output was not created\nstdout: {}\nstderr: {}",
            s.stdout.trim(),
            s.stderr.trim()
        )),
        FileProbe::Unreadable(err) => Verdict::Failure(format!("cannot read primary output: {err}")),
    };
    Some(verdict)
}
