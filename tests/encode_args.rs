use docrun::args::{command_line, encode};

const SAMPLES: &[&str] = &[
    "summarize this",
    "say \"hi\" twice",
    "it's",
    "C:\\out\\my result.txt",
    "trailing\\",
    "a\"b",
    "tab\there",
    "two\nlines",
    "costs $5 or `cmd`",
    "pipe | and ; semicolon",
    "résumé d'été",
    "bell\u{7}char",
];

#[test]
fn encoded_tokens_round_trip_through_shell_split() {
    for s in SAMPLES {
        let token = encode(s);
        let parsed = shlex::split(&token).expect("tokenizes");
        assert_eq!(parsed, vec![s.to_string()], "token was {token}");
    }
}

#[test]
fn empty_argument_keeps_its_position() {
    assert_eq!(encode(""), "\"\"");
    let line = command_line("python", &["main.py", "", "out.txt"]);
    assert_eq!(
        shlex::split(&line).unwrap(),
        vec!["python", "main.py", "", "out.txt"]
    );
}

#[test]
fn plain_tokens_stay_unquoted() {
    assert_eq!(encode("excel"), "excel");
    assert_eq!(encode("/tmp/out/result.txt"), "/tmp/out/result.txt");
    assert_eq!(encode("prompt-only"), "prompt-only");
}

#[test]
fn whitespace_forces_quotes() {
    assert_eq!(encode("a b"), "\"a b\"");
    assert_eq!(encode("a\\b c"), "\"a\\\\b c\"");
}

#[test]
fn full_command_line_splits_back_into_argv() {
    let argv = [
        "/opt/engine/main.py",
        "none",
        "/tmp/out dir/result.txt",
        "make a \"table\" of it",
        "word",
        "prompt-only",
    ];
    let line = command_line("/usr/bin/python3", &argv);
    let parsed = shlex::split(&line).unwrap();
    assert_eq!(parsed[0], "/usr/bin/python3");
    assert_eq!(&parsed[1..], &argv);
}
