//! Quoting of untrusted worker arguments.
//!
//! Process arguments are handed to the OS as a proper argv, so quoting is only
//! needed where a single command line string is produced: debug logs and the
//! run report. Those lines must tokenize back into the exact argv under a
//! POSIX-shell-like parser, so a failed run can be reproduced by pasting it.

/// Characters that force the token into double quotes even without whitespace.
const SHELL_SPECIAL: &[char] = &[
    '\'', ';', '&', '|', '<', '>', '(', ')', '*', '?', '[', ']', '#', '~', '{', '}', '!', '$',
    '`',
];

/// Encode one argument as a single shell-like token.
///
/// Empty input encodes to `""` so positional alignment never shifts.
pub fn encode(value: &str) -> String {
    if value.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || SHELL_SPECIAL.contains(&c));

    let mut out = String::with_capacity(value.len() + 2);
    if needs_quotes {
        out.push('"');
    }
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' | '`' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    if needs_quotes {
        out.push('"');
    }
    out
}

/// Render a program plus its argv as one line of encoded tokens.
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .map(encode)
        .collect::<Vec<_>>()
        .join(" ")
}
