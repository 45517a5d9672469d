//! Failure-signal extraction from transcripts and progress logs.

use std::sync::LazyLock;

use regex::Regex;

static ERROR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:\berror\b|\bfailed\b)|\bpanicked\b|\bFAILED\b")
        .expect("error line regex should be valid")
});

/// Last `n` lines of `text`.
pub fn tail_lines(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let mut seen = 0usize;
    for (idx, byte) in text.bytes().enumerate().rev() {
        // Ignore a trailing newline so it does not count as an empty line.
        if byte == b'\n' && idx + 1 != text.len() {
            seen += 1;
            if seen == n {
                return &text[idx + 1..];
            }
        }
    }
    text
}

/// Last `max_bytes` bytes of `text`, moved forward to a char boundary.
pub fn tail_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Lines that look like build or runtime errors.
pub fn error_lines(text: &str) -> Vec<&str> {
    text.lines()
        .filter(|line| ERROR_LINE_RE.is_match(line))
        .collect()
}
