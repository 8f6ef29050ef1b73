//! Turns raw operation errors into the message stored on a Failed job.

const MAX_LEN: usize = 200;
const FALLBACK: &str = "operation failed";

/// First meaningful line of `raw`, with stack frames dropped, file paths masked and the
/// length bounded. Never empty.
pub fn sanitize_error_message(raw: &str) -> String {
    let Some(line) = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_frame(l))
    else {
        return FALLBACK.to_string();
    };
    let masked = line
        .split_whitespace()
        .map(mask_path)
        .collect::<Vec<_>>()
        .join(" ");
    let bounded = truncate(&masked, MAX_LEN);
    if bounded.is_empty() {
        FALLBACK.to_string()
    } else {
        bounded
    }
}

fn is_frame(line: &str) -> bool {
    line.starts_with("at ")
        || line.starts_with("File \"")
        || line.starts_with("Traceback")
        || line.starts_with("stack backtrace")
        || line.starts_with("backtrace:")
        || (line.starts_with(|c: char| c.is_ascii_digit()) && line.contains(": ") && line.contains("::"))
}

fn looks_like_path(s: &str) -> bool {
    s.starts_with('/')
        || s.starts_with("./")
        || s.starts_with("../")
        || s.starts_with("~/")
        || s.get(1..3) == Some(":\\")
        || s.contains(".rs:")
}

fn mask_path(word: &str) -> String {
    let start = word
        .find(|c: char| !matches!(c, '"' | '\'' | '(' | '['))
        .unwrap_or(word.len());
    let end = word
        .rfind(|c: char| !matches!(c, '"' | '\'' | ')' | ']' | ':' | ',' | ';' | '.'))
        .map_or(start, |i| i + word[i..].chars().next().map_or(1, char::len_utf8));
    let core = word.get(start..end.max(start)).unwrap_or("");
    if looks_like_path(core) {
        format!("{}<path>{}", &word[..start], &word[end.max(start)..])
    } else {
        word.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
