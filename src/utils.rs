use serde_json::Value;

/// First `max` characters of `s`, never splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

pub fn clip(s: &str, max: usize) -> String {
    let head = truncate_chars(s, max);
    if head.len() == s.len() {
        return s.to_string();
    }
    let mut out = head.to_string();
    out.push_str("… [truncated]");
    out
}

pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
