//! Partial-JSON recovery.
//!
//! While an assistant message streams, a tool call's `arguments` field
//! arrives as a sequence of string fragments that only form valid JSON once
//! the call is complete. The turn loop still needs a best-effort view of
//! those arguments after every fragment (to show the user live progress, and
//! because a provider can drop the connection mid-call). This module repairs
//! a truncated JSON document by closing every structure left open on the
//! scanner's stack, then falls back to pulling out whichever top-level string
//! fields it can find if even that repair doesn't parse.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object,
    Array,
}

/// Closes off a truncated JSON fragment by tracking bracket/brace/string
/// nesting on an explicit stack and appending whatever closers are needed to
/// make it syntactically complete. Must always produce some value and never
/// panic, however malformed the input.
fn close_fragment(input: &str) -> String {
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = input.chars().peekable();
    let mut out = String::with_capacity(input.len() + 8);

    while let Some(c) = chars.next() {
        out.push(c);
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(Frame::Object),
            '[' => stack.push(Frame::Array),
            '}' => {
                if stack.last() == Some(&Frame::Object) {
                    stack.pop();
                }
            }
            ']' => {
                if stack.last() == Some(&Frame::Array) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    // An unterminated string must be closed before any bracket closers,
    // otherwise the closers themselves get swallowed into the string.
    if in_string {
        if escaped {
            // Fragment ended mid-escape-sequence; drop the dangling backslash
            // rather than emit an invalid `\"` that reopens the string.
            out.pop();
        }
        out.push('"');
    }

    // Trim a dangling trailing comma or colon before closing — `{"a":` or
    // `{"a":1,` are both valid prefixes of a truncated object but invalid on
    // their own once closed.
    let trimmed = out.trim_end();
    let mut out = trimmed.trim_end_matches([',', ':']).to_string();

    for frame in stack.iter().rev() {
        out.push(match frame {
            Frame::Object => '}',
            Frame::Array => ']',
        });
    }
    out
}

/// Best-effort extraction of `"key": "value"` / `"key": <number>` pairs from
/// a fragment that doesn't parse even after [`close_fragment`] — e.g. a
/// dangling key with no value yet. Used only as the last-resort fallback.
fn extract_known_fields(input: &str) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if let Some((key, after_key)) = read_quoted(input, i) {
                let mut j = after_key;
                while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b':' {
                    j += 1;
                    while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j] == b'"' {
                        if let Some((val, after_val)) = read_quoted(input, j) {
                            out.insert(key, Value::String(val));
                            i = after_val;
                            continue;
                        }
                    } else {
                        let start = j;
                        while j < bytes.len() && !matches!(bytes[j], b',' | b'}' | b']') {
                            j += 1;
                        }
                        let raw = input[start..j].trim();
                        if let Ok(n) = raw.parse::<f64>() {
                            if let Some(num) = serde_json::Number::from_f64(n) {
                                out.insert(key, Value::Number(num));
                            }
                        } else if raw == "true" || raw == "false" {
                            out.insert(key, Value::Bool(raw == "true"));
                        }
                        i = j;
                        continue;
                    }
                }
                i = after_key;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Reads a `"..."` string starting at byte offset `start` (which must point
/// at the opening quote); returns the unescaped-enough content and the
/// offset just past the closing quote.
fn read_quoted(input: &str, start: usize) -> Option<(String, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start) != Some(&b'"') {
        return None;
    }
    let mut i = start + 1;
    let mut s = String::new();
    let mut escaped = false;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if escaped {
            s.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some((s, i + 1));
        } else {
            s.push(c);
        }
        i += 1;
    }
    None
}

/// Parses a possibly-truncated JSON object, recovering as much structure as
/// possible. Always returns a map (empty if nothing could be recovered at
/// all), never an `Err` — this is a best-effort display/progress path, not a
/// validation path (validation happens separately against the tool's schema
/// once the call is complete).
pub fn parse_partial_json(fragment: &str) -> HashMap<String, Value> {
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        return HashMap::new();
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return map.into_iter().collect();
    }

    let closed = close_fragment(trimmed);
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&closed) {
        return map.into_iter().collect();
    }

    extract_known_fields(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_object_parses_directly() {
        let v = parse_partial_json(r#"{"path": "src/main.rs", "limit": 10}"#);
        assert_eq!(v.get("path").unwrap(), "src/main.rs");
        assert_eq!(v.get("limit").unwrap(), &Value::from(10));
    }

    #[test]
    fn truncated_mid_string_value_recovers_via_closing() {
        let v = parse_partial_json(r#"{"path": "src/mai"#);
        assert_eq!(v.get("path").unwrap(), "src/mai");
    }

    #[test]
    fn truncated_after_key_with_no_value_falls_back() {
        let v = parse_partial_json(r#"{"path": "src/main.rs", "limi"#);
        assert_eq!(v.get("path").unwrap(), "src/main.rs");
    }

    #[test]
    fn truncated_mid_nested_array_closes_all_frames() {
        let v = parse_partial_json(r#"{"files": ["a.rs", "b.rs"#);
        assert!(v.contains_key("files"));
    }

    #[test]
    fn dangling_trailing_comma_is_trimmed_before_closing() {
        let v = parse_partial_json(r#"{"a": 1,"#);
        assert_eq!(v.get("a").unwrap(), &Value::from(1));
    }

    #[test]
    fn empty_fragment_returns_empty_map() {
        assert!(parse_partial_json("").is_empty());
        assert!(parse_partial_json("   ").is_empty());
    }

    #[test]
    fn never_panics_on_garbage_input() {
        let inputs = ["{{{{", r#"{"a": "\"#, "][[", r#"{"a":"#, "\"\\"];
        for input in inputs {
            let _ = parse_partial_json(input);
        }
    }
}
