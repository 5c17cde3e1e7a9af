//! Lenient parsing of a JSON prefix
//!
//! Used only to preview tool arguments while they stream in. The input is
//! completed by closing any open string, dropping a dangling key or
//! separator, and closing open containers; the result goes through the
//! strict parser.

use serde_json::Value;

/// Parse the longest sensible completion of a JSON prefix
pub fn parse_partial(prefix: &str) -> Option<Value> {
    let trimmed = prefix.trim_start();
    if trimmed.trim_end().is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    serde_json::from_str(&complete(trimmed)).ok()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

fn complete(prefix: &str) -> String {
    let mut stack: Vec<Container> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in prefix.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push(Container::Object),
            '[' => stack.push(Container::Array),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = prefix.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    trim_dangling(&mut out, stack.last().copied());

    for container in stack.iter().rev() {
        out.push(match container {
            Container::Object => '}',
            Container::Array => ']',
        });
    }
    out
}

/// Remove a trailing separator, a key without a value, or a cut-off literal
fn trim_dangling(out: &mut String, innermost: Option<Container>) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);

        if out.ends_with(',') || out.ends_with(':') {
            out.pop();
            continue;
        }

        // Cut-off literal such as `tr`, `nul` or `12.`
        let in_literal = out
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
        if in_literal {
            let tail_start = out
                .rfind(|c: char| matches!(c, ',' | ':' | '[' | '{'))
                .map_or(0, |i| i + 1);
            if serde_json::from_str::<Value>(out[tail_start..].trim()).is_err() {
                out.truncate(tail_start);
                continue;
            }
        }

        if innermost == Some(Container::Object) && ends_with_key(out) {
            drop_last_string(out);
            continue;
        }
        break;
    }
}

/// True when the text ends with a string that sits in key position
fn ends_with_key(out: &str) -> bool {
    let Some(start) = last_string_start(out) else {
        return false;
    };
    let before = out[..start].trim_end();
    before.ends_with('{') || before.ends_with(',')
}

fn drop_last_string(out: &mut String) {
    if let Some(start) = last_string_start(out) {
        out.truncate(start);
    }
}

/// Byte offset of the opening quote of the string literal ending `out`
fn last_string_start(out: &str) -> Option<usize> {
    if !out.ends_with('"') {
        return None;
    }
    let body = &out[..out.len() - 1];
    let mut idx = body.len();
    loop {
        let quote = body[..idx].rfind('"')?;
        let backslashes = body[..quote].chars().rev().take_while(|&c| c == '\\').count();
        if backslashes % 2 == 0 {
            return Some(quote);
        }
        idx = quote;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_json_passes_through() {
        assert_eq!(parse_partial("{\"a\": [1, 2]}"), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            parse_partial("{\"path\": \"src/App.ts"),
            Some(json!({"path": "src/App.ts"}))
        );
    }

    #[test]
    fn test_dangling_key_and_separator() {
        assert_eq!(parse_partial("{\"a\": 1, \"b"), Some(json!({"a": 1})));
        assert_eq!(parse_partial("{\"a\": 1, \"b\":"), Some(json!({"a": 1})));
        assert_eq!(parse_partial("{\"a\": 1,"), Some(json!({"a": 1})));
        assert_eq!(parse_partial("[1, 2,"), Some(json!([1, 2])));
    }

    #[test]
    fn test_cut_off_literal() {
        assert_eq!(parse_partial("{\"ok\": tr"), Some(json!({})));
        assert_eq!(parse_partial("[true, nu"), Some(json!([true])));
    }

    #[test]
    fn test_nested_and_escaped() {
        assert_eq!(
            parse_partial("{\"a\": {\"b\": [\"x\\\"y"),
            Some(json!({"a": {"b": ["x\"y"]}}))
        );
        assert_eq!(
            parse_partial("{\"s\": \"ends with backslash \\"),
            Some(json!({"s": "ends with backslash "}))
        );
    }

    #[test]
    fn test_nothing_usable() {
        assert_eq!(parse_partial(""), None);
        assert_eq!(parse_partial("   "), None);
    }
}
