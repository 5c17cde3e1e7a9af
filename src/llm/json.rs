//! Structured output from free-form model text
//!
//! Models wrap JSON in markdown fences, prefix it with prose, and emit
//! near-JSON (single quotes, trailing commas). Extraction and repair are
//! best-effort; the final parse is always strict serde.

use super::{LlmError, LlmRequest, LlmService};
use serde::de::DeserializeOwned;

/// Run a completion and decode its text as `T`
pub async fn complete_json<T: DeserializeOwned>(
    service: &dyn LlmService,
    request: &LlmRequest,
) -> Result<T, LlmError> {
    let response = service.complete(request).await?;
    parse_lenient(&response.text)
}

/// Decode `T` from model text, repairing common defects before giving up
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let candidate = extract_json(strip_fences(text)).ok_or_else(|| {
        LlmError::invalid_response("Model output contained no JSON value")
    })?;

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let repaired = repair_json(candidate);
            serde_json::from_str(&repaired).map_err(|e| {
                tracing::debug!(strict = %strict_err, repaired = %e, "JSON repair failed");
                LlmError::invalid_response(format!("Model output is not valid JSON: {e}"))
            })
        }
    }
}

/// Contents of the first fenced block, or the trimmed input if unfenced
pub fn strip_fences(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text.trim();
    };
    let after_open = &text[open + 3..];
    // Skip the info string (```json, ```tsx, ...)
    let body_start = after_open.find('\n').map_or(0, |i| i + 1);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Slice from the first `{`/`[` to the last matching closer
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

/// Rewrite single-quoted strings as double-quoted and drop trailing commas
pub fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    // Quote char of the string we are inside, if any
    let mut in_string: Option<char> = None;

    while let Some(c) = chars.next() {
        match in_string {
            Some(quote) => match c {
                '\\' => match chars.next() {
                    // \' is not a JSON escape
                    Some('\'') => out.push('\''),
                    Some(escaped) => {
                        out.push('\\');
                        out.push(escaped);
                    }
                    None => out.push('\\'),
                },
                c if c == quote => {
                    out.push('"');
                    in_string = None;
                }
                '"' => out.push_str("\\\""),
                c => out.push(c),
            },
            None => match c {
                '"' | '\'' => {
                    out.push('"');
                    in_string = Some(c);
                }
                ',' => {
                    let mut lookahead = chars.clone();
                    let next = lookahead.find(|ch| !ch.is_whitespace());
                    if !matches!(next, Some('}' | ']')) {
                        out.push(',');
                    }
                }
                c => out.push(c),
            },
        }
    }

    out
}
