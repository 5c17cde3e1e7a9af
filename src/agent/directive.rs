//! Streaming parser for `<forge-*>` directive tags
//!
//! Text arrives in arbitrary fragments. The parser holds back any tail that
//! could still become a tag (or a closing tag) and emits everything else as
//! soon as it is unambiguous.

use super::partial_json::parse_partial;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

const OPEN_PREFIX: &str = "<forge-";

static HEADER_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^<forge-([a-z][a-z0-9-]*)((?:\s[^>]*)?)>$").ok());
static ATTR_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*"([^"]*)""#).ok());

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("Malformed directive tag: {0}")]
    MalformedTag(String),
    #[error("Directive <forge-{0}> was never closed")]
    Unterminated(String),
    #[error("Unknown directive: {0}")]
    UnknownDirective(String),
    #[error("Directive {name} is missing attribute {attribute}")]
    MissingAttribute { name: String, attribute: &'static str },
    #[error("Invalid arguments for {name}: {message}")]
    InvalidArguments { name: String, message: String },
}

/// One fully parsed directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Position among the directives of this stream, from 0
    pub index: usize,
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    /// `None` for self-closing tags
    pub body: Option<String>,
}

impl Directive {
    /// Registry operation this directive resolves to
    pub fn tool_name(&self) -> Result<String, DirectiveError> {
        let tool = match self.name.as_str() {
            "write" => "write_file",
            "delete" => "delete_file",
            "rename" => "rename_file",
            "add-dependency" => "add_dependency",
            "summary" => "set_summary",
            "read" => "read_file",
            "tool" => {
                return self
                    .attrs
                    .get("name")
                    .cloned()
                    .ok_or_else(|| DirectiveError::MissingAttribute {
                        name: self.name.clone(),
                        attribute: "name",
                    })
            }
            other => return Err(DirectiveError::UnknownDirective(other.to_string())),
        };
        Ok(tool.to_string())
    }

    /// Strict argument object; only valid once the tag has closed
    pub fn arguments(&self) -> Result<Value, DirectiveError> {
        if self.name == "tool" {
            let body = self.body.as_deref().unwrap_or("").trim();
            if body.is_empty() {
                return Ok(json!({}));
            }
            return serde_json::from_str(body).map_err(|e| DirectiveError::InvalidArguments {
                name: self.attrs.get("name").cloned().unwrap_or_default(),
                message: e.to_string(),
            });
        }
        Ok(tag_arguments(&self.name, &self.attrs, self.body.as_deref()))
    }
}

fn tag_arguments(name: &str, attrs: &BTreeMap<String, String>, body: Option<&str>) -> Value {
    let mut args: Map<String, Value> = attrs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if let Some(body) = body {
        let key = if name == "summary" { "text" } else { "content" };
        args.insert(key.to_string(), Value::String(body.to_string()));
    }
    Value::Object(args)
}

/// Output of the streaming parser
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// Prose between directives
    Text(String),
    Opened {
        index: usize,
        name: String,
        attrs: BTreeMap<String, String>,
    },
    /// Best-effort arguments of a directive that is still arriving
    Progress { index: usize, preview: Value },
    Closed(Directive),
    Malformed(DirectiveError),
}

#[derive(Debug)]
enum ParserState {
    Outside,
    Inside {
        index: usize,
        name: String,
        attrs: BTreeMap<String, String>,
        body: String,
    },
}

#[derive(Debug)]
pub struct DirectiveParser {
    buf: String,
    state: ParserState,
    next_index: usize,
}

impl Default for DirectiveParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectiveParser {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            state: ParserState::Outside,
            next_index: 0,
        }
    }

    /// Parse a complete text in one go
    pub fn parse_all(text: &str) -> Vec<ParseEvent> {
        let mut parser = Self::new();
        let mut events = parser.feed(text);
        events.extend(parser.finish());
        events
    }

    pub fn feed(&mut self, fragment: &str) -> Vec<ParseEvent> {
        self.buf.push_str(fragment);
        let mut events = Vec::new();

        loop {
            let progressed = match std::mem::replace(&mut self.state, ParserState::Outside) {
                ParserState::Outside => self.scan_outside(&mut events),
                ParserState::Inside {
                    index,
                    name,
                    attrs,
                    body,
                } => self.scan_inside(index, name, attrs, body, &mut events),
            };
            if !progressed {
                break;
            }
        }
        events
    }

    /// Flush held-back text and report a directive left open
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let rest = std::mem::take(&mut self.buf);
        match std::mem::replace(&mut self.state, ParserState::Outside) {
            ParserState::Outside if rest.is_empty() => Vec::new(),
            ParserState::Outside if rest.starts_with(OPEN_PREFIX) => {
                tracing::warn!(tag = %rest, "Directive stream ended inside a tag header");
                vec![ParseEvent::Malformed(DirectiveError::MalformedTag(rest))]
            }
            ParserState::Outside => vec![ParseEvent::Text(rest)],
            ParserState::Inside { name, .. } => {
                tracing::warn!(directive = %name, "Directive stream ended inside a tag");
                vec![ParseEvent::Malformed(DirectiveError::Unterminated(name))]
            }
        }
    }

    fn scan_outside(&mut self, events: &mut Vec<ParseEvent>) -> bool {
        let Some(start) = self.buf.find(OPEN_PREFIX) else {
            let keep = held_back(&self.buf, OPEN_PREFIX);
            let emit: String = self.buf.drain(..self.buf.len() - keep).collect();
            if !emit.is_empty() {
                events.push(ParseEvent::Text(emit));
            }
            return false;
        };

        let Some(end) = tag_end(&self.buf[start..]).map(|e| start + e) else {
            // Header still arriving
            if start > 0 {
                events.push(ParseEvent::Text(self.buf.drain(..start).collect()));
            }
            return false;
        };

        if start > 0 {
            events.push(ParseEvent::Text(self.buf[..start].to_string()));
        }
        let header: String = self.buf[start..=end].to_string();
        self.buf.drain(..=end);

        match parse_header(&header) {
            Ok((name, attrs, self_closing)) => {
                let index = self.next_index;
                self.next_index += 1;
                events.push(ParseEvent::Opened {
                    index,
                    name: name.clone(),
                    attrs: attrs.clone(),
                });
                if self_closing {
                    events.push(ParseEvent::Closed(Directive {
                        index,
                        name,
                        attrs,
                        body: None,
                    }));
                } else {
                    self.state = ParserState::Inside {
                        index,
                        name,
                        attrs,
                        body: String::new(),
                    };
                }
            }
            Err(e) => {
                tracing::warn!(tag = %header, "Skipping malformed directive tag");
                events.push(ParseEvent::Malformed(e));
            }
        }
        true
    }

    fn scan_inside(
        &mut self,
        index: usize,
        name: String,
        attrs: BTreeMap<String, String>,
        mut body: String,
        events: &mut Vec<ParseEvent>,
    ) -> bool {
        let closing = format!("</forge-{name}>");

        if let Some(at) = self.buf.find(&closing) {
            body.push_str(&self.buf[..at]);
            self.buf.drain(..at + closing.len());
            events.push(ParseEvent::Closed(Directive {
                index,
                name,
                attrs,
                body: Some(body),
            }));
            return true;
        }

        let keep = held_back(&self.buf, &closing);
        let arrived: String = self.buf.drain(..self.buf.len() - keep).collect();
        if !arrived.is_empty() {
            body.push_str(&arrived);
            events.push(ParseEvent::Progress {
                index,
                preview: preview_arguments(&name, &attrs, &body),
            });
        }
        self.state = ParserState::Inside {
            index,
            name,
            attrs,
            body,
        };
        false
    }
}

fn preview_arguments(name: &str, attrs: &BTreeMap<String, String>, body: &str) -> Value {
    if name == "tool" {
        parse_partial(body).unwrap_or_else(|| json!({}))
    } else {
        tag_arguments(name, attrs, Some(body))
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of `pattern`
fn held_back(buf: &str, pattern: &str) -> usize {
    let max = buf.len().min(pattern.len().saturating_sub(1));
    (1..=max)
        .rev()
        .find(|&n| buf.is_char_boundary(buf.len() - n) && buf.ends_with(&pattern[..n]))
        .unwrap_or(0)
}

/// Byte offset of the `>` ending the tag that starts `s`, skipping quoted values
fn tag_end(s: &str) -> Option<usize> {
    let mut in_quote = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '>' if !in_quote => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_header(header: &str) -> Result<(String, BTreeMap<String, String>, bool), DirectiveError> {
    let (Some(header_re), Some(attr_re)) = (HEADER_RE.as_ref(), ATTR_RE.as_ref()) else {
        return Err(DirectiveError::MalformedTag(header.to_string()));
    };
    let caps = header_re
        .captures(header)
        .ok_or_else(|| DirectiveError::MalformedTag(header.to_string()))?;

    let name = caps[1].to_string();
    let raw_attrs = caps.get(2).map_or("", |m| m.as_str()).trim_end();
    let (raw_attrs, self_closing) = match raw_attrs.strip_suffix('/') {
        Some(rest) => (rest, true),
        None => (raw_attrs, false),
    };

    let attrs = attr_re
        .captures_iter(raw_attrs)
        .map(|c| (c[1].to_string(), decode_entities(&c[2])))
        .collect();
    Ok((name, attrs, self_closing))
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(events: &[ParseEvent]) -> Vec<&Directive> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Closed(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_complete_text() {
        let events = DirectiveParser::parse_all(
            "Sure.\n<forge-write path=\"src/a.tsx\">export const a = 1;</forge-write>\n\
             <forge-add-dependency packages=\"dayjs zod\"/>\n<forge-summary>Added a</forge-summary>",
        );
        let directives = closed(&events);
        assert_eq!(directives.len(), 3);
        assert_eq!(directives[0].attrs["path"], "src/a.tsx");
        assert_eq!(directives[0].body.as_deref(), Some("export const a = 1;"));
        assert_eq!(directives[1].body, None);
        assert_eq!(directives[2].tool_name().unwrap(), "set_summary");
        assert_eq!(events[0], ParseEvent::Text("Sure.\n".to_string()));
    }

    #[test]
    fn test_split_at_every_byte_matches_whole() {
        let text = "a <forge-write path=\"x.ts\">let s = \"<b>\";</forge-write> b <forge-delete path=\"y\"/>";
        let whole: Vec<Directive> = closed(&DirectiveParser::parse_all(text))
            .into_iter()
            .cloned()
            .collect();

        let mut parser = DirectiveParser::new();
        let mut events = Vec::new();
        for c in text.chars() {
            events.extend(parser.feed(&c.to_string()));
        }
        events.extend(parser.finish());
        let streamed: Vec<Directive> = closed(&events).into_iter().cloned().collect();

        assert_eq!(whole, streamed);
        let text_out: String = events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text_out, "a  b ");
    }

    #[test]
    fn test_progress_preview_for_tool_arguments() {
        let mut parser = DirectiveParser::new();
        parser.feed("<forge-tool name=\"write_file\">{\"path\": \"a.ts\", \"content\": \"hel");
        let events = parser.feed("lo");
        let Some(ParseEvent::Progress { preview, .. }) = events.last() else {
            panic!("expected progress, got {events:?}");
        };
        assert_eq!(preview["path"], "a.ts");
        assert_eq!(preview["content"], "hello");
    }

    #[test]
    fn test_strict_arguments_on_close() {
        let events = DirectiveParser::parse_all(
            "<forge-tool name=\"read_file\">{'path': 'a.ts'}</forge-tool>",
        );
        let directive = closed(&events)[0];
        assert!(matches!(
            directive.arguments(),
            Err(DirectiveError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn test_unterminated_and_malformed() {
        let events = DirectiveParser::parse_all("<forge-Bad!>x <forge-write path=\"a\">never closed");
        assert!(matches!(
            events.first(),
            Some(ParseEvent::Malformed(DirectiveError::MalformedTag(_)))
        ));
        assert!(matches!(
            events.last(),
            Some(ParseEvent::Malformed(DirectiveError::Unterminated(name))) if name == "write"
        ));
    }

    #[test]
    fn test_unknown_directive_name() {
        let events = DirectiveParser::parse_all("<forge-launch target=\"moon\"/>");
        assert_eq!(
            closed(&events)[0].tool_name(),
            Err(DirectiveError::UnknownDirective("launch".to_string()))
        );
    }

    #[test]
    fn test_held_back_suffix() {
        assert_eq!(held_back("text <for", OPEN_PREFIX), 4);
        assert_eq!(held_back("text", OPEN_PREFIX), 0);
        assert_eq!(held_back("é<", OPEN_PREFIX), 1);
    }
}
