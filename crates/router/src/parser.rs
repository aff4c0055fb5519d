//! Decision parsing: turns loosely structured model text into a [`Decision`].
//!
//! Models wrap JSON in prose, emit several objects in one reply, and produce
//! JSON with Python literals, single quotes, trailing commas or unbalanced
//! braces. Parsing never fails: the worst case is a conversational decision
//! whose message is the raw text.

use helmsman_core::{Decision, NO_TOOL, ToolInvocation};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Every top-level balanced `{...}` substring, in order.
///
/// Quote state is tracked inside objects so braces within string values do
/// not count. Text between objects is skipped.
pub fn extract_objects(raw: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' if depth > 0 => quote = Some(c),
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    found.push(&raw[start..=i]);
                }
            }
            _ => {}
        }
    }

    found
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '$')
}

fn is_number(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    digits.starts_with(|c: char| c.is_ascii_digit()) && word.parse::<f64>().is_ok()
}

fn literal(word: &str) -> Option<&'static str> {
    match word {
        "true" | "True" | "TRUE" => Some("true"),
        "false" | "False" | "FALSE" => Some("false"),
        "null" | "None" | "nil" | "NULL" | "undefined" => Some("null"),
        _ => None,
    }
}

/// A quote closes its string only when followed by structure or the end.
fn closes_string(chars: &[char], after: usize) -> bool {
    chars[after..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_none_or(|c| matches!(c, ',' | '}' | ']' | ':'))
}

fn push_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn strip_trailing_comma(out: &mut String) {
    let len = out.trim_end().len();
    if out[..len].ends_with(',') {
        out.truncate(len - 1);
    }
}

/// Best-effort rewrite of almost-JSON into JSON.
///
/// Handles single quotes, unescaped inner quotes and raw newlines in strings,
/// unquoted keys, Python/Lua literals, bare-word values, trailing commas,
/// unterminated strings and missing or stray closing brackets.
pub fn repair(candidate: &str) -> String {
    let chars: Vec<char> = candidate.chars().collect();
    let mut out = String::with_capacity(candidate.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut expecting_key = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            match c {
                '\\' => {
                    match chars.get(i + 1) {
                        Some('\'') => out.push('\''),
                        Some(&next) => {
                            out.push('\\');
                            out.push(next);
                        }
                        None => out.push_str("\\\\"),
                    }
                    i += 2;
                    continue;
                }
                _ if c == q && closes_string(&chars, i + 1) => {
                    out.push('"');
                    quote = None;
                }
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                expecting_key = false;
                out.push('"');
            }
            '{' | '[' => {
                stack.push(c);
                expecting_key = c == '{';
                out.push(c);
            }
            '}' | ']' => {
                strip_trailing_comma(&mut out);
                let opener = if c == '}' { '{' } else { '[' };
                // Closers with no matching opener are dropped
                if stack.contains(&opener) {
                    while let Some(top) = stack.pop() {
                        out.push(if top == '{' { '}' } else { ']' });
                        if top == opener {
                            break;
                        }
                    }
                }
                expecting_key = false;
            }
            ',' => {
                expecting_key = stack.last() == Some(&'{');
                out.push(c);
            }
            ':' => {
                expecting_key = false;
                out.push(c);
            }
            _ if is_word_char(c) => {
                let mut end = i;
                while end < chars.len() && is_word_char(chars[end]) {
                    end += 1;
                }
                let word: String = chars[i..end].iter().collect();

                if expecting_key {
                    push_quoted(&mut out, &word);
                    expecting_key = false;
                } else if let Some(lit) = literal(&word) {
                    out.push_str(lit);
                } else if is_number(&word) {
                    out.push_str(&word);
                } else {
                    // Bare value: runs to the next separator
                    while end < chars.len() && !matches!(chars[end], ',' | '}' | ']' | '\n') {
                        end += 1;
                    }
                    let text: String = chars[i..end].iter().collect();
                    push_quoted(&mut out, text.trim_end());
                }
                i = end;
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    if quote.is_some() {
        out.push('"');
    }
    strip_trailing_comma(&mut out);
    while let Some(top) = stack.pop() {
        out.push(if top == '{' { '}' } else { ']' });
    }

    out
}

/// Strict parse, then repaired parse. Only objects count.
pub fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str(candidate) {
        return Some(map);
    }
    let repaired = repair(candidate);
    trace!(repaired = %repaired, "Retrying with repaired candidate");
    match serde_json::from_str(&repaired) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Fields gathered across every object in a reply.
#[derive(Default)]
struct Collected {
    thoughts: Vec<String>,
    messages: Vec<String>,
    tools: Vec<ToolInvocation>,
    recognized: bool,
}

impl Collected {
    fn absorb(&mut self, object: &Map<String, Value>) {
        if let Some(thought) = object.get("thought").and_then(Value::as_str) {
            self.recognized = true;
            if !thought.trim().is_empty() {
                self.thoughts.push(thought.trim().to_string());
            }
        }
        if let Some(message) = object.get("message").and_then(Value::as_str) {
            self.recognized = true;
            if !message.trim().is_empty() {
                self.messages.push(message.trim().to_string());
            }
        }
        if object.contains_key("tool") {
            self.recognized = true;
        }
        if let Some(invocation) = invocation_from(object) {
            self.tools.push(invocation);
        }
        if let Some(Value::Array(nested)) = object.get("tools") {
            self.recognized = true;
            self.tools.extend(
                nested
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(invocation_from),
            );
        }
    }
}

fn invocation_from(object: &Map<String, Value>) -> Option<ToolInvocation> {
    let tool = object.get("tool")?.as_str()?.trim().to_lowercase();
    if tool.is_empty() || tool == NO_TOOL {
        return None;
    }

    let args = match object.get("args").or_else(|| object.get("parameters")) {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(text)) => parse_object(text)
            .map(Value::Object)
            .unwrap_or_else(|| Value::String(text.clone())),
        Some(other) => other.clone(),
    };

    Some(ToolInvocation { tool, args })
}

/// Parse raw model output into a decision. Never fails.
pub fn parse(raw: &str) -> Decision {
    let mut collected = Collected::default();
    for candidate in extract_objects(raw) {
        match parse_object(candidate) {
            Some(object) => collected.absorb(&object),
            None => debug!(len = candidate.len(), "Skipping malformed JSON candidate"),
        }
    }

    // Unterminated reply: everything from the first brace, repaired
    if !collected.recognized
        && let Some(start) = raw.find('{')
        && let Some(object) = parse_object(&raw[start..])
    {
        collected.absorb(&object);
    }

    if !collected.recognized {
        return Decision::message_only(raw);
    }

    let (tool, args) = match collected.tools.first() {
        Some(first) => (first.tool.clone(), first.args.clone()),
        None => (NO_TOOL.to_string(), Value::Object(Map::new())),
    };

    Decision {
        thought: collected.thoughts.join("\n"),
        tool,
        args,
        message: collected.messages.join("\n"),
        tools: collected.tools,
        raw: raw.to_string(),
        usage: None,
    }
}
