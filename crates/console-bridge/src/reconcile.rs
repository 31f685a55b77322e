//! Console text -> typed results.
//!
//! The console prints values in its own literal syntax: bare object keys,
//! `undefined`, and bound functions printed as `function bound()`. The
//! normalizer rewrites exactly those cases into strict JSON and nothing
//! more; anything else that is not JSON stays malformed.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::demux::AccumulatedOutput;
use crate::error::BridgeError;
use crate::intent::IntentName;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConsoleValue {
    Text(String),
    Structured(Value),
}

impl ConsoleValue {
    pub fn null() -> Self {
        ConsoleValue::Structured(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConsoleValue::Structured(Value::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConsoleValue::Text(text) => Some(text),
            ConsoleValue::Structured(Value::String(text)) => Some(text),
            ConsoleValue::Structured(_) => None,
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            ConsoleValue::Text(text) => Value::String(text),
            ConsoleValue::Structured(value) => value,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("console text is not parseable after normalization: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("expected an object carrying `{field}`, got {found}")]
    NotAnObject {
        field: &'static str,
        found: &'static str,
    },
    #[error("expected a transaction hash, got {found}")]
    NotATransactionHash { found: &'static str },
}

/// How an intent's console text is narrowed into its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Text as printed, trailing newline removed.
    Raw,
    /// The whole normalized value.
    Parsed,
    /// One field of the normalized object.
    Field(&'static str),
}

pub fn extraction_for(intent: IntentName) -> Extraction {
    match intent {
        IntentName::GetBalance | IntentName::GetBlockNumber | IntentName::GetPeerCount => {
            Extraction::Raw
        }
        IntentName::DeploySmartContract => Extraction::Field("transactionHash"),
        IntentName::GetContractAddress => Extraction::Field("contractAddress"),
        _ => Extraction::Parsed,
    }
}

pub fn reconcile(intent: IntentName, output: &AccumulatedOutput) -> Result<ConsoleValue, BridgeError> {
    if output.has_error() {
        return Err(BridgeError::Console(output.data().trim().to_string()));
    }
    Ok(reconcile_text(intent, output.data())?)
}

pub fn reconcile_text(intent: IntentName, data: &str) -> Result<ConsoleValue, ReconcileError> {
    match extraction_for(intent) {
        Extraction::Raw => Ok(ConsoleValue::Text(
            data.trim_end_matches(['\r', '\n']).to_string(),
        )),
        Extraction::Parsed => parse_console_value(data).map(ConsoleValue::Structured),
        Extraction::Field(field) => match parse_console_value(data)? {
            Value::Null => Ok(ConsoleValue::null()),
            Value::Object(mut map) => Ok(ConsoleValue::Structured(
                map.remove(field).unwrap_or(Value::Null),
            )),
            other => Err(ReconcileError::NotAnObject {
                field,
                found: json_kind(&other),
            }),
        },
    }
}

/// Parses console text; empty output counts as null.
pub fn parse_console_value(data: &str) -> Result<Value, ReconcileError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&normalize(trimmed))?)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Rewrites console literal syntax into strict JSON.
pub fn normalize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            let end = string_end(&chars, i);
            out.extend(&chars[i..end]);
            last_significant = Some('"');
            i = end;
            continue;
        }
        if is_ident_start(ch) {
            let start = i;
            while i < chars.len() && is_ident_continue(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let key_position = matches!(last_significant, None | Some('{') | Some(','));
            let followed_by_colon = next_significant(&chars, i).map(|j| chars[j]) == Some(':');
            if key_position && followed_by_colon {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            } else if word == "undefined" {
                out.push_str("null");
            } else if word == "function" {
                i = skip_function(&chars, i);
                out.push_str("null");
            } else {
                out.push_str(&word);
            }
            last_significant = Some('a');
            continue;
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        out.push(ch);
        i += 1;
    }
    out
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

fn next_significant(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len()).find(|&j| !chars[j].is_whitespace())
}

fn string_end(chars: &[char], open: usize) -> usize {
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            '"' => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

fn skip_balanced(chars: &[char], start: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut j = start;
    while j < chars.len() {
        if chars[j] == open {
            depth += 1;
        } else if chars[j] == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return j + 1;
            }
        }
        j += 1;
    }
    chars.len()
}

// `function name(args)` optionally followed by a `{ ... }` body.
fn skip_function(chars: &[char], from: usize) -> usize {
    let Some(paren) = (from..chars.len()).find(|&j| chars[j] == '(') else {
        return chars.len();
    };
    let after_params = skip_balanced(chars, paren, '(', ')');
    match next_significant(chars, after_params) {
        Some(j) if chars[j] == '{' => skip_balanced(chars, j, '{', '}'),
        _ => after_params,
    }
}
