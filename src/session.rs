//! Chat session documents and the parser that recognises them.
//!
//! The editor's chat panel persists each conversation as a single JSON
//! document with a `requests` array. Every request is one user/assistant
//! exchange (a [`Turn`]); its `response` array holds loosely-typed
//! fragments whose `kind` decides how the payload should be read.
//!
//! Parsing is deliberately forgiving: anything that is not JSON, or is
//! JSON without a `requests` array, is reported as "not a session" via
//! `None` rather than an error, because the watched tree contains plenty
//! of unrelated `.json` files.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// UTF-8 byte-order mark some editors prepend to JSON files.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

// ---------------------------------------------------------------------------
// Fragment kind
// ---------------------------------------------------------------------------

/// How a response fragment's payload should be interpreted.
///
/// Decoded once at parse time from the raw `kind` tag so that consumers
/// can match exhaustively instead of comparing strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentKind {
    /// No `kind` tag (or an explicit `null`): the main streamed answer text.
    PlainText,
    /// `kind: "markdownContent"`.
    MarkdownContent,
    /// Any other tag, e.g. `"thinking"` or `"textEditGroup"`.
    Other(String),
}

impl FragmentKind {
    fn from_tag(tag: Option<&Value>) -> Self {
        match tag {
            None | Some(Value::Null) => FragmentKind::PlainText,
            Some(Value::String(s)) if s == "markdownContent" => FragmentKind::MarkdownContent,
            Some(Value::String(s)) => FragmentKind::Other(s.clone()),
            Some(other) => FragmentKind::Other(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// One piece of an assistant response, reduced to its text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub text: String,
}

/// One request/response exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Turn {
    /// The user's prompt, if the request carried one.
    pub message: Option<String>,
    /// Response fragments in their original order.
    pub fragments: Vec<Fragment>,
    /// Epoch milliseconds of the request.
    pub timestamp_ms: Option<i64>,
    /// Model identifier (`modelId`, or `model` in older files).
    pub model_id: Option<String>,
    /// Agent/participant name.
    pub agent: Option<String>,
}

/// A decoded chat session file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDocument {
    pub session_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Workspace folder the session belongs to, when the file records it.
    pub workspace_folder: Option<String>,
    pub turns: Vec<Turn>,
}

impl SessionDocument {
    /// Name used for the destination log file.
    ///
    /// The basename of the workspace folder when known, otherwise
    /// `default_name`.
    pub fn display_name(&self, default_name: &str) -> String {
        self.workspace_folder
            .as_deref()
            .map(|folder| folder.trim_end_matches(['/', '\\']))
            .and_then(|folder| {
                folder
                    .rsplit(['/', '\\'])
                    .next()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| default_name.to_string())
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Read and parse a candidate session file.
///
/// I/O errors are returned to the caller (they are usually transient: the
/// editor is mid-write). A readable file that is not a session yields
/// `Ok(None)`.
pub fn read_session_file(path: &Path) -> std::io::Result<Option<SessionDocument>> {
    let raw = std::fs::read(path)?;
    Ok(parse_session(&raw))
}

/// Parse raw bytes into a [`SessionDocument`].
///
/// Returns `None` for malformed JSON or for documents without a
/// `requests` array. Every element of `requests` becomes a [`Turn`], even
/// an empty one, so that turn indices stay aligned with the file.
pub fn parse_session(raw: &[u8]) -> Option<SessionDocument> {
    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    let root: Value = serde_json::from_slice(raw).ok()?;
    let obj = root.as_object()?;
    let requests = obj.get("requests")?.as_array()?;

    Some(SessionDocument {
        session_id: string_field(obj, "sessionId"),
        created_at: obj.get("creationDate").and_then(parse_creation_date),
        workspace_folder: string_field(obj, "workspaceFolder"),
        turns: requests.iter().map(parse_turn).collect(),
    })
}

fn parse_turn(request: &Value) -> Turn {
    let Some(obj) = request.as_object() else {
        return Turn::default();
    };

    let message = match obj.get("message") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(m)) => string_field(m, "text"),
        _ => None,
    };

    let fragments = obj
        .get("response")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_fragment).collect())
        .unwrap_or_default();

    let timestamp_ms = obj.get("timestamp").and_then(|t| {
        t.as_i64()
            .or_else(|| t.as_f64().map(|f| f as i64))
    });

    let model_id = string_field(obj, "modelId").or_else(|| string_field(obj, "model"));

    let agent = match obj.get("agent") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(a)) => string_field(a, "name"),
        _ => None,
    };

    Turn {
        message,
        fragments,
        timestamp_ms,
        model_id,
        agent,
    }
}

/// Normalise one response item to a `(kind, text)` pair.
///
/// Returns `None` when the payload cannot be reduced to text.
fn parse_fragment(item: &Value) -> Option<Fragment> {
    let obj = item.as_object()?;
    let kind = FragmentKind::from_tag(obj.get("kind"));
    let text = fragment_text(obj)?;
    Some(Fragment { kind, text })
}

/// Extract the text payload of a fragment.
///
/// Accepted shapes, in order:
/// - `value: "text"`
/// - `value: { content: [{ value: "..." }, ...] }` (parts concatenated)
/// - `value: { value: "..." }`
/// - `content: { value: "..." }`
fn fragment_text(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("value") {
        Some(Value::String(s)) => return Some(s.clone()),
        Some(Value::Object(v)) => {
            if let Some(parts) = v.get("content").and_then(Value::as_array) {
                let joined: String = parts
                    .iter()
                    .filter_map(|p| p.get("value").and_then(Value::as_str))
                    .collect();
                return Some(joined);
            }
            if let Some(s) = v.get("value").and_then(Value::as_str) {
                return Some(s.to_string());
            }
        }
        _ => {}
    }

    obj.get("content")
        .and_then(|c| c.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn parse_creation_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
