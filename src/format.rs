//! Rendering of turns into Markdown log entries.
//!
//! A turn becomes up to two blocks: a `User` block with the prompt and an
//! `Assistant` block with the visible answer text. Each block ends with a
//! `---` rule. Only untagged fragments and `markdownContent` fragments are
//! shown; reasoning and tool/edit fragments are left out.
//!
//! Output depends only on the turn and the formatter's settings, never on
//! the current time, so re-rendering a turn is byte-for-byte stable.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};

use crate::session::{FragmentKind, Turn};

/// Default wall-clock rendering for turn timestamps.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// Formatted text for one turn, ready to append.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntry(String);

impl LogEntry {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the turn had nothing worth logging.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Time zone used when rendering turn timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeZoneMode {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFormatter {
    timestamp_format: String,
    zone: TimeZoneMode,
}

impl Default for TurnFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_FORMAT, TimeZoneMode::Local)
    }
}

impl TurnFormatter {
    /// `timestamp_format` must pass [`is_valid_timestamp_format`]; config
    /// loading guarantees this.
    pub fn new(timestamp_format: impl Into<String>, zone: TimeZoneMode) -> Self {
        Self {
            timestamp_format: timestamp_format.into(),
            zone,
        }
    }

    /// Render one turn. Returns an empty entry if there is neither a user
    /// message nor any visible assistant text.
    pub fn format_turn(&self, turn: &Turn) -> LogEntry {
        let time = turn.timestamp_ms.and_then(|ms| self.render_time(ms));
        let mut out = String::new();

        if let Some(message) = turn.message.as_deref() {
            if !message.trim().is_empty() {
                push_header(&mut out, "👤 User", time.as_deref());
                out.push_str("\n\n");
                out.push_str(message);
                out.push_str("\n\n---\n");
            }
        }

        let answer = assistant_text(turn);
        if !answer.trim().is_empty() {
            push_header(&mut out, "🤖 Assistant", time.as_deref());
            if let Some(meta) = metadata_line(turn) {
                out.push_str("\n> ");
                out.push_str(&meta);
            }
            out.push_str("\n\n");
            out.push_str(&answer);
            out.push_str("\n\n---\n");
        }

        LogEntry(out)
    }

    fn render_time(&self, ms: i64) -> Option<String> {
        let utc = DateTime::<Utc>::from_timestamp_millis(ms)?;
        let rendered = match self.zone {
            TimeZoneMode::Utc => utc.format(&self.timestamp_format).to_string(),
            TimeZoneMode::Local => utc
                .with_timezone(&Local)
                .format(&self.timestamp_format)
                .to_string(),
        };
        Some(rendered)
    }
}

fn push_header(out: &mut String, role: &str, time: Option<&str>) {
    out.push_str("\n## ");
    out.push_str(role);
    if let Some(time) = time {
        out.push_str(" [");
        out.push_str(time);
        out.push(']');
    }
}

/// Visible assistant text: untagged fragments with non-blank text and
/// non-empty `markdownContent` fragments, in order, separated by a blank
/// line.
pub fn assistant_text(turn: &Turn) -> String {
    let parts: Vec<&str> = turn
        .fragments
        .iter()
        .filter(|f| match &f.kind {
            FragmentKind::PlainText => !f.text.trim().is_empty(),
            FragmentKind::MarkdownContent => !f.text.is_empty(),
            FragmentKind::Other(_) => false,
        })
        .map(|f| f.text.as_str())
        .collect();
    parts.join("\n\n")
}

fn metadata_line(turn: &Turn) -> Option<String> {
    let mut meta = Vec::new();
    if let Some(model) = turn.model_id.as_deref() {
        meta.push(format!("Model: {}", model));
    }
    if let Some(agent) = turn.agent.as_deref() {
        meta.push(format!("Agent: {}", agent));
    }
    if meta.is_empty() {
        None
    } else {
        Some(meta.join(" | "))
    }
}

/// Returns `false` if `fmt` contains a specifier chrono cannot render.
pub fn is_valid_timestamp_format(fmt: &str) -> bool {
    !StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
