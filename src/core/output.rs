//! Terminal output for CLI surfaces.
//!
//! Progress and diagnostics go to stderr; command results go to stdout, either
//! as text or as a JSON envelope.

use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use ulid::Ulid;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// `--format json` result line. Payload fields sit beside the header; a
/// non-object payload lands under `result`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub envelope_version: &'static str,
    pub tool_version: &'static str,
    pub event_id: String,
    /// Seconds since the epoch with a `Z` suffix, taken from `event_id`.
    pub ts: String,
    pub cmd: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, JsonValue>,
}

impl Envelope {
    pub fn new(cmd: &str, status: &'static str, payload: JsonValue) -> Self {
        let event = Ulid::new();
        let payload = match payload {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => Map::from_iter([("result".to_string(), other)]),
        };
        Envelope {
            envelope_version: ENVELOPE_VERSION,
            tool_version: env!("CARGO_PKG_VERSION"),
            event_id: event.to_string(),
            ts: format!("{}Z", event.timestamp_ms() / 1000),
            cmd: cmd.to_string(),
            status,
            stage: None,
            payload,
        }
    }

    pub fn failed(cmd: &str, stage: &str, message: &str) -> Self {
        let mut envelope = Envelope::new(cmd, "error", serde_json::json!({ "error": message }));
        envelope.stage = Some(stage.to_string());
        envelope
    }

    pub fn to_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Reporter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Reporter { format, quiet }
    }

    fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }

    pub fn step(&self, msg: &str) {
        if self.chatty() {
            eprintln!("{} {}", "▸".bright_cyan(), msg);
        }
    }

    pub fn ok(&self, msg: &str) {
        if self.chatty() {
            eprintln!("{} {}", "✓".bright_green(), msg);
        }
    }

    /// Warnings are shown even in quiet mode.
    pub fn warn(&self, msg: &str) {
        if self.format == OutputFormat::Text {
            eprintln!("{} {}", "⚠".bright_yellow(), msg);
        }
    }

    pub fn fail(&self, msg: &str) {
        if self.format == OutputFormat::Text {
            eprintln!("{} {}", "✗".bright_red(), msg);
        }
    }

    /// Final command result: text summary or JSON envelope on stdout.
    pub fn finish(&self, cmd: &str, summary: &str, payload: JsonValue) {
        match self.format {
            OutputFormat::Text => println!("{}", summary),
            OutputFormat::Json => println!("{}", Envelope::new(cmd, "ok", payload).to_pretty()),
        }
    }
}

/// Error line for a failed command. Always printed, on stderr.
pub fn report_error(format: OutputFormat, cmd: &str, stage: &str, message: &str) {
    match format {
        OutputFormat::Text => eprintln!("{} {}", "✗".bright_red(), message),
        OutputFormat::Json => eprintln!("{}", Envelope::failed(cmd, stage, message).to_pretty()),
    }
}
