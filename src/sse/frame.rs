//! SSE frame and line types.
//!
//! A frame is a fully-decoded SSE record: an optional event name and an
//! optional data payload (multiple `data:` lines joined with `\n`, as the SSE
//! spec permits). Frames are immutable once produced and consumed exactly once
//! by the event router.

/// A fully-decoded SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Event name from the `event:` line, if any.
    pub event: Option<String>,
    /// Data payload, `data:` lines joined with `\n`.
    pub data: Option<String>,
}

impl Frame {
    /// Frame with only an event name (control markers like `done`).
    pub fn event_only(event: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: None,
        }
    }

    /// Frame with only a data payload (the common legacy-protocol shape).
    pub fn data_only(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: Some(data.into()),
        }
    }

    /// Frame with both an event name and a data payload.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: Some(data.into()),
        }
    }
}

/// A single parsed SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Event type declaration (e.g., `event: token`)
    Event(String),
    /// Data payload (e.g., `data: {"content": "hi"}`)
    Data(String),
    /// Empty line - signals end of frame
    Empty,
    /// Comment line (starts with `:`), also used for keep-alives
    Comment(String),
}

/// Parse a single SSE line into its component type.
///
/// The line must already be stripped of its trailing newline. A trailing `\r`
/// (from `\r\n`-delimited input) is tolerated.
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(stripped) = line.strip_prefix(':') {
        return SseLine::Comment(stripped.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }

    // Unknown field - treat as comment so it is ignored upstream
    SseLine::Comment(line.to_string())
}
