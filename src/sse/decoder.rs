//! Incremental SSE frame decoder.
//!
//! The decoder owns a single string buffer and is the only component that ever
//! sees raw transport chunks. Chunks may split a frame (or even the blank-line
//! delimiter itself) at any byte boundary; the decoder buffers until a complete
//! frame is available and never re-orders or duplicates frames, since it only
//! consumes from the head of the buffer.

use super::frame::{parse_sse_line, Frame, SseLine};

/// Event names that are meaningful without a data payload.
const DATALESS_EVENTS: &[&str] = &["done", "ping"];

/// Stateful decoder turning raw text chunks into complete [`Frame`]s.
///
/// `feed` appends a chunk to the internal buffer, extracts every complete
/// frame (terminated by a blank line), and retains any trailing partial
/// segment for the next call. It performs no content validation and cannot
/// fail.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Holds at most one trailing partial frame: everything after the last
    /// frame delimiter observed so far.
    buffer: String,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return all frames completed by it.
    ///
    /// An empty chunk is a no-op and never produces a frame or corrupts the
    /// retained partial buffer.
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        // A frame ends at a blank line. Scanning line-by-line (instead of
        // searching for a literal "\n\n") keeps \r\n-delimited input and
        // mixed delimiters correct.
        while let Some((frame_len, consumed)) = self.next_frame_boundary() {
            let frame_text: String = self.buffer[..frame_len].to_string();
            self.buffer.drain(..consumed);
            if let Some(frame) = parse_frame_text(&frame_text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing unterminated frame at end-of-stream.
    ///
    /// Some backends close the connection without a final blank line; the
    /// remaining buffer is then parsed as one last frame.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_frame_text(&rest)
    }

    /// Content currently held back as a partial frame (for diagnostics).
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Locate the next complete frame in the buffer.
    ///
    /// Returns `(frame_len, consumed)`: the byte length of the frame text and
    /// the length including its terminating blank line.
    fn next_frame_boundary(&self) -> Option<(usize, usize)> {
        let mut pos = 0;
        let bytes = self.buffer.as_bytes();
        while let Some(nl) = self.buffer[pos..].find('\n') {
            let line_start = pos;
            let line_end = pos + nl;
            let line = &self.buffer[line_start..line_end];
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() && line_start > 0 {
                return Some((line_start, line_end + 1));
            }
            if line.is_empty() {
                // Leading blank line: an empty frame, consume it outright.
                return Some((0, line_end + 1));
            }
            pos = line_end + 1;
            if pos >= bytes.len() {
                break;
            }
        }
        None
    }
}

/// Parse one frame's text into a [`Frame`].
///
/// Returns `None` for comment-only frames and for data-less frames whose
/// event name is not a recognized control marker.
fn parse_frame_text(text: &str) -> Option<Frame> {
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();

    for line in text.split('\n') {
        match parse_sse_line(line) {
            SseLine::Event(name) => event = Some(name),
            SseLine::Data(data) => data_lines.push(data),
            SseLine::Empty | SseLine::Comment(_) => {}
        }
    }

    let data = if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    };

    match (&event, &data) {
        (None, None) => None,
        (Some(name), None) if !DATALESS_EVENTS.contains(&name.as_str()) => {
            tracing::debug!(event = %name, "dropping data-less frame");
            None
        }
        _ => Some(Frame { event, data }),
    }
}
