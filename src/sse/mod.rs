//! SSE wire-format handling.
//!
//! This module is purely structural: it splits a chunked text stream into
//! discrete SSE frames. Semantic interpretation of a frame lives in
//! [`crate::router`].

mod decoder;
mod frame;

pub use decoder::FrameDecoder;
pub use frame::{parse_sse_line, Frame, SseLine};

/// Sentinel data payload signaling logical end-of-stream at the transport
/// level. Must be checked before any JSON decode of frame data.
pub const DONE_SENTINEL: &str = "[DONE]";
