//! Frame classification.
//!
//! The router turns a decoded [`Frame`] into zero or more [`TypedEvent`]s. It
//! understands three payload shapes at once: the V3 named-event protocol
//! (`status`/`evidence`/`token`/`done`/`error`), the legacy OpenAI-compatible
//! `choices[0].delta` form, and bare text tokens from backends that stream
//! without a JSON envelope. V3 is the canonical contract; the other two are
//! isolated fallback arms, not interleaved heuristics. The control-token
//! filter only touches the legacy arms: named V3 `token` events never leak
//! routing artifacts, so their content passes through unfiltered.
//!
//! The router is total: a malformed frame becomes [`TypedEvent::Unknown`] and
//! is dropped downstream, never an error.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::events::{AgentInfo, DoneInfo, ErrorInfo, EvidenceRef, RouteInfo, TypedEvent};
use crate::observability;
use crate::sse::{Frame, DONE_SENTINEL};

/// Routing artifacts the legacy backend leaks into the first content chunks.
static CONTROL_TOKENS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["skip", "use", "llm_fast", "llm_thinking"].into());

/// Control tokens are only filtered within this many content chunks from the
/// start of a turn; later on, identical short tokens are legitimate content.
const CONTROL_TOKEN_WINDOW: u32 = 10;

/// Stateful per-turn classifier from frames to typed events.
///
/// One router instance serves exactly one turn: the control-token window is
/// counted from the first content chunk of the stream.
#[derive(Debug, Default)]
pub struct EventRouter {
    content_chunks_seen: u32,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-turn state, as when the router is reused for a new stream.
    pub fn reset(&mut self) {
        self.content_chunks_seen = 0;
    }

    /// Classify a frame into its typed events.
    ///
    /// A single frame may yield several events (an OpenAI delta can carry
    /// content, reasoning, and status fields at once), exactly one event, or
    /// none (filtered control token, keep-alive).
    pub fn classify(&mut self, frame: &Frame) -> Vec<TypedEvent> {
        let Some(data) = frame.data.as_deref() else {
            // Data-less frames surviving the decoder are bare control markers.
            return match frame.event.as_deref() {
                Some("done") => vec![TypedEvent::Done(DoneInfo::default())],
                Some("ping") => Vec::new(),
                _ => vec![TypedEvent::Unknown],
            };
        };

        // The transport sentinel is never JSON.
        if data == DONE_SENTINEL {
            return vec![TypedEvent::Done(DoneInfo::default())];
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(_) => {
                // Lenient fallback: plain-text token streams.
                return match frame.event.as_deref() {
                    None | Some("token") | Some("message") => {
                        self.content_event(data).into_iter().collect()
                    }
                    Some(event) => {
                        tracing::debug!(event = %event, "dropping unparseable frame");
                        vec![TypedEvent::Unknown]
                    }
                };
            }
        };

        let mut events = match frame.event.as_deref() {
            Some("route") => vec![TypedEvent::Route(parse_or_default::<RouteInfo>(&payload))],
            Some("agent") => vec![TypedEvent::Agent(parse_or_default::<AgentInfo>(&payload))],
            // Folded into observability, never a UI event of its own.
            Some("context_debug") => {
                return vec![TypedEvent::Observability(observability::from_context_debug(
                    &payload,
                ))];
            }
            Some("thinking_trace") => vec![TypedEvent::ThinkingTrace(payload.clone())],
            Some("status") => vec![TypedEvent::Status(status_text(&payload, data))],
            Some("evidence") => vec![TypedEvent::Evidence(parse_evidence(&payload))],
            Some("done") => vec![TypedEvent::Done(parse_done(&payload))],
            Some("error") => vec![TypedEvent::Error(parse_error(&payload))],
            // V3 tokens are real model output and bypass the control-token
            // filter reserved for the legacy arms.
            Some("token") | Some("message") => {
                match payload.get("content").and_then(Value::as_str) {
                    Some(text) if !text.is_empty() => {
                        vec![TypedEvent::ContentDelta(text.to_string())]
                    }
                    _ => Vec::new(),
                }
            }
            None => self.classify_unnamed(&payload),
            Some(event) => {
                tracing::trace!(event = %event, "unknown event name");
                vec![TypedEvent::Unknown]
            }
        };

        // Side channel: every JSON frame is also probed for embedded
        // observability fields, whatever its primary classification.
        if let Some(snapshot) = observability::extract(&payload) {
            events.push(TypedEvent::Observability(snapshot));
        }

        events
    }

    /// Frames without an event name: OpenAI-compatible deltas, or a V3 token
    /// whose `event:` line the backend omitted.
    fn classify_unnamed(&mut self, payload: &Value) -> Vec<TypedEvent> {
        let mut events = Vec::new();

        if let Some(delta) = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("delta"))
        {
            if let Some(content) = delta.get("content").and_then(Value::as_str) {
                events.extend(self.content_event(content));
            }
            let reasoning = delta
                .get("reasoning")
                .or_else(|| delta.get("reasoning_content"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if !reasoning.is_empty() {
                events.push(TypedEvent::ReasoningDelta(reasoning.to_string()));
            }
            if let Some(route) = delta.get("route").and_then(Value::as_str) {
                events.push(TypedEvent::RouteStatus(route.to_string()));
            }
            if let Some(execute) = delta.get("execute").and_then(Value::as_str) {
                events.push(TypedEvent::ExecuteStatus(execute.to_string()));
            }
            return events;
        }

        if let Some(content) = payload.get("content").and_then(Value::as_str) {
            return self.content_event(content).into_iter().collect();
        }

        vec![TypedEvent::Unknown]
    }

    /// Count a legacy content chunk and apply the early control-token filter.
    fn content_event(&mut self, text: &str) -> Option<TypedEvent> {
        if text.is_empty() {
            return None;
        }
        self.content_chunks_seen += 1;
        if self.content_chunks_seen <= CONTROL_TOKEN_WINDOW
            && CONTROL_TOKENS.contains(text.trim())
        {
            tracing::trace!(token = %text.trim(), chunk = self.content_chunks_seen, "filtered control token");
            return None;
        }
        Some(TypedEvent::ContentDelta(text.to_string()))
    }
}

fn parse_or_default<T: serde::de::DeserializeOwned + Default>(payload: &Value) -> T {
    serde_json::from_value(payload.clone()).unwrap_or_default()
}

fn status_text(payload: &Value, raw: &str) -> String {
    payload
        .get("status")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(raw)
        .to_string()
}

fn parse_done(payload: &Value) -> DoneInfo {
    // Accept the evidence aliases older backends emit.
    let evidence = payload
        .get("response_evidence")
        .or_else(|| payload.get("evidence"))
        .or_else(|| payload.get("citations"))
        .and_then(|value| serde_json::from_value::<Vec<EvidenceRef>>(value.clone()).ok());

    DoneInfo {
        response_evidence: evidence,
        trace_id: payload
            .get("trace_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        quality_decision: payload
            .get("quality_decision")
            .and_then(Value::as_str)
            .map(str::to_string),
        risk_level: payload
            .get("risk_level")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn parse_error(payload: &Value) -> ErrorInfo {
    serde_json::from_value(payload.clone()).unwrap_or_else(|_| ErrorInfo {
        code: None,
        message: "stream error".to_string(),
        recoverable: true,
    })
}

fn parse_evidence(payload: &Value) -> Vec<EvidenceRef> {
    let list = if payload.is_array() {
        payload
    } else {
        payload.get("evidence").unwrap_or(payload)
    };
    serde_json::from_value(list.clone()).unwrap_or_default()
}
