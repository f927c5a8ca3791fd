//! Quick/deep response-mode inference.
//!
//! The backend never tells the client which pipeline served a turn; the UI
//! infers it from observable streaming behavior. All decisions here are pure
//! functions of elapsed time so they can be tested without timers; the session
//! controller owns the actual scheduling.

use std::time::Duration;

use crate::config::InferenceConfig;

/// Response mode inferred from first-token timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredMode {
    /// Fast path: first token arrived promptly.
    Quick,
    /// Deep/thinking path: the model spent time before producing output.
    Deep,
}

/// Timing facts observed for one turn so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingSnapshot {
    /// Latency from send to first visible token, once observed.
    pub first_token_latency: Option<Duration>,
    /// Whether the blank-wait advisory fired before any token arrived.
    pub blank_wait_fired: bool,
}

/// Infer quick vs deep from a timing snapshot.
pub fn infer_mode(snapshot: TimingSnapshot, config: &InferenceConfig) -> InferredMode {
    if snapshot.blank_wait_fired {
        return InferredMode::Deep;
    }
    match snapshot.first_token_latency {
        Some(latency) if latency > Duration::from_millis(config.first_token_deep_ms) => {
            InferredMode::Deep
        }
        Some(_) => InferredMode::Quick,
        // No token at all (EOF-completed turn): best-effort deep.
        None => InferredMode::Deep,
    }
}

/// Advisory notifications derived from elapsed wait time.
///
/// Advisory only: neither variant ever cancels the stream, so genuinely
/// slow-but-progressing responses are not killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// No visible content yet after the blank-wait threshold; the UI may show
    /// a deep-mode pre-hint.
    BlankWait,
    /// The response is taking unusually long; the UI may show a patience
    /// toast.
    SlowResponse,
}

/// Which advisory (if any) applies after `elapsed` with no first token seen.
pub fn advisory_due(elapsed: Duration, config: &InferenceConfig) -> Option<Advisory> {
    if elapsed >= Duration::from_millis(config.slow_response_ms) {
        Some(Advisory::SlowResponse)
    } else if elapsed >= Duration::from_millis(config.blank_wait_hint_ms) {
        Some(Advisory::BlankWait)
    } else {
        None
    }
}
