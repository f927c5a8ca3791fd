//! Callback surface for stream consumers.
//!
//! A UI implements [`StreamHandler`] and hands it to the session controller.
//! Every method has a no-op default so consumers only override what they
//! render. Callbacks fire on the controller's driver task; implementations
//! should stay cheap and hand heavy work elsewhere.

use std::time::Duration;

use serde_json::Value;

use crate::events::{AgentInfo, EvidenceRef, RouteInfo};
use crate::inference::{Advisory, InferredMode};
use crate::observability::ObservabilitySnapshot;
use crate::turn::TurnOutcome;

/// Observer for the lifecycle of one streaming turn.
#[allow(unused_variables)]
pub trait StreamHandler: Send + Sync {
    /// Backend assigned identifiers to the turn.
    fn on_route(&self, route: &RouteInfo) {}

    /// Backend selected an agent/model for the turn.
    fn on_agent(&self, agent: &AgentInfo) {}

    /// First visible token arrived. Fires exactly once per turn, before the
    /// corresponding `on_content`.
    fn on_first_token(&self, latency: Duration, mode: InferredMode) {}

    /// A visible answer increment arrived; `delta` is only the new text.
    /// The full accumulated content is available from the turn's outcome.
    fn on_content(&self, delta: &str) {}

    /// A reasoning increment arrived; `delta` is only the new text.
    fn on_reasoning(&self, delta: &str) {}

    /// Routing-stage status changed (replaces any previous value).
    fn on_route_status(&self, status: &str) {}

    /// Execution-stage status changed (replaces any previous value).
    fn on_execute_status(&self, status: &str) {}

    /// Pipeline status notification from the backend.
    fn on_status(&self, status: &str) {}

    /// Observability snapshot grew; `snapshot` is the merged total so far.
    fn on_observability(&self, snapshot: &ObservabilitySnapshot) {}

    /// A structured thinking trace arrived.
    fn on_thinking_trace(&self, trace: &Value) {}

    /// Evidence references arrived.
    fn on_evidence(&self, evidence: &[EvidenceRef]) {}

    /// A wait advisory fired while no token had arrived yet.
    fn on_advisory(&self, advisory: Advisory) {}

    /// The turn is failing; fires before the terminal `on_complete`.
    fn on_error(&self, error: &crate::events::ErrorInfo) {}

    /// The turn finished; fires exactly once per non-superseded turn.
    fn on_complete(&self, outcome: &TurnOutcome) {}
}

/// Handler that ignores every callback. Useful for tests and fire-and-forget
/// sends.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl StreamHandler for NoopHandler {}
