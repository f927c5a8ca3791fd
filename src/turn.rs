//! Turn assembly.
//!
//! A [`TurnAssembler`] folds the router's typed events into one in-progress
//! assistant turn: accumulated content and reasoning, overwrite-style stage
//! statuses, merged observability, and the terminal outcome. It is the only
//! place turn state mutates; the driver task and the controller share one
//! instance behind a mutex so an abort can finalize the turn immediately
//! without waiting for the network task to notice.
//!
//! Incremental callbacks (`on_content`, `on_route`, ...) fire from inside
//! `apply`; terminal callbacks (`on_error`, `on_complete`) are dispatched by
//! the caller after it has released the mutex, so handlers can safely call
//! back into the session controller.

use std::time::{Duration, Instant};

use crate::config::InferenceConfig;
use crate::events::{AgentInfo, DoneInfo, ErrorInfo, EvidenceRef, RouteInfo, TypedEvent};
use crate::handler::StreamHandler;
use crate::inference::{infer_mode, InferredMode, TimingSnapshot};
use crate::observability::ObservabilitySnapshot;

/// Marker appended to partial content when a turn fails.
pub const ERROR_MARKER: &str = "(request failed, retry available)";

/// Marker appended to partial content when the user stops a turn.
pub const STOP_MARKER: &str = "(stopped by user)";

/// Lifecycle phase of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// Request sent, no frame received yet.
    Sending,
    /// At least one frame received.
    Streaming,
    /// Terminated by `done` or clean end of stream.
    Completed,
    /// Terminated by a backend or transport error.
    Errored,
    /// Stopped by the user; partial content kept.
    Aborted,
    /// Replaced by a newer turn; no terminal callback fired.
    Superseded,
}

impl TurnPhase {
    /// Terminal phases accept no further events.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnPhase::Completed | TurnPhase::Errored | TurnPhase::Aborted | TurnPhase::Superseded
        )
    }
}

/// Final state of a finished turn, handed to `on_complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub phase: TurnPhase,
    /// Full visible content, including any appended stop/error marker.
    pub content: String,
    pub reasoning: String,
    pub mode: Option<InferredMode>,
    pub first_token_latency: Option<Duration>,
    pub route: RouteInfo,
    pub agent: AgentInfo,
    pub route_status: Option<String>,
    pub execute_status: Option<String>,
    pub evidence: Vec<EvidenceRef>,
    pub observability: ObservabilitySnapshot,
    pub done: Option<DoneInfo>,
    pub error: Option<ErrorInfo>,
}

/// Folds typed events into one turn and drives handler callbacks.
#[derive(Debug)]
pub struct TurnAssembler {
    inference: InferenceConfig,
    started_at: Instant,
    phase: TurnPhase,
    content: String,
    reasoning: String,
    route: RouteInfo,
    agent: AgentInfo,
    route_status: Option<String>,
    execute_status: Option<String>,
    observability: ObservabilitySnapshot,
    evidence: Vec<EvidenceRef>,
    first_token_latency: Option<Duration>,
    blank_wait_fired: bool,
    mode: Option<InferredMode>,
    done: Option<DoneInfo>,
    error: Option<ErrorInfo>,
}

impl TurnAssembler {
    pub fn new(inference: InferenceConfig) -> Self {
        Self {
            inference,
            started_at: Instant::now(),
            phase: TurnPhase::Sending,
            content: String::new(),
            reasoning: String::new(),
            route: RouteInfo::default(),
            agent: AgentInfo::default(),
            route_status: None,
            execute_status: None,
            observability: ObservabilitySnapshot::default(),
            evidence: Vec::new(),
            first_token_latency: None,
            blank_wait_fired: false,
            mode: None,
            done: None,
            error: None,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn first_token_seen(&self) -> bool {
        self.first_token_latency.is_some()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn route(&self) -> &RouteInfo {
        &self.route
    }

    /// Record that a wait advisory fired before any token arrived.
    ///
    /// Ignored once a token has been seen; the advisory timer races the
    /// stream and may lose.
    pub fn note_blank_wait(&mut self) {
        if !self.first_token_seen() && !self.is_finished() {
            self.blank_wait_fired = true;
        }
    }

    /// Fold one typed event into the turn, firing incremental handler
    /// callbacks.
    ///
    /// Events arriving after a terminal phase are dropped. Terminal events
    /// (`Done`, `Error`) mutate state only; the caller dispatches `on_error`
    /// and `on_complete` after releasing its lock, so a handler may re-enter
    /// the controller (retry, new send) from those callbacks.
    pub fn apply(&mut self, event: TypedEvent, handler: &dyn StreamHandler) {
        if self.is_finished() {
            tracing::trace!(kind = event.kind(), "event after terminal phase dropped");
            return;
        }
        if self.phase == TurnPhase::Sending {
            self.phase = TurnPhase::Streaming;
        }

        match event {
            TypedEvent::Route(route) => {
                self.route = route;
                handler.on_route(&self.route);
            }
            TypedEvent::Agent(agent) => {
                self.agent = agent;
                handler.on_agent(&self.agent);
            }
            TypedEvent::ContentDelta(delta) => {
                // Whitespace-only deltas accumulate but do not count as the
                // first visible token.
                if !delta.trim().is_empty() {
                    self.note_first_token(handler);
                }
                self.content.push_str(&delta);
                handler.on_content(&delta);
            }
            TypedEvent::ReasoningDelta(delta) => {
                self.reasoning.push_str(&delta);
                handler.on_reasoning(&delta);
            }
            TypedEvent::RouteStatus(status) => {
                handler.on_route_status(&status);
                self.route_status = Some(status);
            }
            TypedEvent::ExecuteStatus(status) => {
                handler.on_execute_status(&status);
                self.execute_status = Some(status);
            }
            TypedEvent::Status(status) => {
                handler.on_status(&status);
            }
            TypedEvent::Observability(snapshot) => {
                self.observability.merge(snapshot);
                handler.on_observability(&self.observability);
            }
            TypedEvent::ThinkingTrace(trace) => {
                handler.on_thinking_trace(&trace);
            }
            TypedEvent::Evidence(evidence) => {
                handler.on_evidence(&evidence);
                self.evidence = evidence;
            }
            TypedEvent::Done(info) => {
                self.complete(info);
            }
            TypedEvent::Error(info) => {
                self.fail(info);
            }
            TypedEvent::Unknown => {}
        }
    }

    fn note_first_token(&mut self, handler: &dyn StreamHandler) {
        if self.first_token_latency.is_some() {
            return;
        }
        let latency = self.started_at.elapsed();
        self.first_token_latency = Some(latency);
        let mode = infer_mode(
            TimingSnapshot {
                first_token_latency: Some(latency),
                blank_wait_fired: self.blank_wait_fired,
            },
            &self.inference,
        );
        self.mode = Some(mode);
        handler.on_first_token(latency, mode);
    }

    /// Complete the turn on a `done` event.
    pub fn complete(&mut self, info: DoneInfo) {
        if self.is_finished() {
            return;
        }
        if let Some(evidence) = &info.response_evidence {
            self.evidence = evidence.clone();
        }
        self.done = Some(info);
        self.finalize(TurnPhase::Completed);
    }

    /// Complete the turn on clean end of stream without a `done` event.
    ///
    /// Treated as success: some backend paths close the stream instead of
    /// sending `done`.
    pub fn complete_eof(&mut self) {
        if self.is_finished() {
            return;
        }
        tracing::debug!("stream ended without done event, completing turn");
        self.finalize(TurnPhase::Completed);
    }

    /// Fail the turn, keeping partial content with an appended marker.
    pub fn fail(&mut self, info: ErrorInfo) {
        if self.is_finished() {
            return;
        }
        self.append_marker(ERROR_MARKER);
        self.error = Some(info);
        self.finalize(TurnPhase::Errored);
    }

    /// Stop the turn at the user's request, keeping partial content.
    pub fn abort(&mut self) {
        if self.is_finished() {
            return;
        }
        self.append_marker(STOP_MARKER);
        self.finalize(TurnPhase::Aborted);
    }

    /// Detach the turn because a newer one replaced it.
    ///
    /// Silent: no marker, no `on_complete`. The caller has already moved on.
    pub fn supersede(&mut self) {
        if self.is_finished() {
            return;
        }
        self.phase = TurnPhase::Superseded;
    }

    fn append_marker(&mut self, marker: &str) {
        if self.content.is_empty() {
            self.content.push_str(marker);
        } else {
            self.content.push_str("\n\n");
            self.content.push_str(marker);
        }
    }

    fn finalize(&mut self, phase: TurnPhase) {
        self.phase = phase;
        if self.mode.is_none() {
            self.mode = Some(infer_mode(
                TimingSnapshot {
                    first_token_latency: self.first_token_latency,
                    blank_wait_fired: self.blank_wait_fired,
                },
                &self.inference,
            ));
        }
    }

    /// Snapshot the turn's current terminal state.
    pub fn outcome(&self) -> TurnOutcome {
        TurnOutcome {
            phase: self.phase,
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
            mode: self.mode,
            first_token_latency: self.first_token_latency,
            route: self.route.clone(),
            agent: self.agent.clone(),
            route_status: self.route_status.clone(),
            execute_status: self.execute_status.clone(),
            evidence: self.evidence.clone(),
            observability: self.observability.clone(),
            done: self.done.clone(),
            error: self.error.clone(),
        }
    }
}
