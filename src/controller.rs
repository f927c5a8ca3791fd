//! Session and stream control.
//!
//! [`SessionController`] owns the conversation identity, the rolling
//! transcript, and at most one in-flight turn. Sending while a turn is
//! streaming supersedes the old turn silently; `abort` stops the current turn
//! and keeps its partial content. The assembler for the active turn is shared
//! between the controller and the driver task behind a mutex so abort takes
//! effect immediately, without waiting for the next network frame.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::client::StreamClient;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::events::{ErrorInfo, TypedEvent};
use crate::handler::StreamHandler;
use crate::identity::Identity;
use crate::inference::{advisory_due, Advisory};
use crate::models::{CommunicateRequest, UpstreamMessage};
use crate::turn::{TurnAssembler, TurnPhase};

/// Drives streaming turns for one conversation.
pub struct SessionController {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveTurn>>,
}

struct Shared {
    config: StreamConfig,
    client: StreamClient,
    handler: Arc<dyn StreamHandler>,
    identity: Mutex<Identity>,
    /// Completed exchanges only; failed turns never enter the transcript so a
    /// retry resends a clean history.
    history: Mutex<Vec<UpstreamMessage>>,
    last_prompt: Mutex<Option<String>>,
}

struct ActiveTurn {
    assembler: Arc<Mutex<TurnAssembler>>,
    driver: JoinHandle<()>,
    advisory: JoinHandle<()>,
}

impl SessionController {
    pub fn new(config: StreamConfig, handler: Arc<dyn StreamHandler>) -> Self {
        let mut identity = Identity::generate();
        identity.user_id = config.user_id.clone();
        identity.app_id = config.app_id.clone();
        let client = StreamClient::new(&config);
        Self {
            shared: Arc::new(Shared {
                config,
                client,
                handler,
                identity: Mutex::new(identity),
                history: Mutex::new(Vec::new()),
                last_prompt: Mutex::new(None),
            }),
            active: Mutex::new(None),
        }
    }

    /// Current conversation identity.
    pub fn identity(&self) -> Identity {
        self.shared.identity.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether a turn is currently streaming.
    pub fn is_streaming(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active
            .as_ref()
            .map(|turn| !turn.assembler.lock().unwrap_or_else(|e| e.into_inner()).is_finished())
            .unwrap_or(false)
    }

    /// Send a prompt, starting a new turn.
    ///
    /// Any still-streaming previous turn is superseded silently before the
    /// new one starts.
    pub fn send(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.supersede_active();
        *self.shared.last_prompt.lock().unwrap_or_else(|e| e.into_inner()) = Some(prompt.clone());

        let assembler = Arc::new(Mutex::new(TurnAssembler::new(
            self.shared.config.inference.clone(),
        )));

        let advisory = tokio::spawn(advisory_timer(
            Arc::clone(&self.shared),
            Arc::clone(&assembler),
        ));
        let driver = tokio::spawn(drive_turn(
            Arc::clone(&self.shared),
            Arc::clone(&assembler),
            prompt,
        ));

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(ActiveTurn {
            assembler,
            driver,
            advisory,
        });
    }

    /// Resend the last prompt. No-op when nothing has been sent yet.
    pub fn retry_last(&self) {
        let prompt = self
            .shared
            .last_prompt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(prompt) = prompt {
            self.send(prompt);
        }
    }

    /// Stop the active turn, keeping its partial content.
    ///
    /// Idempotent: aborting a finished or absent turn does nothing.
    pub fn abort(&self) {
        let outcome = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let Some(turn) = active.as_ref() else {
                return;
            };
            let mut assembler = turn.assembler.lock().unwrap_or_else(|e| e.into_inner());
            if assembler.is_finished() {
                return;
            }
            assembler.abort();
            let prompt = self
                .shared
                .last_prompt
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            record_exchange(&self.shared, prompt.as_deref(), assembler.content());
            let outcome = assembler.outcome();
            drop(assembler);
            turn.driver.abort();
            turn.advisory.abort();
            outcome
        };
        // Every lock is released before the terminal callback, so the handler
        // may immediately start a new turn from inside it.
        self.shared.handler.on_complete(&outcome);
    }

    fn supersede_active(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(turn) = active.take() {
            let mut assembler = turn.assembler.lock().unwrap_or_else(|e| e.into_inner());
            if !assembler.is_finished() {
                tracing::debug!("superseding in-flight turn");
                assembler.supersede();
            }
            drop(assembler);
            turn.driver.abort();
            turn.advisory.abort();
        }
    }
}

/// Append a completed user/assistant exchange to the transcript.
fn record_exchange(shared: &Shared, prompt: Option<&str>, answer: &str) {
    let mut history = shared.history.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(prompt) = prompt {
        history.push(UpstreamMessage::user(prompt));
    }
    if !answer.is_empty() {
        history.push(UpstreamMessage::assistant(answer));
    }
}

/// Last `max` transcript entries, oldest first.
fn transcript_window(history: &[UpstreamMessage], max: usize) -> Vec<UpstreamMessage> {
    let start = history.len().saturating_sub(max);
    history[start..].to_vec()
}

async fn drive_turn(shared: Arc<Shared>, assembler: Arc<Mutex<TurnAssembler>>, prompt: String) {
    let request = build_request(&shared, &prompt);

    match shared.client.stream(&request).await {
        Ok(mut stream) => loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    if !handle_event(&shared, &assembler, event) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    let info = error_info(&err);
                    assembler.lock().unwrap_or_else(|e| e.into_inner()).fail(info);
                    break;
                }
                None => {
                    assembler.lock().unwrap_or_else(|e| e.into_inner()).complete_eof();
                    break;
                }
            }
        },
        Err(err) => {
            let info = error_info(&err);
            assembler.lock().unwrap_or_else(|e| e.into_inner()).fail(info);
        }
    }

    finish_turn(&shared, &assembler, &prompt);
}

/// Apply one stream event to the turn. Returns `false` once the turn is in a
/// terminal phase and the driver should stop.
///
/// The finished check runs before anything else so a turn superseded while
/// the frame was in flight cannot mutate shared state: in particular, its
/// late route frame must not rewrite the conversation identity the successor
/// turn is already using.
fn handle_event(shared: &Shared, assembler: &Mutex<TurnAssembler>, event: TypedEvent) -> bool {
    let mut turn = assembler.lock().unwrap_or_else(|e| e.into_inner());
    if turn.is_finished() {
        return false;
    }
    if let TypedEvent::Route(route) = &event {
        let mut identity = shared.identity.lock().unwrap_or_else(|e| e.into_inner());
        identity.apply_route(route);
    }
    turn.apply(event, shared.handler.as_ref());
    !turn.is_finished()
}

/// Dispatch terminal callbacks for a turn the driver finished.
///
/// The outcome is snapshotted and the mutex released before any callback
/// fires: a handler calling `retry_last`/`send` from `on_complete` re-enters
/// the controller on this thread. Aborted turns are skipped because `abort()`
/// already dispatched their callback.
fn finish_turn(shared: &Shared, assembler: &Mutex<TurnAssembler>, prompt: &str) {
    let outcome = {
        let turn = assembler.lock().unwrap_or_else(|e| e.into_inner());
        match turn.phase() {
            TurnPhase::Superseded | TurnPhase::Aborted => return,
            TurnPhase::Completed => {
                // Recorded before the callback so a retry started from
                // on_complete sees this exchange in its history.
                record_exchange(shared, Some(prompt), turn.content());
            }
            _ => {}
        }
        turn.outcome()
    };

    if let Some(info) = &outcome.error {
        let err = StreamError::from(info.clone());
        tracing::warn!(code = err.error_code(), "turn failed: {err}");
        shared.handler.on_error(info);
    }
    shared.handler.on_complete(&outcome);
}

fn build_request(shared: &Shared, prompt: &str) -> CommunicateRequest {
    let identity = shared.identity.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let messages = {
        let history = shared.history.lock().unwrap_or_else(|e| e.into_inner());
        transcript_window(&history, shared.config.history_max)
    };

    let mut request = CommunicateRequest::new(prompt, &identity).with_messages(messages);
    if let Some(system) = &shared.config.system_prompt {
        request = request.with_system(system.clone());
    }
    if let Some(index) = shared.config.llm_index {
        request = request.with_llm_index(index);
    }
    request
}

fn error_info(err: &StreamError) -> ErrorInfo {
    ErrorInfo {
        code: Some(err.error_code().to_string()),
        message: err.user_message(),
        recoverable: err.is_recoverable(),
    }
}

/// Fires wait advisories while no visible token has arrived.
///
/// Two checkpoints, both advisory only: the blank-wait hint, then the
/// slow-response notice. The task exits as soon as a token lands or the turn
/// finishes; the controller also aborts it outright on supersede/abort.
async fn advisory_timer(shared: Arc<Shared>, assembler: Arc<Mutex<TurnAssembler>>) {
    let started = std::time::Instant::now();

    for checkpoint in [shared.config.blank_wait_hint(), shared.config.slow_response()] {
        tokio::time::sleep(checkpoint.saturating_sub(started.elapsed())).await;

        let advisory = {
            let mut turn = assembler.lock().unwrap_or_else(|e| e.into_inner());
            if turn.first_token_seen() || turn.is_finished() {
                return;
            }
            let Some(advisory) = advisory_due(started.elapsed(), &shared.config.inference) else {
                continue;
            };
            if advisory == Advisory::BlankWait {
                turn.note_blank_wait();
            }
            advisory
        };
        shared.handler.on_advisory(advisory);
    }
}
