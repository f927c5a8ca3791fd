//! End-to-end streaming tests using wiremock.
//!
//! These exercise the full pipeline (HTTP client, frame decoder, event
//! router, turn assembler, session controller) against canned SSE bodies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use medgo_stream::client::StreamClient;
use medgo_stream::config::StreamConfig;
use medgo_stream::controller::SessionController;
use medgo_stream::error::StreamError;
use medgo_stream::events::TypedEvent;
use medgo_stream::handler::StreamHandler;
use medgo_stream::identity::Identity;
use medgo_stream::inference::InferredMode;
use medgo_stream::models::CommunicateRequest;
use medgo_stream::turn::{TurnOutcome, TurnPhase, ERROR_MARKER, STOP_MARKER};

/// Mount the communicate endpoint returning `body` as an SSE response.
async fn mount_sse(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/v3/communicate"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer) -> StreamConfig {
    StreamConfig::default().with_base_url(server.uri())
}

async fn collect_events(server: &MockServer) -> Vec<TypedEvent> {
    let config = config_for(server);
    let client = StreamClient::new(&config);
    let request = CommunicateRequest::new("test prompt", &Identity::generate());
    let stream = client.stream(&request).await.expect("stream should open");
    stream
        .map(|item| item.expect("no transport error expected"))
        .collect()
        .await
}

/// Records handler callbacks and signals on terminal outcome.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
    outcome: Mutex<Option<TurnOutcome>>,
    done: Notify,
}

impl Recorder {
    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn outcome(&self) -> TurnOutcome {
        self.outcome.lock().unwrap().clone().expect("turn not finished")
    }

    async fn wait(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.done.notified())
            .await
            .expect("turn did not finish in time");
    }
}

impl StreamHandler for Recorder {
    fn on_route(&self, route: &medgo_stream::events::RouteInfo) {
        self.log.lock().unwrap().push(format!(
            "route:{}",
            route.turn_id.as_deref().unwrap_or("-")
        ));
    }
    fn on_first_token(&self, _latency: Duration, mode: InferredMode) {
        self.log.lock().unwrap().push(format!("first_token:{mode:?}"));
    }
    fn on_content(&self, text: &str) {
        self.log.lock().unwrap().push(format!("content:{text}"));
    }
    fn on_status(&self, status: &str) {
        self.log.lock().unwrap().push(format!("status:{status}"));
    }
    fn on_evidence(&self, evidence: &[medgo_stream::events::EvidenceRef]) {
        self.log.lock().unwrap().push(format!("evidence:{}", evidence.len()));
    }
    fn on_complete(&self, outcome: &TurnOutcome) {
        self.log.lock().unwrap().push(format!("complete:{:?}", outcome.phase));
        *self.outcome.lock().unwrap() = Some(outcome.clone());
        self.done.notify_one();
    }
}

#[tokio::test]
async fn test_v3_happy_path_event_sequence() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: route\ndata: {\"turn_id\":\"t1\",\"session_id\":\"s1\",\"conversation_id\":\"c1\"}\n\n",
        "event: status\ndata: {\"status\":\"retrieving evidence\"}\n\n",
        "event: token\ndata: {\"content\":\"Aspirin \"}\n\n",
        "event: token\ndata: {\"content\":\"inhibits COX-1.\"}\n\n",
        "event: evidence\ndata: [{\"doc_id\":\"d1\",\"title\":\"Guideline\"}]\n\n",
        "event: done\ndata: {\"trace_id\":\"tr-9\",\"quality_decision\":\"pass\"}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let events = collect_events(&server).await;
    let kinds: Vec<&str> = events.iter().map(TypedEvent::kind).collect();
    // The route frame's identifiers also feed the observability side channel.
    assert_eq!(
        kinds,
        vec![
            "route",
            "observability",
            "status",
            "content_delta",
            "content_delta",
            "evidence",
            "done"
        ]
    );

    match &events[6] {
        TypedEvent::Done(info) => {
            assert_eq!(info.trace_id.as_deref(), Some("tr-9"));
            assert_eq!(info.quality_decision.as_deref(), Some("pass"));
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn test_legacy_delta_protocol_with_done_sentinel() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"reasoning\":\"considering\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let events = collect_events(&server).await;
    let kinds: Vec<&str> = events.iter().map(TypedEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["content_delta", "reasoning_delta", "content_delta", "done"]
    );
    assert_eq!(events[0], TypedEvent::ContentDelta("Hello".into()));
}

#[tokio::test]
async fn test_control_tokens_filtered_from_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"llm_fast\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Real answer\"}}]}\n\n",
        "data: [DONE]\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let events = collect_events(&server).await;
    let content: Vec<&TypedEvent> = events
        .iter()
        .filter(|e| matches!(e, TypedEvent::ContentDelta(_)))
        .collect();
    assert_eq!(content, vec![&TypedEvent::ContentDelta("Real answer".into())]);
}

#[tokio::test]
async fn test_non_2xx_status_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/communicate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = StreamClient::new(&config);
    let request = CommunicateRequest::new("hi", &Identity::generate());
    let err = client.stream(&request).await.err().expect("expected error");

    match &err {
        StreamError::Transport { status, message } => {
            assert_eq!(*status, Some(503));
            assert_eq!(message, "overloaded");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_controller_completes_turn_and_corrects_identity() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: route\ndata: {\"turn_id\":\"t1\",\"conversation_id\":\"conv-corrected\"}\n\n",
        "event: token\ndata: {\"content\":\"Answer.\"}\n\n",
        "event: done\ndata: {}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("what is the mechanism?");
    recorder.wait().await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.phase, TurnPhase::Completed);
    assert_eq!(outcome.content, "Answer.");
    assert_eq!(outcome.route.turn_id.as_deref(), Some("t1"));

    // Route correction applies to the session identity.
    assert_eq!(controller.identity().conversation_id, "conv-corrected");

    let entries = recorder.entries();
    assert!(entries.contains(&"route:t1".to_string()));
    assert!(entries.iter().any(|e| e.starts_with("first_token:")));
    assert!(entries.contains(&"complete:Completed".to_string()));
}

#[tokio::test]
async fn test_controller_first_token_fires_once() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: token\ndata: {\"content\":\"a\"}\n\n",
        "event: token\ndata: {\"content\":\"b\"}\n\n",
        "event: token\ndata: {\"content\":\"c\"}\n\n",
        "event: done\ndata: {}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("hi");
    recorder.wait().await;

    let count = recorder
        .entries()
        .iter()
        .filter(|e| e.starts_with("first_token:"))
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_backend_error_preserves_partial_content() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: token\ndata: {\"content\":\"The mechanism involves\"}\n\n",
        "event: error\ndata: {\"code\":\"TIMEOUT\",\"message\":\"model timed out\",\"recoverable\":true}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("explain");
    recorder.wait().await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.phase, TurnPhase::Errored);
    assert_eq!(
        outcome.content,
        format!("The mechanism involves\n\n{ERROR_MARKER}")
    );
    let error = outcome.error.expect("error info expected");
    assert_eq!(error.code.as_deref(), Some("TIMEOUT"));
    assert!(error.recoverable);
}

#[tokio::test]
async fn test_eof_without_done_completes_with_partial_content() {
    let server = MockServer::start().await;
    // Stream closes after content without any done event.
    let body = "event: token\ndata: {\"content\":\"Partial but usable answer\"}\n\n".to_string();
    mount_sse(&server, body).await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("hi");
    recorder.wait().await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.phase, TurnPhase::Completed);
    assert_eq!(outcome.content, "Partial but usable answer");
    assert!(outcome.done.is_none());
}

#[tokio::test]
async fn test_abort_before_any_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/communicate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("event: done\ndata: {}\n\n".to_string(), "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("hi");

    // Give the request task a moment to start, then stop it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(controller.is_streaming());
    controller.abort();
    recorder.wait().await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.phase, TurnPhase::Aborted);
    assert_eq!(outcome.content, STOP_MARKER);
    assert!(!controller.is_streaming());

    // A second abort changes nothing.
    controller.abort();
    assert_eq!(
        recorder
            .entries()
            .iter()
            .filter(|e| e.starts_with("complete:"))
            .count(),
        1
    );
}

/// Retries the prompt once from inside the terminal callback.
#[derive(Default)]
struct RetryOnComplete {
    controller: Mutex<Option<Arc<SessionController>>>,
    phases: Mutex<Vec<TurnPhase>>,
    done: Notify,
}

impl StreamHandler for RetryOnComplete {
    fn on_complete(&self, outcome: &TurnOutcome) {
        let mut phases = self.phases.lock().unwrap();
        phases.push(outcome.phase);
        let first = phases.len() == 1;
        drop(phases);
        if first {
            let controller = self.controller.lock().unwrap().clone();
            if let Some(controller) = controller {
                controller.retry_last();
            }
        } else {
            self.done.notify_one();
        }
    }
}

#[tokio::test]
async fn test_retry_from_terminal_callback_starts_new_turn() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: token\ndata: {\"content\":\"Answer.\"}\n\n",
        "event: done\ndata: {}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let handler = Arc::new(RetryOnComplete::default());
    let controller = Arc::new(SessionController::new(config_for(&server), handler.clone()));
    *handler.controller.lock().unwrap() = Some(Arc::clone(&controller));

    controller.send("first question");

    // The timeout guards against the controller holding a lock across the
    // terminal callback, which would make the re-entrant retry hang.
    tokio::time::timeout(Duration::from_secs(5), handler.done.notified())
        .await
        .expect("retry started from on_complete must run to completion");

    let phases = handler.phases.lock().unwrap().clone();
    assert_eq!(phases, vec![TurnPhase::Completed, TurnPhase::Completed]);
}

fn chunk(data: &str) -> String {
    format!("{:x}\r\n{}\r\n", data.len(), data)
}

/// Serves one chunked SSE response over raw TCP, trickling frames so the
/// client can abort mid-stream while the server keeps sending.
async fn serve_trickled_sse(listener: TcpListener) {
    let (mut socket, _) = listener.accept().await.expect("accept");

    let mut request = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.expect("read request");
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let header = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
    socket.write_all(header.as_bytes()).await.expect("write header");

    let early = concat!(
        "event: token\ndata: {\"content\":\"Hel\"}\n\n",
        "event: token\ndata: {\"content\":\"lo\"}\n\n",
    );
    socket.write_all(chunk(early).as_bytes()).await.expect("write early frames");
    socket.flush().await.expect("flush");

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The client aborts in the meantime; write errors are expected here.
    let late = concat!(
        "event: token\ndata: {\"content\":\" there\"}\n\n",
        "event: done\ndata: {}\n\n",
    );
    let _ = socket.write_all(chunk(late).as_bytes()).await;
    let _ = socket.write_all(b"0\r\n\r\n").await;
}

#[tokio::test]
async fn test_abort_mid_stream_stops_further_content() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve_trickled_sse(listener));

    let config = StreamConfig::default().with_base_url(format!("http://{addr}"));
    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config, recorder.clone());
    controller.send("hi");

    let content_count = |entries: &[String]| {
        entries.iter().filter(|e| e.starts_with("content:")).count()
    };

    // Wait for the two live deltas, then stop the turn.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while content_count(&recorder.entries()) < 2 {
        assert!(std::time::Instant::now() < deadline, "content never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    controller.abort();
    recorder.wait().await;
    assert_eq!(content_count(&recorder.entries()), 2);

    // The server keeps delivering after the abort; none of it surfaces.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let entries = recorder.entries();
    assert_eq!(content_count(&entries), 2);
    assert!(entries.contains(&"content:Hel".to_string()));
    assert!(entries.contains(&"content:lo".to_string()));

    let outcome = recorder.outcome();
    assert_eq!(outcome.phase, TurnPhase::Aborted);
    assert_eq!(outcome.content, format!("Hello\n\n{STOP_MARKER}"));
}

#[tokio::test]
async fn test_observability_sidechannel_reaches_outcome() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: token\ndata: {\"content\":\"hi\",\"meta\":{\"agent\":\"qa_agent\",\"tokens_used\":128}}\n\n",
        "event: context_debug\ndata: {\"intent\":{\"name\":\"qa_contextual\"},\"model\":\"m-deep\"}\n\n",
        "event: done\ndata: {}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let recorder = Arc::new(Recorder::default());
    let controller = SessionController::new(config_for(&server), recorder.clone());
    controller.send("hi");
    recorder.wait().await;

    let obs = recorder.outcome().observability;
    assert_eq!(obs.agent.as_deref(), Some("qa_agent"));
    assert_eq!(obs.tokens_used, Some(128));
    assert_eq!(obs.model.as_deref(), Some("m-deep"));
    let debug = obs.context_debug.expect("context debug expected");
    assert_eq!(debug["intent"]["name"], "qa_contextual");
}

#[tokio::test]
async fn test_keepalive_comments_and_split_frames_are_tolerated() {
    let server = MockServer::start().await;
    // Comment lines interleaved with frames; one frame splits its JSON
    // payload across two data lines.
    let body = concat!(
        ": keep-alive\n\n",
        "event: token\ndata: {\"content\":\ndata: \"line\"}\n\n",
        ": keep-alive\n\n",
        "event: done\ndata: {}\n\n",
    )
    .to_string();
    mount_sse(&server, body).await;

    let events = collect_events(&server).await;
    let kinds: Vec<&str> = events.iter().map(TypedEvent::kind).collect();
    assert_eq!(kinds, vec!["content_delta", "done"]);
}
