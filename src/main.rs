//! Command-line reference client.
//!
//! Sends one prompt to the communicate endpoint and prints the streamed
//! answer as it arrives. Configuration comes from `MEDGO_*` environment
//! variables; logging is controlled by `RUST_LOG`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use medgo_stream::config::StreamConfig;
use medgo_stream::controller::SessionController;
use medgo_stream::handler::StreamHandler;
use medgo_stream::inference::{Advisory, InferredMode};
use medgo_stream::turn::{TurnOutcome, TurnPhase};

/// Prints streamed content to stdout and signals completion.
struct StdoutHandler {
    done: Arc<Notify>,
}

impl StreamHandler for StdoutHandler {
    fn on_first_token(&self, latency: Duration, mode: InferredMode) {
        tracing::info!(?mode, latency_ms = latency.as_millis() as u64, "first token");
    }

    fn on_content(&self, delta: &str) {
        print!("{delta}");
        let _ = std::io::stdout().flush();
    }

    fn on_route_status(&self, status: &str) {
        tracing::info!(status, "routing");
    }

    fn on_execute_status(&self, status: &str) {
        tracing::info!(status, "executing");
    }

    fn on_advisory(&self, advisory: Advisory) {
        match advisory {
            Advisory::BlankWait => tracing::info!("still working on a deeper answer"),
            Advisory::SlowResponse => tracing::warn!("response is taking longer than usual"),
        }
    }

    fn on_complete(&self, outcome: &TurnOutcome) {
        println!();
        match outcome.phase {
            TurnPhase::Completed => tracing::info!("turn completed"),
            TurnPhase::Errored => {
                if let Some(err) = &outcome.error {
                    tracing::error!(code = err.code.as_deref().unwrap_or("UNKNOWN"), "{}", err.message);
                }
            }
            phase => tracing::info!(?phase, "turn finished"),
        }
        self.done.notify_one();
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let prompt: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.is_empty() {
        eprintln!("usage: medgo-stream <prompt>");
        std::process::exit(2);
    }

    let done = Arc::new(Notify::new());
    let handler = Arc::new(StdoutHandler {
        done: Arc::clone(&done),
    });

    let controller = SessionController::new(StreamConfig::from_env(), handler);
    controller.send(prompt);
    done.notified().await;
}
