//! medgo-stream - streaming chat client core for the Med-Go reasoning
//! workbench.
//!
//! The pipeline runs in four stages: the frame decoder reassembles SSE frames
//! from arbitrary network chunks, the event router classifies frames from
//! three backend protocol generations into typed events, the turn assembler
//! folds events into one in-progress assistant turn, and the session
//! controller manages identity, history, and turn lifecycle (send, abort,
//! retry, supersede).

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod handler;
pub mod identity;
pub mod inference;
pub mod models;
pub mod observability;
pub mod router;
pub mod sse;
pub mod turn;
