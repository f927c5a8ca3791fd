//! Wire models for the communicate endpoint.

mod request;

pub use request::{CommunicateRequest, Role, UpstreamMessage};
