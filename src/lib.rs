//! Durogate - an HTTP gateway in front of a durable orchestration engine
//!
//! This library provides a small HTTP front door that:
//! - Starts orchestration instances on the engine and answers 202 Accepted
//!   with the instance id and its management URIs
//! - Answers status polls with 202 while an instance is in flight and 200
//!   once it reaches a terminal state
//! - Rewrites every engine-generated URI so clients behind a reverse proxy,
//!   or behind a configured custom domain, get addresses they can reach
//! - Maps engine timeouts and outages to 503 with `Retry-After`

pub mod config;
pub mod engine;
pub mod error;
pub mod forwarding;
pub mod launcher;
pub mod orchestration;
pub mod response;
pub mod rewrite;
pub mod server;
pub mod state;
pub mod status;
