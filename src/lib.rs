//! # chat-gateway
//!
//! A real-time chat gateway: persistent websocket sessions, fleet-wide
//! admission control, time-of-day message policy, durable history, and
//! synthesized replies (static media plus an external-LLM-generated text
//! reply).
//!
//! ## Architecture
//!
//! The connection lifecycle, admission control, and message-processing
//! pipeline is the core of this crate:
//!
//! - [`validator`] classifies and policy-checks inbound frames.
//! - [`registry`] owns live sessions and the two admission gates.
//! - [`heartbeat`] evicts sessions that stop responding.
//! - [`session`] is the per-connection state machine.
//! - [`processor`] turns an accepted message into a reply fan-out.
//! - [`ports`] are the abstract collaborators (persistence, media, LLM)
//!   the pipeline depends on without knowing their concrete backends.

pub mod config;
pub mod database;
pub mod domain_types;
pub mod error;
pub mod heartbeat;
pub mod ports;
pub mod processor;
pub mod registry;
pub mod rest_api;
pub mod server;
pub mod session;
pub mod time_provider;
pub mod validator;

pub use config::AppConfig;
pub use error::{ChatError, ChatResult};
pub use server::{create_router, serve, start_server, AppState};
