//! HTTP relay between browser chat clients and an OpenAI-compatible
//! completions provider.
//!
//! `POST /chat-with-ai` forwards one chat turn upstream. Non-streaming
//! requests get a single JSON reply. Streaming requests get the upstream
//! deltas reframed as a line-delimited event stream (see
//! [`chat_core::protocol`]).

pub mod config;
pub mod error;
pub mod reframe;
pub mod routes;
pub mod telemetry;

pub use config::RelayArgs;
pub use routes::{build_router, AppState};
