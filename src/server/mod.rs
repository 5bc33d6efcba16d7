//! HTTP and WebSocket transport: the axum [`Router`](axum::Router) exposed
//! to MCP clients and browser frontends, plus the outbound agent client.

pub mod agent_client;
pub mod http;
pub mod ws;

pub use http::{build_router, HttpState};
