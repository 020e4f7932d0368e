//! HTTP surface of the gateway: server lifecycle, handlers, SSE framing.

pub mod handlers;
mod server;
mod sse;

pub use server::{create_router, run_server, AppState};
