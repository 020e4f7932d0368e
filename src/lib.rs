//! llmgw - multi-provider LLM gateway.
//!
//! An HTTP gateway between client applications and upstream chat-completion
//! providers: unified requests in, one healthy provider out, the reply
//! streamed back as it arrives, and per-tenant token usage accounted along
//! the way. Tenants authenticate with bearer API keys and are admitted
//! through a distributed per-minute token budget.

pub mod auth;
pub mod config;
pub mod error;
pub mod limiter;
pub mod providers;
pub mod proxy;
pub mod router;
pub mod seeder;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
