//! Model client and call cache for bidforge.
//!
//! Everything semantic in the pipeline flows through this crate: the
//! [`ModelClient`] delivers message-based requests to the generation service
//! with retry and model failover, and [`PromptCache`] memoizes every call so
//! repeated runs in the same working directory cost nothing.

mod cache;
mod client;
pub mod testing;

pub use cache::{CallKind, PromptCache, llm_json, llm_rewrite};
pub use client::{
    ChatOptions, ChatParams, ClientConfig, HttpTransport, ModelClient, Transport, TransportError,
};
