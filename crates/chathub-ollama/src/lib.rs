//! chathub-ollama: Ollama backend for chathub
//!
//! Implements the chathub-core `Backend` trait over Ollama's HTTP API,
//! streaming chat replies as NDJSON.

pub mod client;
pub mod error;
pub mod stream;
pub mod types;

pub use client::OllamaClient;
pub use error::{Error, Result};
pub use types::*;
