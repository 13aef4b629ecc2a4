//! Completion-model port.

pub mod client;
pub mod types;

pub use client::ChatModel;
pub use types::{ChatRequest, Completion};
