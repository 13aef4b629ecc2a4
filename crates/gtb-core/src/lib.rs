//! Core domain + application logic for the GPT Telegram bot.
//!
//! This crate is framework-agnostic. Telegram and the OpenAI HTTP API live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod ingest;
pub mod logging;
pub mod menus;
pub mod messaging;
pub mod model;
pub mod quota;
pub mod security;
pub mod store;

pub use errors::{Error, Result};
