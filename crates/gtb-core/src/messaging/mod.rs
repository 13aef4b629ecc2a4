//! Messenger abstractions (Telegram implements them in `gtb-telegram`).

pub mod port;
pub mod types;

pub use port::MessagingPort;
pub use types::{ChatAction, InlineButton, InlineKeyboard, OutgoingDocument};
