//! Telegram update handlers.
//!
//! Every update is authorized first, then routed by kind: commands, plain
//! text, documents and photos. Handlers never fail the dispatcher; errors are
//! logged and reported to the user.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::info;

use gtb_core::domain::{ChatId, UserId};
use gtb_core::security::is_authorized;

use crate::router::AppState;
mod callback;
mod commands;
mod document;
mod photo;
mod prompt;
mod text;
mod views;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.allowed_users) {
        info!(user_id = ?user_id.map(|u| u.0), "Rejected unauthorized user");
        prompt::send_html(&state, ChatId(msg.chat.id.0), views::UNAUTHORIZED).await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg, state).await;
        }
        return text::handle_text(msg, state).await;
    }

    if msg.photo().is_some() {
        return photo::handle_photo(bot, msg, state).await;
    }

    if msg.document().is_some() {
        return document::handle_document(bot, msg, state).await;
    }

    prompt::send_html(
        &state,
        ChatId(msg.chat.id.0),
        "Send text, a PDF, a DOCX or a photo.",
    )
    .await;
    Ok(())
}
