use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{debug, info};

use gtb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    menus::{main_menu, manage_menu, reply_menu, CallbackAction},
    messaging::InlineKeyboard,
    security::is_authorized,
};

use crate::router::AppState;

use super::{
    commands::{cmd_chats, switch_to},
    prompt::{report_error, send_with_keyboard},
    views,
};

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let user = UserId(q.from.id.0 as i64);
    let data = q.data.clone().unwrap_or_default();

    let Some(message) = q.message.as_ref() else {
        let _ = state.messenger.answer_callback_query(&cb_id, None).await;
        return Ok(());
    };
    let chat_id = ChatId(message.chat.id.0);
    let origin = MessageRef {
        chat_id,
        message_id: MessageId(message.id.0),
    };

    if !is_authorized(Some(user), &state.cfg.allowed_users) {
        let _ = state
            .messenger
            .answer_callback_query(&cb_id, Some("Unauthorized"))
            .await;
        return Ok(());
    }

    let Some(action) = CallbackAction::parse(&data) else {
        let _ = state
            .messenger
            .answer_callback_query(&cb_id, Some("Unknown action"))
            .await;
        return Ok(());
    };

    info!(user_id = user.0, action = ?action, "Callback");

    match action {
        CallbackAction::MainMenu => match state.conversation.ensure_active_thread(user).await {
            Ok(_) => {
                let html = views::greeting(&state.cfg.bot_title);
                edit_or_send(&state, origin, &html, main_menu()).await;
            }
            Err(e) => report_error(&state, chat_id, "Storage error", e).await,
        },
        CallbackAction::ManageMenu => {
            edit_or_send(&state, origin, views::MANAGE_TITLE, manage_menu()).await
        }
        CallbackAction::Profile => match state.conversation.profile(user).await {
            Ok(p) => edit_or_send(&state, origin, &views::profile(&p), manage_menu()).await,
            Err(e) => report_error(&state, chat_id, "Storage error", e).await,
        },
        CallbackAction::KnowledgeBase => {
            edit_or_send(&state, origin, views::KNOWLEDGE_BASE, manage_menu()).await
        }
        CallbackAction::NewThread => match state.conversation.new_thread(user).await {
            Ok(thread) => {
                send_with_keyboard(&state, chat_id, &views::thread_created(thread), reply_menu())
                    .await
            }
            Err(e) => report_error(&state, chat_id, "Storage error", e).await,
        },
        CallbackAction::ListThreads => cmd_chats(&state, chat_id, user).await,
        CallbackAction::UseThread(thread) => switch_to(&state, chat_id, user, thread).await,
    }

    let _ = state.messenger.answer_callback_query(&cb_id, None).await;
    Ok(())
}

/// Menu navigation edits the menu message in place; if Telegram refuses
/// (for example the message is too old) a fresh message is sent instead.
async fn edit_or_send(state: &AppState, origin: MessageRef, html: &str, keyboard: InlineKeyboard) {
    match state
        .messenger
        .edit_html(origin, html, Some(keyboard.clone()))
        .await
    {
        Ok(()) => {}
        Err(e) if e.to_string().contains("message is not modified") => {}
        Err(e) => {
            debug!(error = %e, "edit failed; sending a new message");
            send_with_keyboard(state, origin.chat_id, html, keyboard).await;
        }
    }
}
