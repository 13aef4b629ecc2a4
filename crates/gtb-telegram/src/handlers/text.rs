use std::sync::Arc;

use teloxide::prelude::*;

use gtb_core::{
    domain::{ChatId, UserId},
    messaging::ChatAction,
};

use crate::router::AppState;

use super::prompt::{report_error, send_outcome, ChatActionLoop};

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if text.trim().is_empty() {
        return Ok(());
    }

    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let typing = ChatActionLoop::start(state.messenger.clone(), chat_id, ChatAction::Typing);
    let result = state.conversation.ask(user, text).await;
    typing.stop().await;

    match result {
        Ok(outcome) => send_outcome(&state, chat_id, outcome, None).await,
        Err(e) => report_error(&state, chat_id, "OpenAI error", e).await,
    }
    Ok(())
}
