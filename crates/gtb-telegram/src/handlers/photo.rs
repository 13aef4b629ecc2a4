use std::sync::Arc;

use teloxide::{prelude::*, types::PhotoSize};
use tracing::info;

use gtb_core::{
    conversation::IngestRequest,
    domain::{ChatId, UserId},
    formatting::escape_html,
    ingest::{photo_prompt, PHOTO_SYSTEM_PROMPT},
    messaging::ChatAction,
};

use crate::router::AppState;

use super::{
    document::{download_and_save, recognize_image},
    prompt::{report_error, send_html, send_outcome, ChatActionLoop},
};

/// Telegram lists sizes smallest first; pick by pixel area to be safe.
fn largest(photos: &[PhotoSize]) -> Option<&PhotoSize> {
    photos
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let Some(best) = msg.photo().and_then(largest) else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    let upload = ChatActionLoop::start(state.messenger.clone(), chat_id, ChatAction::UploadPhoto);
    let result = process_photo(&bot, &state, user, chat_id, best, msg.caption()).await;
    upload.stop().await;

    if let Err(e) = result {
        report_error(&state, chat_id, "Failed to process photo", e).await;
    }
    Ok(())
}

async fn process_photo(
    bot: &Bot,
    state: &AppState,
    user: UserId,
    chat_id: ChatId,
    photo: &PhotoSize,
    caption: Option<&str>,
) -> anyhow::Result<()> {
    let file = download_and_save(bot, state, &photo.file.id, "photo").await?;
    let ext = if file.ext.is_empty() {
        ".jpg".to_string()
    } else {
        file.ext.clone()
    };

    info!(user_id = user.0, size = file.bytes.len(), "Photo received");

    let (extracted, extra_tokens) = recognize_image(state, &file.bytes, &ext).await?;
    let base_info = format!(
        "🖼 Photo saved: <code>{}</code>",
        escape_html(&file.path.display().to_string())
    );

    if extracted.trim().is_empty() {
        send_html(
            state,
            chat_id,
            &format!("{base_info}\n\nNo text found. Try a sharper photo."),
        )
        .await;
        return Ok(());
    }

    let prompt = photo_prompt(caption, &extracted);
    let typing = ChatActionLoop::start(state.messenger.clone(), chat_id, ChatAction::Typing);
    let outcome = state
        .conversation
        .ingest(
            user,
            IngestRequest {
                history_text: prompt.clone(),
                model_input: prompt,
                system_prompt: PHOTO_SYSTEM_PROMPT.to_string(),
                extra_tokens,
            },
        )
        .await;
    typing.stop().await;

    send_outcome(state, chat_id, outcome?, Some(&base_info)).await;
    Ok(())
}
