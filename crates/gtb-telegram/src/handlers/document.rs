use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use teloxide::{net::Download, prelude::*};
use tracing::info;

use gtb_core::{
    config::OcrEngine,
    conversation::IngestRequest,
    domain::{ChatId, UserId},
    formatting::escape_html,
    ingest::{
        check_size, document_history_prompt, document_model_input, extract_docx, extract_pdf,
        file_extension, image_mime, ocr_tesseract, save_local, stored_file_name, MediaKind,
        DOCUMENT_SYSTEM_PROMPT,
    },
    messaging::ChatAction,
};

use crate::router::AppState;

use super::prompt::{report_error, send_html, send_outcome, ChatActionLoop};

/// A Telegram file fetched into memory and saved under `FILES_DIR`.
pub(super) struct Downloaded {
    pub bytes: Vec<u8>,
    /// Lowercased extension with dot (from the Telegram file path), or `""`.
    pub ext: String,
    pub stored_name: String,
    pub path: PathBuf,
}

pub(super) async fn download_and_save(
    bot: &Bot,
    state: &AppState,
    file_id: &str,
    prefix: &str,
) -> anyhow::Result<Downloaded> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut bytes = Vec::new();
    bot.download_file(&file.path, &mut bytes).await?;
    check_size(bytes.len() as u64, state.cfg.max_file_mb)?;

    let ext = file_extension(&file.path);
    let stored_name = stored_file_name(prefix, &ext, Utc::now().timestamp());
    let path = save_local(&state.cfg.files_dir, &stored_name, &bytes).await?;
    Ok(Downloaded {
        bytes,
        ext,
        stored_name,
        path,
    })
}

/// OCR with the configured engine; returns the text and tokens spent on it.
pub(super) async fn recognize_image(
    state: &AppState,
    bytes: &[u8],
    ext: &str,
) -> gtb_core::Result<(String, u64)> {
    match state.cfg.ocr_engine {
        OcrEngine::OpenAi => {
            let c = state
                .conversation
                .model()
                .extract_image_text(bytes, image_mime(ext))
                .await?;
            Ok((c.text, c.total_tokens.unwrap_or(0)))
        }
        OcrEngine::Tesseract => Ok((ocr_tesseract(bytes, &state.cfg.ocr_lang).await?, 0)),
    }
}

pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);

    if let Err(e) = check_size(u64::from(doc.file.size), state.cfg.max_file_mb) {
        send_html(&state, chat_id, &format!("❌ {}", escape_html(&e.to_string()))).await;
        return Ok(());
    }

    let upload = ChatActionLoop::start(
        state.messenger.clone(),
        chat_id,
        ChatAction::UploadDocument,
    );
    let result = process_document(&bot, &state, user, chat_id, doc).await;
    upload.stop().await;

    if let Err(e) = result {
        report_error(&state, chat_id, "Failed to process file", e).await;
    }
    Ok(())
}

async fn process_document(
    bot: &Bot,
    state: &AppState,
    user: UserId,
    chat_id: ChatId,
    doc: &teloxide::types::Document,
) -> anyhow::Result<()> {
    let file = download_and_save(bot, state, &doc.file.id, "doc").await?;

    // The original name is more telling than Telegram's storage path.
    let ext = doc
        .file_name
        .as_deref()
        .map(file_extension)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| file.ext.clone());
    let mime = doc.mime_type.as_ref().map(|m| m.to_string());
    let kind = MediaKind::guess(&ext, mime.as_deref());
    let display_name = doc
        .file_name
        .clone()
        .unwrap_or_else(|| file.stored_name.clone());

    info!(
        user_id = user.0,
        file = %display_name,
        kind = kind.as_str(),
        size = file.bytes.len(),
        "Document received"
    );

    let base_info = format!(
        "📥 Document: <b>{}</b>\nType: <code>{}</code>\nSaved: <code>{}</code>",
        escape_html(&display_name),
        kind.as_str(),
        escape_html(&file.path.display().to_string())
    );

    let (extracted, extra_tokens) = match kind {
        MediaKind::Pdf => (extract_pdf(&file.bytes).await?, 0),
        MediaKind::Docx => {
            let bytes = file.bytes.clone();
            (
                tokio::task::spawn_blocking(move || extract_docx(&bytes)).await??,
                0,
            )
        }
        MediaKind::Image => recognize_image(state, &file.bytes, &ext).await?,
        MediaKind::Binary => {
            send_html(
                state,
                chat_id,
                &format!(
                    "{base_info}\n\nThis file type is not supported yet. Send a PDF, DOCX or image."
                ),
            )
            .await;
            return Ok(());
        }
    };

    if extracted.trim().is_empty() {
        send_html(
            state,
            chat_id,
            &format!("{base_info}\n\nNo text found or recognized."),
        )
        .await;
        return Ok(());
    }

    let typing = ChatActionLoop::start(state.messenger.clone(), chat_id, ChatAction::Typing);
    let outcome = state
        .conversation
        .ingest(
            user,
            IngestRequest {
                history_text: document_history_prompt(&display_name, &extracted),
                model_input: document_model_input(&extracted),
                system_prompt: DOCUMENT_SYSTEM_PROMPT.to_string(),
                extra_tokens,
            },
        )
        .await;
    typing.stop().await;

    send_outcome(state, chat_id, outcome?, Some(&base_info)).await;
    Ok(())
}
