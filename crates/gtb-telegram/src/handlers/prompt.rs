use std::{fmt::Display, sync::Arc, time::Duration};

use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, warn};

use gtb_core::{
    conversation::ReplyOutcome,
    domain::ChatId,
    formatting::{escape_html, render_reply_chunks},
    menus::reply_menu,
    messaging::{ChatAction, InlineKeyboard, MessagingPort},
};

use crate::router::AppState;

/// Repeats a chat action every few seconds until stopped.
pub struct ChatActionLoop {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ChatActionLoop {
    pub fn start(messenger: Arc<dyn MessagingPort>, chat_id: ChatId, action: ChatAction) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(4));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = messenger.send_chat_action(chat_id, action).await {
                            debug!(error = %e, "chat action failed");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self { stop_tx, task }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
    }
}

/// Send a model outcome: the answer split into Telegram-sized HTML chunks,
/// the reply menu on the last one. `header_html` goes in front of the answer.
pub async fn send_outcome(
    state: &AppState,
    chat_id: ChatId,
    outcome: ReplyOutcome,
    header_html: Option<&str>,
) {
    let limit = state.cfg.telegram_safe_limit;
    let chunks = match outcome {
        ReplyOutcome::QuotaExceeded(check) => {
            send_html(
                state,
                chat_id,
                &format!(
                    "❌ Daily token limit reached: {} of {} tokens used today.",
                    check.used, check.limit
                ),
            )
            .await;
            return;
        }
        ReplyOutcome::Answered { text, .. } => render_reply_chunks(&text, limit),
    };

    let chunks = prepend_header(header_html, chunks, limit);
    let last = chunks.len().saturating_sub(1);
    for (i, chunk) in chunks.iter().enumerate() {
        let res = if i == last {
            state
                .messenger
                .send_html_with_keyboard(chat_id, chunk, reply_menu())
                .await
        } else {
            state.messenger.send_html(chat_id, chunk).await
        };
        if let Err(e) = res {
            warn!(chat_id = chat_id.0, error = %e, "Failed to send answer chunk");
        }
    }
}

fn prepend_header(header_html: Option<&str>, mut chunks: Vec<String>, limit: usize) -> Vec<String> {
    let Some(header) = header_html else {
        if chunks.is_empty() {
            chunks.push("(empty answer)".to_string());
        }
        return chunks;
    };
    match chunks.first_mut() {
        Some(first) if header.len() + 2 + first.len() <= limit => {
            *first = format!("{header}\n\n{first}");
        }
        Some(_) => chunks.insert(0, header.to_string()),
        None => chunks.push(header.to_string()),
    }
    chunks
}

pub async fn send_html(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html).await {
        warn!(chat_id = chat_id.0, error = %e, "Failed to send message");
    }
}

pub async fn send_with_keyboard(
    state: &AppState,
    chat_id: ChatId,
    html: &str,
    keyboard: InlineKeyboard,
) {
    if let Err(e) = state
        .messenger
        .send_html_with_keyboard(chat_id, html, keyboard)
        .await
    {
        warn!(chat_id = chat_id.0, error = %e, "Failed to send message");
    }
}

/// Log the failure and tell the user `❌ {context}: {error}`.
pub async fn report_error(state: &AppState, chat_id: ChatId, context: &str, err: impl Display) {
    let msg_txt = err.to_string();
    warn!(chat_id = chat_id.0, error = %msg_txt, "{context}");
    let truncated = if msg_txt.chars().count() > 300 {
        format!("{}...", msg_txt.chars().take(300).collect::<String>())
    } else {
        msg_txt
    };
    send_html(
        state,
        chat_id,
        &format!("❌ {context}: <code>{}</code>", escape_html(&truncated)),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_joins_first_chunk_when_it_fits() {
        let out = prepend_header(Some("<b>h</b>"), vec!["a".to_string(), "b".to_string()], 100);
        assert_eq!(out, vec!["<b>h</b>\n\na".to_string(), "b".to_string()]);
    }

    #[test]
    fn header_gets_own_message_when_too_long() {
        let out = prepend_header(Some("hhhh"), vec!["x".repeat(10)], 12);
        assert_eq!(out, vec!["hhhh".to_string(), "x".repeat(10)]);
    }

    #[test]
    fn empty_answer_still_produces_a_message() {
        assert_eq!(prepend_header(None, Vec::new(), 100), vec!["(empty answer)".to_string()]);
        assert_eq!(prepend_header(Some("h"), Vec::new(), 100), vec!["h".to_string()]);
    }
}
