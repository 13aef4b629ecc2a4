use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use teloxide::prelude::*;
use tracing::info;

use gtb_core::{
    domain::{ChatId, ThreadId, UserId},
    ingest::save_local,
    menus::{main_menu, reply_menu},
    messaging::{ChatAction, OutgoingDocument},
};

use crate::router::AppState;

use super::{
    prompt::{report_error, send_html, send_with_keyboard},
    views,
};

const EXAMPLE_FILE_NAME: &str = "example.txt";
const EXAMPLE_FILE_TEXT: &str = "Sample file from the bot.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `/use` takes exactly one positive integer.
fn parse_thread_arg(args: &str) -> Option<ThreadId> {
    let mut parts = args.split_whitespace();
    let first = parts.next()?;
    if parts.next().is_some() || !first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    first.parse::<i64>().ok().filter(|n| *n > 0).map(ThreadId)
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let user = UserId(from.id.0 as i64);
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, args) = parse_command(text);

    info!(user_id = user.0, command = %cmd, "Command");

    match cmd.as_str() {
        "start" | "menu" | "gpt" => cmd_start(&state, chat_id, user).await,
        "new" => cmd_new(&state, chat_id, user).await,
        "chats" => cmd_chats(&state, chat_id, user).await,
        "use" => cmd_use(&state, chat_id, user, &args).await,
        "profile" => cmd_profile(&state, chat_id, user).await,
        "send_example" => cmd_send_example(&state, chat_id).await,
        "help" => send_html(&state, chat_id, views::help()).await,
        _ => {
            send_html(
                &state,
                chat_id,
                &format!("Unknown command.\n\n{}", views::help()),
            )
            .await
        }
    }

    Ok(())
}

async fn cmd_start(state: &AppState, chat_id: ChatId, user: UserId) {
    if let Err(e) = state.conversation.ensure_active_thread(user).await {
        return report_error(state, chat_id, "Storage error", e).await;
    }
    send_with_keyboard(
        state,
        chat_id,
        &views::greeting(&state.cfg.bot_title),
        main_menu(),
    )
    .await;
}

async fn cmd_new(state: &AppState, chat_id: ChatId, user: UserId) {
    match state.conversation.new_thread(user).await {
        Ok(thread) => {
            send_with_keyboard(state, chat_id, &views::thread_created(thread), reply_menu()).await
        }
        Err(e) => report_error(state, chat_id, "Storage error", e).await,
    }
}

pub(super) async fn cmd_chats(state: &AppState, chat_id: ChatId, user: UserId) {
    match state.conversation.list_threads(user).await {
        Ok(listing) => {
            let (html, keyboard) = views::thread_listing(&listing);
            send_with_keyboard(state, chat_id, &html, keyboard).await;
        }
        Err(e) => report_error(state, chat_id, "Storage error", e).await,
    }
}

pub(super) async fn switch_to(state: &AppState, chat_id: ChatId, user: UserId, thread: ThreadId) {
    match state.conversation.switch_thread(user, thread).await {
        Ok(true) => {
            send_with_keyboard(state, chat_id, &views::thread_switched(thread), reply_menu())
                .await
        }
        Ok(false) => send_with_keyboard(state, chat_id, views::NO_SUCH_THREAD, main_menu()).await,
        Err(e) => report_error(state, chat_id, "Storage error", e).await,
    }
}

async fn cmd_use(state: &AppState, chat_id: ChatId, user: UserId, args: &str) {
    match parse_thread_arg(args) {
        Some(thread) => switch_to(state, chat_id, user, thread).await,
        None => send_with_keyboard(state, chat_id, views::USE_HINT, main_menu()).await,
    }
}

async fn cmd_profile(state: &AppState, chat_id: ChatId, user: UserId) {
    match state.conversation.profile(user).await {
        Ok(p) => send_html(state, chat_id, &views::profile(&p)).await,
        Err(e) => report_error(state, chat_id, "Storage error", e).await,
    }
}

/// Overwrites the same file on every call.
async fn write_example(dir: &Path) -> gtb_core::Result<PathBuf> {
    save_local(dir, EXAMPLE_FILE_NAME, EXAMPLE_FILE_TEXT.as_bytes()).await
}

async fn cmd_send_example(state: &AppState, chat_id: ChatId) {
    let _ = state
        .messenger
        .send_chat_action(chat_id, ChatAction::UploadDocument)
        .await;

    if let Err(e) = write_example(&state.cfg.files_dir).await {
        return report_error(state, chat_id, "Failed to prepare file", e).await;
    }

    let doc = OutgoingDocument {
        file_name: EXAMPLE_FILE_NAME.to_string(),
        bytes: EXAMPLE_FILE_TEXT.as_bytes().to_vec(),
        caption: Some("Here is a sample file 📄".to_string()),
    };
    if let Err(e) = state.messenger.send_document(chat_id, doc).await {
        report_error(state, chat_id, "Failed to send file", e).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_bot_suffix_and_args() {
        assert_eq!(
            parse_command("/Use@my_gpt_bot  3 "),
            ("use".to_string(), "3".to_string())
        );
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
    }

    #[test]
    fn thread_arg_must_be_single_positive_number() {
        assert_eq!(parse_thread_arg("3"), Some(ThreadId(3)));
        assert_eq!(parse_thread_arg(" 12 "), Some(ThreadId(12)));
        assert_eq!(parse_thread_arg(""), None);
        assert_eq!(parse_thread_arg("0"), None);
        assert_eq!(parse_thread_arg("-1"), None);
        assert_eq!(parse_thread_arg("1 2"), None);
        assert_eq!(parse_thread_arg("x"), None);
    }

    #[tokio::test]
    async fn example_file_is_reused() {
        let dir = std::env::temp_dir().join(format!("gtb-example-{}", std::process::id()));
        let first = write_example(&dir).await.unwrap();
        let second = write_example(&dir).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap(), EXAMPLE_FILE_NAME);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
