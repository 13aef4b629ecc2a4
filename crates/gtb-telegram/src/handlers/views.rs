//! HTML screens shared by commands and menu callbacks.

use gtb_core::{
    conversation::{Profile, ThreadListing},
    domain::ThreadId,
    formatting::{escape_html, format_thread_line},
    menus::{main_menu, thread_switcher},
    messaging::InlineKeyboard,
};

/// Newest threads shown in a listing; older ones are summarized.
const LISTING_MAX_LINES: usize = 40;

pub const UNAUTHORIZED: &str = "🚫 Access restricted. Contact the administrator.";
pub const USE_HINT: &str = "Usage: <code>/use &lt;number&gt;</code>";
pub const NO_SUCH_THREAD: &str = "❌ No such chat.";
pub const MANAGE_TITLE: &str = "🤖 Manage:";
pub const KNOWLEDGE_BASE: &str = "📕 The knowledge base is not connected yet.\n\
You will be able to upload regulations or FAQs and search them later.";

pub fn greeting(bot_title: &str) -> String {
    format!(
        "👋 Hi! I'm <b>{}</b>.\nAsk a question or use the menu below.",
        escape_html(bot_title)
    )
}

pub fn help() -> &'static str {
    "Commands:\n\
     /start, /menu, /gpt - main menu\n\
     /new - start a new chat\n\
     /chats - list your chats\n\
     /use &lt;number&gt; - switch to a chat\n\
     /profile - model and token usage\n\
     /send_example - receive a sample file\n\n\
     Send text, a PDF, a DOCX or a photo to talk to the model."
}

pub fn thread_created(thread: ThreadId) -> String {
    format!("🆕 Created new chat <b>#{thread}</b>. Send a message.")
}

pub fn thread_switched(thread: ThreadId) -> String {
    format!("✅ Switched to chat <b>#{thread}</b>.")
}

pub fn profile(p: &Profile) -> String {
    format!(
        "👤 <b>Profile</b>\n\
         • Model: <code>{}</code>\n\
         • Daily limit: <b>{}</b> tokens\n\
         • Used today: <b>{}</b> tokens",
        escape_html(&p.model),
        p.daily_limit,
        p.used_today
    )
}

/// The chat listing plus its keyboard (switcher, or the main menu when empty).
pub fn thread_listing(listing: &ThreadListing) -> (String, InlineKeyboard) {
    if listing.threads.is_empty() {
        return (
            "No chats yet. Press <b>New chat</b>.".to_string(),
            main_menu(),
        );
    }

    let mut lines = vec!["📜 <b>Your chats:</b>".to_string()];
    for t in listing.threads.iter().take(LISTING_MAX_LINES) {
        lines.push(format_thread_line(t, Some(t.id) == listing.active));
    }
    let hidden = listing.threads.len().saturating_sub(LISTING_MAX_LINES);
    if hidden > 0 {
        lines.push(format!("… and {hidden} older"));
    }
    lines.push(String::new());
    lines.push(format!("Switch: {USE_HINT}"));

    let ids: Vec<ThreadId> = listing.threads.iter().map(|t| t.id).collect();
    (lines.join("\n"), thread_switcher(&ids, listing.active))
}
