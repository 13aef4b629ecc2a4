//! Inline keyboards and the callback payloads they carry.

use crate::{
    domain::ThreadId,
    messaging::{InlineButton, InlineKeyboard},
};

pub const CB_MENU_MAIN: &str = "menu_main";
pub const CB_CHAT_MODE: &str = "chat_mode";
pub const CB_MENU_MANAGE: &str = "menu_manage";
pub const CB_MENU_PROFILE: &str = "menu_profile";
pub const CB_MENU_KB: &str = "menu_kb";
pub const CB_NEW_CHAT: &str = "new_chat";
pub const CB_LIST_CHATS: &str = "list_chats";
const CB_USE_PREFIX: &str = "use:";

/// Most recent threads offered as switch buttons under a listing.
pub const SWITCHER_MAX_BUTTONS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    /// `menu_main` and `chat_mode` both land on the greeting.
    MainMenu,
    ManageMenu,
    Profile,
    KnowledgeBase,
    NewThread,
    ListThreads,
    UseThread(ThreadId),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            CB_MENU_MAIN | CB_CHAT_MODE => Some(Self::MainMenu),
            CB_MENU_MANAGE => Some(Self::ManageMenu),
            CB_MENU_PROFILE => Some(Self::Profile),
            CB_MENU_KB => Some(Self::KnowledgeBase),
            CB_NEW_CHAT => Some(Self::NewThread),
            CB_LIST_CHATS => Some(Self::ListThreads),
            other => {
                let id = other.strip_prefix(CB_USE_PREFIX)?.parse::<i64>().ok()?;
                (id > 0).then_some(Self::UseThread(ThreadId(id)))
            }
        }
    }
}

pub fn main_menu() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![
            InlineButton::new("🆕 New chat", CB_NEW_CHAT),
            InlineButton::new("📜 My chats", CB_LIST_CHATS),
        ],
        vec![
            InlineButton::new("👤 Profile", CB_MENU_PROFILE),
            InlineButton::new("📕 Knowledge base", CB_MENU_KB),
        ],
    ])
}

pub fn manage_menu() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![
            InlineButton::new("📜 My chats", CB_LIST_CHATS),
            InlineButton::new("🆕 New chat", CB_NEW_CHAT),
        ],
        vec![InlineButton::new("⬅️ Back", CB_MENU_MAIN)],
    ])
}

/// Attached to every answer.
pub fn reply_menu() -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![
        InlineButton::new("🆕 New chat", CB_NEW_CHAT),
        InlineButton::new("📜 Chats", CB_LIST_CHATS),
    ]])
}

/// `use:<id>` buttons, four per row, for the given threads (most recent first).
pub fn thread_switcher(threads: &[ThreadId], active: Option<ThreadId>) -> InlineKeyboard {
    let buttons: Vec<InlineButton> = threads
        .iter()
        .take(SWITCHER_MAX_BUTTONS)
        .map(|id| {
            let label = if Some(*id) == active {
                format!("✅ #{id}")
            } else {
                format!("#{id}")
            };
            InlineButton::new(label, format!("{CB_USE_PREFIX}{id}"))
        })
        .collect();

    let mut rows: Vec<Vec<InlineButton>> = buttons.chunks(4).map(|c| c.to_vec()).collect();
    rows.push(vec![InlineButton::new("🆕 New chat", CB_NEW_CHAT)]);
    InlineKeyboard::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_menu_payload() {
        assert_eq!(CallbackAction::parse("menu_main"), Some(CallbackAction::MainMenu));
        assert_eq!(CallbackAction::parse("chat_mode"), Some(CallbackAction::MainMenu));
        assert_eq!(CallbackAction::parse("menu_manage"), Some(CallbackAction::ManageMenu));
        assert_eq!(CallbackAction::parse("menu_profile"), Some(CallbackAction::Profile));
        assert_eq!(CallbackAction::parse("menu_kb"), Some(CallbackAction::KnowledgeBase));
        assert_eq!(CallbackAction::parse("new_chat"), Some(CallbackAction::NewThread));
        assert_eq!(CallbackAction::parse("list_chats"), Some(CallbackAction::ListThreads));
        assert_eq!(
            CallbackAction::parse("use:12"),
            Some(CallbackAction::UseThread(ThreadId(12)))
        );
    }

    #[test]
    fn rejects_unknown_payloads() {
        assert_eq!(CallbackAction::parse("use:"), None);
        assert_eq!(CallbackAction::parse("use:abc"), None);
        assert_eq!(CallbackAction::parse("use:0"), None);
        assert_eq!(CallbackAction::parse("askuser:1:2"), None);
    }

    #[test]
    fn every_menu_button_parses() {
        for kb in [main_menu(), manage_menu(), reply_menu()] {
            for b in kb.buttons() {
                assert!(CallbackAction::parse(&b.callback_data).is_some(), "{}", b.callback_data);
            }
        }
    }

    #[test]
    fn switcher_marks_active_and_caps_buttons() {
        let ids: Vec<ThreadId> = (1..=10).rev().map(ThreadId).collect();
        let kb = thread_switcher(&ids, Some(ThreadId(9)));

        let use_buttons: Vec<_> = kb
            .buttons()
            .filter(|b| b.callback_data.starts_with("use:"))
            .collect();
        assert_eq!(use_buttons.len(), SWITCHER_MAX_BUTTONS);
        assert_eq!(use_buttons[0].callback_data, "use:10");
        assert_eq!(use_buttons[1].label, "✅ #9");
        assert_eq!(kb.rows.len(), 3);
    }
}
