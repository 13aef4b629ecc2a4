use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use gtb_core::{config::Config, conversation::ConversationService, messaging::MessagingPort};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub conversation: ConversationService,
    pub messenger: Arc<dyn MessagingPort>,
}

pub async fn run_polling(
    cfg: Arc<Config>,
    conversation: ConversationService,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "Bot started"),
        Err(e) => warn!(error = %e, "getMe failed; continuing with polling"),
    }
    info!(
        allowed_users = cfg.allowed_users.len(),
        model = %conversation.model().model_name(),
        ocr_engine = ?cfg.ocr_engine,
        "Configuration loaded"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        cfg,
        conversation,
        messenger,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    info!("Polling stopped");
    Ok(())
}
