use std::sync::Arc;

use tracing::info;

use gtb_core::{config::Config, conversation::ConversationService, store::Store};
use gtb_openai::OpenAiClient;

#[tokio::main]
async fn main() -> Result<(), gtb_core::Error> {
    gtb_core::logging::init("gtb")?;

    let cfg = Arc::new(Config::load()?);
    let store = Store::open(&cfg.db_path).await?;
    let model = Arc::new(OpenAiClient::from_config(&cfg)?);

    let conversation = ConversationService::new(
        store,
        model,
        cfg.daily_token_limit,
        cfg.history_limit,
    );

    info!(
        db = %cfg.db_path.display(),
        files_dir = %cfg.files_dir.display(),
        daily_tokens = cfg.daily_token_limit,
        "Starting bot"
    );

    gtb_telegram::router::run_polling(cfg, conversation)
        .await
        .map_err(|e| gtb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
