/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so handlers can
/// turn any failure into a short user-facing message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("file is larger than {limit_mb} MB ({size} bytes)")]
    FileTooLarge { size: u64, limit_mb: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
