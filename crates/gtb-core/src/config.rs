use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// OCR backend used for images (photos and image documents).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrEngine {
    /// Vision-capable chat model.
    OpenAi,
    /// Local `tesseract` binary.
    Tesseract,
}

impl OcrEngine {
    fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "openai" => OcrEngine::OpenAi,
            _ => OcrEngine::Tesseract,
        }
    }
}

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub allowed_users: Vec<i64>,
    pub bot_title: String,

    // Completion API
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub request_timeout: Duration,

    // Storage + quota
    pub db_path: PathBuf,
    pub daily_token_limit: u64,
    pub history_limit: Option<u32>,

    // Uploads
    pub files_dir: PathBuf,
    pub max_file_mb: u64,
    pub ocr_engine: OcrEngine,
    pub ocr_lang: String,

    // Telegram limits
    pub telegram_safe_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (the process env in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required env vars
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let openai_api_key = get("OPENAI_API_KEY").ok_or_else(|| {
            Error::Config("OPENAI_API_KEY environment variable is required".to_string())
        })?;

        let allowed_users = parse_csv_i64(get("ALLOWED_TG_IDS"));
        let bot_title = get("BOT_TITLE").unwrap_or_else(|| "ChatGPT in Telegram".to_string());

        let openai_base_url = get("OPENAI_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let model = get("OPENAI_MODEL_CHAT").unwrap_or_else(|| "gpt-4o".to_string());
        let request_timeout =
            Duration::from_secs(parse_num::<u64>(get("OPENAI_TIMEOUT_SECS")).unwrap_or(120));

        let db_path = PathBuf::from(get("BOT_DB_PATH").unwrap_or("/data/bot.sqlite".to_string()));
        let daily_token_limit = parse_num::<u64>(get("USER_DAILY_TOKENS")).unwrap_or(100_000);
        let history_limit = parse_num::<u32>(get("HISTORY_LIMIT")).filter(|n| *n > 0);

        let files_dir = PathBuf::from(get("FILES_DIR").unwrap_or("files".to_string()));
        let max_file_mb = parse_num::<u64>(get("MAX_FILE_MB")).unwrap_or(50);
        let ocr_engine = OcrEngine::parse(&get("OCR_ENGINE").unwrap_or("openai".to_string()));
        let ocr_lang = get("OCR_LANG").unwrap_or_else(|| "rus+eng".to_string());

        let telegram_safe_limit = parse_num::<usize>(get("TELEGRAM_SAFE_LIMIT"))
            .unwrap_or(4000)
            .clamp(200, 4096);

        Ok(Self {
            telegram_bot_token,
            allowed_users,
            bot_title,
            openai_api_key,
            openai_base_url,
            model,
            request_timeout,
            db_path,
            daily_token_limit,
            history_limit,
            files_dir,
            max_file_mb,
            ocr_engine,
            ocr_lang,
            telegram_safe_limit,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        out.push((key.to_string(), val.to_string()));
    }
    out
}

fn parse_num<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
    v.and_then(|s| s.trim().parse::<T>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
