//! OpenAI adapter (Chat Completions, including vision OCR).
//!
//! Implements `gtb_core::model::ChatModel` over `POST {base}/chat/completions`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, info};

use gtb_core::{
    config::Config,
    errors::Error,
    model::{ChatModel, ChatRequest, Completion},
    Result,
};

const OCR_INSTRUCTION: &str = "Extract all text from the image. Keep lines and order. No comments.";

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("openai client build error: {e}")))?;
        let client = Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
        };
        info!(
            base_url = %client.base_url,
            model = %client.model,
            api_key = %mask_token(&client.api_key),
            "OpenAI client ready"
        );
        Ok(client)
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.openai_api_key.clone(),
            cfg.openai_base_url.clone(),
            cfg.model.clone(),
            cfg.request_timeout,
        )
    }

    async fn chat_completion(&self, messages: Value) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::External(format!("openai request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "openai chat completion failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("openai json error: {e}")))?;
        let completion = parse_completion(&v)?;
        debug!(total_tokens = ?completion.total_tokens, "OpenAI completion received");
        Ok(completion)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: ChatRequest) -> Result<Completion> {
        let messages = serde_json::to_value(&req.messages)?;
        self.chat_completion(messages).await
    }

    async fn extract_image_text(&self, image: &[u8], mime: &str) -> Result<Completion> {
        let messages = json!([{
            "role": "user",
            "content": [
                { "type": "text", "text": OCR_INSTRUCTION },
                { "type": "image_url", "image_url": { "url": data_url(image, mime) } },
            ],
        }]);
        self.chat_completion(messages).await
    }
}

fn data_url(image: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(image))
}

/// `choices[0].message.content` plus `usage.total_tokens` when reported.
fn parse_completion(v: &Value) -> Result<Completion> {
    let choice = v
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::External("openai response has no choices".to_string()))?;
    let text = choice
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();
    let total_tokens = v.pointer("/usage/total_tokens").and_then(|t| t.as_u64());
    Ok(Completion { text, total_tokens })
}

/// Mask an API key for logs: first 7 + `***` + last 4; short keys become `***`.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}
