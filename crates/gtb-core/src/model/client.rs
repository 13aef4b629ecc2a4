use async_trait::async_trait;

use crate::Result;

use super::types::{ChatRequest, Completion};

/// Model client interface used by the conversation service.
///
/// Implementations live in adapter crates (OpenAI HTTP today).
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, req: ChatRequest) -> Result<Completion>;

    /// Vision OCR: return the text visible on the image.
    async fn extract_image_text(&self, image: &[u8], mime: &str) -> Result<Completion>;
}
