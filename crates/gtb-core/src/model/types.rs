use crate::domain::ChatMessage;

/// Normalized request for a single completion.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// System prompt followed by the conversation turns.
    pub fn with_system(system_prompt: &str, turns: Vec<ChatMessage>) -> Self {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(turns);
        Self { messages }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// Provider-reported `total_tokens`, when present.
    pub total_tokens: Option<u64>,
}
