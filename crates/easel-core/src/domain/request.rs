//! GenerationRequest - receiver と worker の間を流れる唯一の単位
//!
//! Dispatch Queue の message body はこの型の JSON 表現です:
//! `{"channel_id": "...", "input_text": "..."}`

use serde::Deserialize;

use super::errors::InvalidInput;

/// A validated unit of work.
///
/// Fields are private so an invalid request (empty channel, blank prompt)
/// cannot be constructed outside of [`GenerationRequest::new`] or
/// [`GenerationRequest::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    conversation_id: String,
    prompt: String,
}

/// Wire shape before validation. Both fields may be missing.
#[derive(Debug, Deserialize)]
struct RawRequest {
    channel_id: Option<String>,
    input_text: Option<String>,
}

impl GenerationRequest {
    /// Build a request, trimming the prompt.
    pub fn new(
        conversation_id: impl Into<String>,
        prompt: impl AsRef<str>,
    ) -> Result<Self, InvalidInput> {
        let conversation_id = conversation_id.into();
        if conversation_id.trim().is_empty() {
            return Err(InvalidInput::MissingConversation);
        }
        let prompt = prompt.as_ref().trim();
        if prompt.is_empty() {
            return Err(InvalidInput::EmptyPrompt);
        }
        Ok(Self {
            conversation_id,
            prompt: prompt.to_string(),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Serialize into a queue message body.
    pub fn encode(&self) -> String {
        serde_json::json!({
            "channel_id": self.conversation_id,
            "input_text": self.prompt,
        })
        .to_string()
    }

    /// Parse a queue message body.
    ///
    /// `channel_id` と `input_text` のどちらかが欠けていれば InvalidInput。
    pub fn decode(body: &str) -> Result<Self, InvalidInput> {
        let raw: RawRequest =
            serde_json::from_str(body).map_err(|e| InvalidInput::Malformed(e.to_string()))?;
        let conversation_id = raw.channel_id.ok_or(InvalidInput::MissingConversation)?;
        let prompt = raw.input_text.ok_or(InvalidInput::MissingPrompt)?;
        Self::new(conversation_id, prompt)
    }
}
