//! Adapter for Anthropic Claude models
//!
//! Request body: `{"system": ..., "messages": [...], "max_tokens": n}` with
//! content-block messages and inline base64 image blocks. Response text lives
//! at `content[0].text`, usage at `usage.input_tokens` / `usage.output_tokens`.

use super::{
    action_from_text, unexpected_shape, AdapterCore, AdapterError, ConversationTurn, ModelAdapter,
    ModelFamily,
};
use crate::action::{ActionSpace, ActionSpaceType, DrivingAction};
use crate::pricing::TokenUsage;
use serde_json::{json, Value};

pub struct ClaudeAdapter {
    core: AdapterCore,
}

impl ClaudeAdapter {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            core: AdapterCore::new(model_id),
        }
    }

    fn response_text(&self, raw: &Value) -> Result<String, AdapterError> {
        raw["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected_shape(ModelFamily::Claude, raw))
    }
}

impl ModelAdapter for ClaudeAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Claude
    }

    fn model_id(&self) -> &str {
        &self.core.model_id
    }

    fn set_system_prompt(&mut self, prompt: &str) {
        self.core.system_prompt = prompt.to_string();
    }

    fn set_max_context_messages(&mut self, max_messages: usize) {
        self.core.context.set_capacity(max_messages);
    }

    fn set_max_output_tokens(&mut self, max_tokens: u32) {
        self.core.max_output_tokens = max_tokens;
    }

    fn set_action_space(&mut self, space: ActionSpace, space_type: ActionSpaceType) {
        self.core.action_space = Some((space, space_type));
    }

    fn clear_conversation(&mut self) {
        self.core.context.clear();
    }

    fn context_len(&self) -> usize {
        self.core.context.len()
    }

    fn build_user_turn(&self, prompt: &str, image_b64: Option<&str>) -> ConversationTurn {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        if let Some(data) = image_b64 {
            content.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": "image/jpeg",
                    "data": data,
                }
            }));
        }
        ConversationTurn::user(Value::Array(content))
    }

    fn build_request_payload(&self, user_turn: &ConversationTurn) -> Value {
        let mut messages: Vec<Value> = self
            .core
            .context
            .iter()
            .map(ConversationTurn::to_message)
            .collect();
        messages.push(user_turn.to_message());

        json!({
            "system": self.core.system_text(),
            "messages": messages,
            "max_tokens": self.core.max_output_tokens,
        })
    }

    fn consume_response(
        &mut self,
        raw: &Value,
        user_turn: ConversationTurn,
    ) -> Result<(), AdapterError> {
        let text = self.response_text(raw)?;
        let assistant = ConversationTurn::assistant(json!([{"type": "text", "text": text}]));
        self.core.context.push(user_turn);
        self.core.context.push(assistant);
        Ok(())
    }

    fn extract_action(&self, raw: &Value) -> Result<DrivingAction, AdapterError> {
        let text = self.response_text(raw)?;
        action_from_text(&text)
    }

    fn extract_token_usage(&self, raw: &Value) -> Result<TokenUsage, AdapterError> {
        let usage = &raw["usage"];
        Ok(TokenUsage::new(
            usage["input_tokens"].as_u64().unwrap_or(0),
            usage["output_tokens"].as_u64().unwrap_or(0),
        ))
    }
}
