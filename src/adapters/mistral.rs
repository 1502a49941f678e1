//! Adapter for Mistral chat models (Pixtral for vision)
//!
//! Request body: `{"messages": [{"role": "system", ...}, ...], "max_tokens": n}`
//! with data-URL image references. Response text lives at
//! `choices[0].message.content`. Token accounting usually reports a
//! prompt/completion split, but some responses carry only `total_tokens`.

use super::{
    action_from_text, unexpected_shape, AdapterCore, AdapterError, ConversationTurn, ModelAdapter,
    ModelFamily,
};
use crate::action::{ActionSpace, ActionSpaceType, DrivingAction};
use crate::pricing::TokenUsage;
use serde_json::{json, Value};

pub struct MistralAdapter {
    core: AdapterCore,
}

impl MistralAdapter {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            core: AdapterCore::new(model_id),
        }
    }

    fn response_text(&self, raw: &Value) -> Result<String, AdapterError> {
        raw["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected_shape(ModelFamily::Mistral, raw))
    }
}

impl ModelAdapter for MistralAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Mistral
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
                "type": "image_url",
                "image_url": {"url": format!("data:image/jpeg;base64,{data}")}
            }));
        }
        ConversationTurn::user(Value::Array(content))
    }

    fn build_request_payload(&self, user_turn: &ConversationTurn) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": self.core.system_text(),
        })];
        messages.extend(self.core.context.iter().map(ConversationTurn::to_message));
        messages.push(user_turn.to_message());

        json!({
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
        let assistant = ConversationTurn::assistant(Value::String(text));
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
        match (
            usage["prompt_tokens"].as_u64(),
            usage["completion_tokens"].as_u64(),
        ) {
            (Some(prompt), Some(completion)) => Ok(TokenUsage::new(prompt, completion)),
            (prompt, completion) => match usage["total_tokens"].as_u64() {
                Some(total) => Ok(TokenUsage::from_total_estimate(total)),
                None => Ok(TokenUsage::new(
                    prompt.unwrap_or(0),
                    completion.unwrap_or(0),
                )),
            },
        }
    }
}
