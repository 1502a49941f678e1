//! Adapter for Amazon Nova models
//!
//! Request body: `{"inferenceConfig": {"max_new_tokens": n}, "messages": [...]}`.
//! Nova has no dedicated system field; the system instruction rides in a
//! leading user-role message. Response text lives at
//! `output.message.content[0].text`, usage at `usage.inputTokens` /
//! `usage.outputTokens` (camelCase, unlike the other families).

use super::{
    action_from_text, unexpected_shape, AdapterCore, AdapterError, ConversationTurn, ModelAdapter,
    ModelFamily,
};
use crate::action::{ActionSpace, ActionSpaceType, DrivingAction};
use crate::pricing::TokenUsage;
use serde_json::{json, Value};
use tracing::debug;

pub struct NovaAdapter {
    core: AdapterCore,
}

impl NovaAdapter {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            core: AdapterCore::new(model_id),
        }
    }

    /// The system instruction folded into a user-role message: prompt text
    /// first, action-space restatement as a second block.
    fn system_message(&self) -> Value {
        let (space, space_type) = match &self.core.action_space {
            Some((space, space_type)) => (json!(space), json!(space_type)),
            None => (Value::Null, Value::Null),
        };
        json!({
            "role": "user",
            "content": [
                {"text": self.core.system_prompt},
                {"text": json!({
                    "action_space_type": space_type,
                    "action_space": space,
                }).to_string()},
            ]
        })
    }

    fn response_text(&self, raw: &Value) -> Result<String, AdapterError> {
        raw["output"]["message"]["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected_shape(ModelFamily::Nova, raw))
    }
}

impl ModelAdapter for NovaAdapter {
    fn family(&self) -> ModelFamily {
        ModelFamily::Nova
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
        let mut content = vec![json!({"text": prompt})];
        if let Some(data) = image_b64 {
            content.push(json!({
                "image": {
                    "format": "jpeg",
                    "source": {"bytes": data},
                }
            }));
        }
        ConversationTurn::user(Value::Array(content))
    }

    fn build_request_payload(&self, user_turn: &ConversationTurn) -> Value {
        let mut messages = vec![self.system_message()];
        messages.extend(self.core.context.iter().map(ConversationTurn::to_message));
        messages.push(user_turn.to_message());

        json!({
            "inferenceConfig": {
                "max_new_tokens": self.core.max_output_tokens,
            },
            "messages": messages,
        })
    }

    fn consume_response(
        &mut self,
        raw: &Value,
        user_turn: ConversationTurn,
    ) -> Result<(), AdapterError> {
        let text = self.response_text(raw)?;
        let assistant = ConversationTurn::assistant(json!([{"text": text}]));
        self.core.context.push(user_turn);
        self.core.context.push(assistant);
        Ok(())
    }

    fn extract_action(&self, raw: &Value) -> Result<DrivingAction, AdapterError> {
        let text = self.response_text(raw)?;
        action_from_text(&text)
    }

    fn extract_token_usage(&self, raw: &Value) -> Result<TokenUsage, AdapterError> {
        match raw.get("usage") {
            Some(usage) => Ok(TokenUsage::new(
                usage["inputTokens"].as_u64().unwrap_or(0),
                usage["outputTokens"].as_u64().unwrap_or(0),
            )),
            None => {
                debug!("could not determine token usage from Nova response");
                Ok(TokenUsage::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DiscreteAction;

    fn adapter() -> NovaAdapter {
        NovaAdapter::new("amazon.nova-pro-v1:0")
    }

    fn response(text: &str) -> Value {
        json!({
            "output": {"message": {"role": "assistant", "content": [{"text": text}]}},
            "usage": {"inputTokens": 310, "outputTokens": 45},
        })
    }

    #[test]
    fn test_payload_shape() {
        let mut adapter = adapter();
        adapter.set_system_prompt("Drive safely.");
        adapter.set_max_output_tokens(512);
        let turn = adapter.build_user_turn("What next?", Some("QUJD"));
        let payload = adapter.build_request_payload(&turn);

        assert_eq!(payload["inferenceConfig"]["max_new_tokens"], json!(512));
        let messages = payload["messages"].as_array().unwrap();
        // folded system message, then the user turn
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], json!("user"));
        assert_eq!(messages[0]["content"][0]["text"], json!("Drive safely."));
        assert_eq!(
            messages[1]["content"][1],
            json!({"image": {"format": "jpeg", "source": {"bytes": "QUJD"}}})
        );
    }

    #[test]
    fn test_system_message_restates_action_space() {
        let mut adapter = adapter();
        adapter.set_action_space(
            ActionSpace::Discrete(vec![DiscreteAction {
                steering_angle: 0.0,
                speed: 1.0,
            }]),
            ActionSpaceType::Discrete,
        );
        let turn = adapter.build_user_turn("go", None);
        let payload = adapter.build_request_payload(&turn);
        let restated = payload["messages"][0]["content"][1]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(restated).unwrap();
        assert_eq!(parsed["action_space_type"], json!("discrete"));
        assert_eq!(parsed["action_space"][0]["speed"], json!(1.0));
    }

    #[test]
    fn test_extract_action() {
        let adapter = adapter();
        let raw = response("{\"speed\": 3.0, \"steering_angle\": 15.0, \"reasoning\": \"curve\"}");
        let action = adapter.extract_action(&raw).unwrap();
        assert_eq!(action.speed, Some(3.0));
        assert_eq!(action.reasoning.as_deref(), Some("curve"));
    }

    #[test]
    fn test_unexpected_shape_mentions_family() {
        let adapter = adapter();
        let err = adapter.extract_action(&json!({"message": "nope"})).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("Nova"));
    }

    #[test]
    fn test_camel_case_usage() {
        let adapter = adapter();
        let usage = adapter.extract_token_usage(&response("ok")).unwrap();
        assert_eq!(usage.prompt_tokens, 310);
        assert_eq!(usage.completion_tokens, 45);
    }

    #[test]
    fn test_absent_usage_is_zero() {
        let adapter = adapter();
        let raw = json!({"output": {"message": {"content": [{"text": "ok"}]}}});
        let usage = adapter.extract_token_usage(&raw).unwrap();
        assert_eq!(usage.total_tokens, 0);
    }
}
