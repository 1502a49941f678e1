//! Model family adapters
//!
//! Three unrelated model families sit behind the same inference endpoint,
//! each with its own request schema, response schema, and token accounting.
//! One adapter per family implements the common [`ModelAdapter`] capability
//! set; [`select_adapter`] picks the variant from the model identifier.

mod claude;
mod conversation;
mod mistral;
mod nova;

pub use claude::ClaudeAdapter;
pub use conversation::{ContextWindow, ConversationTurn, Role};
pub use mistral::MistralAdapter;
pub use nova::NovaAdapter;

use crate::action::{ActionSpace, ActionSpaceType, DrivingAction};
use crate::extract::{extract_json, ExtractError};
use crate::pricing::TokenUsage;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI driver assistant.";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1000;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error(transparent)]
    NoJsonFound(#[from] ExtractError),

    #[error("model response is missing required driving parameters")]
    MissingFields { partial: Box<DrivingAction> },

    #[error("unexpected {family} response structure: {snippet}")]
    UnexpectedShape { family: ModelFamily, snippet: String },

    #[error("unsupported model type: {0}")]
    UnsupportedModel(String),

    #[error("failed to decode driving action: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The supported model lineages. Classification backs both adapter selection
/// and pricing-name resolution so the two can never disagree on a new
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Claude,
    Mistral,
    Nova,
}

impl ModelFamily {
    /// Classify a model identifier by its family marker.
    ///
    /// Identifiers may be bare model ids (`anthropic.claude-3-sonnet-...`) or
    /// ARN-like inference-profile paths where the marker sits after the last
    /// path segment.
    pub fn classify(model_id: &str) -> Option<Self> {
        let marker = base_model_name(model_id).to_ascii_lowercase();
        if marker.contains("anthropic") || marker.contains("claude") {
            Some(ModelFamily::Claude)
        } else if marker.contains("mistral") || marker.contains("pixtral") {
            Some(ModelFamily::Mistral)
        } else if marker.contains("amazon") || marker.contains("nova") {
            Some(ModelFamily::Nova)
        } else {
            None
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Claude => write!(f, "Claude"),
            ModelFamily::Mistral => write!(f, "Mistral"),
            ModelFamily::Nova => write!(f, "Nova"),
        }
    }
}

/// Strip an ARN-like prefix from a model identifier: the model name is the
/// last path segment, minus any `:revision` suffix. Bare identifiers pass
/// through unchanged.
pub(crate) fn base_model_name(model_id: &str) -> &str {
    if !model_id.starts_with("arn:") {
        return model_id;
    }
    let tail = model_id.rsplit('/').next().unwrap_or(model_id);
    tail.split(':').next().unwrap_or(tail)
}

/// Common capability set implemented once per model family.
///
/// Adapters are pure protocol translators: they build payloads, interpret
/// responses, and maintain their own rolling context buffer. They never talk
/// to the network and never retry; every failure is a typed error for the
/// orchestrator to act on.
pub trait ModelAdapter: Send {
    fn family(&self) -> ModelFamily;

    fn model_id(&self) -> &str;

    fn set_system_prompt(&mut self, prompt: &str);

    fn set_max_context_messages(&mut self, max_messages: usize);

    fn set_max_output_tokens(&mut self, max_tokens: u32);

    fn set_action_space(&mut self, space: ActionSpace, space_type: ActionSpaceType);

    fn clear_conversation(&mut self);

    fn context_len(&self) -> usize;

    /// Build the new user turn in this family's content shape. Pure.
    fn build_user_turn(&self, prompt: &str, image_b64: Option<&str>) -> ConversationTurn;

    /// Assemble the full wire body: system instruction, action-space
    /// restatement, retained context, and the new user turn.
    fn build_request_payload(&self, user_turn: &ConversationTurn) -> Value;

    /// Derive the assistant turn from a successful response and append the
    /// `(user, assistant)` pair to the context buffer.
    fn consume_response(
        &mut self,
        raw: &Value,
        user_turn: ConversationTurn,
    ) -> Result<(), AdapterError>;

    /// Pull the driving action out of the family-specific response text.
    /// Missing required fields are reported, never defaulted here.
    fn extract_action(&self, raw: &Value) -> Result<DrivingAction, AdapterError>;

    /// Family-specific token accounting.
    fn extract_token_usage(&self, raw: &Value) -> Result<TokenUsage, AdapterError>;
}

/// Select the adapter variant for a model identifier.
///
/// An unrecognized identifier is an error: guessing a wire protocol would
/// send a malformed body to a live endpoint.
pub fn select_adapter(model_id: &str) -> Result<Box<dyn ModelAdapter>, AdapterError> {
    match ModelFamily::classify(model_id) {
        Some(ModelFamily::Claude) => Ok(Box::new(ClaudeAdapter::new(model_id))),
        Some(ModelFamily::Mistral) => Ok(Box::new(MistralAdapter::new(model_id))),
        Some(ModelFamily::Nova) => Ok(Box::new(NovaAdapter::new(model_id))),
        None => Err(AdapterError::UnsupportedModel(model_id.to_string())),
    }
}

/// Configuration and context state every adapter variant carries.
///
/// Held by composition, not inheritance: each variant owns its core outright
/// and nothing is shared between instances.
#[derive(Debug)]
pub(crate) struct AdapterCore {
    pub model_id: String,
    pub system_prompt: String,
    pub max_output_tokens: u32,
    pub action_space: Option<(ActionSpace, ActionSpaceType)>,
    pub context: ContextWindow,
}

impl AdapterCore {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            action_space: None,
            context: ContextWindow::default(),
        }
    }

    /// Machine-readable action-space restatement, appended to the system
    /// instruction so the model knows its valid output ranges.
    pub fn action_space_text(&self) -> Option<String> {
        self.action_space.as_ref().map(|(space, space_type)| {
            format!(
                "Action space type: {}\nAction space: {}",
                space_type,
                serde_json::to_string(space).unwrap_or_default()
            )
        })
    }

    /// System prompt with the action-space restatement folded in.
    pub fn system_text(&self) -> String {
        match self.action_space_text() {
            Some(spaces) => format!("{}\n\n{}", self.system_prompt, spaces),
            None => self.system_prompt.clone(),
        }
    }
}

/// Parse a driving action from response text, reporting partial results so
/// the orchestrator can degrade gracefully.
pub(crate) fn action_from_text(text: &str) -> Result<DrivingAction, AdapterError> {
    let value = extract_json(text)?;
    let action = DrivingAction::from_value(value)?;
    if action.is_complete() {
        Ok(action)
    } else {
        Err(AdapterError::MissingFields {
            partial: Box::new(action),
        })
    }
}

/// Truncated raw-response snippet for shape-mismatch diagnostics.
pub(crate) fn response_snippet(raw: &Value) -> String {
    let mut rendered = raw.to_string();
    if rendered.len() > 200 {
        rendered.truncate(200);
        rendered.push_str("...");
    }
    rendered
}

pub(crate) fn unexpected_shape(family: ModelFamily, raw: &Value) -> AdapterError {
    AdapterError::UnexpectedShape {
        family,
        snippet: response_snippet(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bare_identifiers() {
        assert_eq!(
            ModelFamily::classify("anthropic.claude-3-sonnet-20240229-v1:0"),
            Some(ModelFamily::Claude)
        );
        assert_eq!(
            ModelFamily::classify("mistral.pixtral-large-2502-v1:0"),
            Some(ModelFamily::Mistral)
        );
        assert_eq!(
            ModelFamily::classify("amazon.nova-pro-v1:0"),
            Some(ModelFamily::Nova)
        );
    }

    #[test]
    fn test_classify_arn_identifier() {
        let arn = "arn:aws:bedrock:eu-central-1:123456789012:inference-profile/eu.anthropic.claude-3-sonnet-20240229-v1:0";
        assert_eq!(ModelFamily::classify(arn), Some(ModelFamily::Claude));
        assert_eq!(
            base_model_name(arn),
            "eu.anthropic.claude-3-sonnet-20240229-v1"
        );
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(ModelFamily::classify("meta.llama3-70b-instruct-v1:0"), None);
    }

    #[test]
    fn test_factory_selects_by_family() {
        let adapter = select_adapter("amazon.nova-lite-v1:0").unwrap();
        assert_eq!(adapter.family(), ModelFamily::Nova);

        let adapter = select_adapter("mistral.mistral-large-2407-v1:0").unwrap();
        assert_eq!(adapter.family(), ModelFamily::Mistral);
    }

    #[test]
    fn test_factory_rejects_unknown_family() {
        assert!(matches!(
            select_adapter("cohere.command-r-v1:0"),
            Err(AdapterError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_action_from_text_reports_partial() {
        let err = action_from_text("{\"speed\": 2.0, \"reasoning\": \"straight\"}").unwrap_err();
        match err {
            AdapterError::MissingFields { partial } => {
                assert_eq!(partial.speed, Some(2.0));
                assert_eq!(partial.reasoning.as_deref(), Some("straight"));
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn test_action_from_text_complete() {
        let action = action_from_text("{\"speed\": 2.0, \"steering_angle\": -5.0}").unwrap();
        assert_eq!(action.steering_angle, Some(-5.0));
    }
}
