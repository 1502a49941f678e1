//! Request orchestration
//!
//! One orchestrator drives one frame at a time: encode the image, let the
//! active adapter build the wire payload, invoke the transport under a
//! deadline, then hand the response back to the adapter for context update,
//! token accounting, and action extraction. Frames are processed
//! sequentially; `&mut self` receivers make a second in-flight request
//! unrepresentable.

use crate::action::{ActionSpace, ActionSpaceType, DrivingAction};
use crate::adapters::{
    select_adapter, AdapterError, ModelAdapter, DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_SYSTEM_PROMPT,
};
use crate::pricing::{PricingService, UsageReport, UsageTracker};
use crate::transport::{InferenceTransport, TransportError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Error string attached to synthesized fallback actions.
pub const MISSING_PARAMS_ERROR: &str = "Missing required parameters in response";

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("inference request timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Where the orchestrator is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    AwaitingResponse,
}

/// Explicit configuration threaded in at construction time; nothing here is
/// read from ambient process state.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model identifier or inference-profile ARN
    pub model_id: String,
    /// Region used for pricing lookups
    pub region: String,
    /// Transport deadline per request
    pub timeout_ms: u64,
    /// Output token budget passed to the model
    pub max_output_tokens: u32,
    pub system_prompt: String,
    /// Retained turns re-sent with each request (0 disables retention)
    pub max_context_messages: usize,
    pub action_space: Option<(ActionSpace, ActionSpaceType)>,
}

impl OrchestratorConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            region: "eu-central-1".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_context_messages: 0,
            action_space: None,
        }
    }
}

/// Owns the transport, the active adapter, and the usage counters for a
/// sequence of frames.
pub struct Orchestrator<T: InferenceTransport> {
    config: OrchestratorConfig,
    transport: T,
    pricing: PricingService,
    usage: UsageTracker,
    adapter: Box<dyn ModelAdapter>,
    target_model: String,
    state: RequestState,
    frame_count: u64,
}

impl<T: InferenceTransport> Orchestrator<T> {
    pub fn new(
        config: OrchestratorConfig,
        transport: T,
        pricing: PricingService,
    ) -> Result<Self, OrchestratorError> {
        let target_model = config.model_id.clone();
        let adapter = configured_adapter(&target_model, &config)?;
        info!(
            "orchestrator ready with {} adapter for model {}",
            adapter.family(),
            target_model
        );
        Ok(Self {
            config,
            transport,
            pricing,
            usage: UsageTracker::new(),
            adapter,
            target_model,
            state: RequestState::Idle,
            frame_count: 0,
        })
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Switch the target model; the adapter swap happens on the next
    /// `process_image` call and inherits all cached settings.
    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.target_model = model_id.into();
    }

    pub fn set_system_prompt(&mut self, prompt: &str) {
        self.config.system_prompt = prompt.to_string();
        self.adapter.set_system_prompt(prompt);
    }

    pub fn set_max_context_messages(&mut self, max_messages: usize) {
        self.config.max_context_messages = max_messages;
        self.adapter.set_max_context_messages(max_messages);
    }

    pub fn set_action_space(&mut self, space: ActionSpace, space_type: ActionSpaceType) {
        self.config.action_space = Some((space.clone(), space_type));
        self.adapter.set_action_space(space, space_type);
    }

    pub fn clear_conversation(&mut self) {
        self.adapter.clear_conversation();
    }

    /// Process one camera frame into a driving action.
    pub async fn process_image(
        &mut self,
        image: &[u8],
        prompt: &str,
    ) -> Result<DrivingAction, OrchestratorError> {
        self.frame_count += 1;
        debug!("processing frame #{}", self.frame_count);

        // Encode once; adapters receive the same base64 slice.
        let image_b64 = BASE64.encode(image);

        self.ensure_adapter()?;
        let user_turn = self.adapter.build_user_turn(prompt, Some(&image_b64));
        let payload = self.adapter.build_request_payload(&user_turn);

        self.state = RequestState::AwaitingResponse;
        let deadline = Duration::from_millis(self.config.timeout_ms);
        let invoked = tokio::time::timeout(
            deadline,
            self.transport.invoke(&self.target_model, &payload),
        )
        .await;
        self.state = RequestState::Idle;

        let raw = match invoked {
            // The in-flight call is abandoned; inference endpoints expose no
            // cancellation, so this is fire-and-forget.
            Err(_elapsed) => {
                warn!(
                    "inference request timed out after {} ms",
                    self.config.timeout_ms
                );
                return Err(OrchestratorError::Timeout(self.config.timeout_ms));
            }
            Ok(result) => result?,
        };

        self.adapter.consume_response(&raw, user_turn)?;

        let usage = self.adapter.extract_token_usage(&raw)?;
        self.usage.record(usage);

        let action = match self.adapter.extract_action(&raw) {
            Ok(action) => action,
            Err(AdapterError::MissingFields { partial }) => *partial,
            Err(e) => return Err(e.into()),
        };

        let action = if action.needs_fallback() {
            warn!("missing required driving parameters in response, substituting safe defaults");
            action.with_fallback_defaults(MISSING_PARAMS_ERROR)
        } else {
            action
        };

        Ok(match &self.config.action_space {
            Some((space, _)) => space.normalize(action),
            None => action,
        })
    }

    /// Cumulative token totals with the current pricing applied.
    pub fn token_usage(&self) -> UsageReport {
        let usage = self.usage.totals();
        let cost = self
            .pricing
            .calculate_cost(usage.prompt_tokens, usage.completion_tokens);
        UsageReport {
            usage,
            pricing: self.pricing.get_pricing(),
            estimated_cost: cost.total_cost,
        }
    }

    /// Refresh pricing rates for the current target model.
    pub async fn load_pricing(&mut self) {
        self.pricing
            .load_model_pricing(&self.target_model, &self.config.region)
            .await;
    }

    /// Clear the conversation and frame counter; optionally zero the token
    /// counters as well.
    pub fn reset(&mut self, reset_tokens: bool) {
        self.adapter.clear_conversation();
        self.frame_count = 0;
        if reset_tokens {
            self.usage.reset();
            info!("orchestrator reset (including token counts)");
        } else {
            info!("orchestrator reset");
        }
    }

    /// Swap the adapter when the target model changed since the last call,
    /// carrying the cached settings onto the new instance.
    fn ensure_adapter(&mut self) -> Result<(), OrchestratorError> {
        if self.adapter.model_id() == self.target_model {
            return Ok(());
        }
        let adapter = configured_adapter(&self.target_model, &self.config)?;
        info!(
            "switched to {} adapter for model {}",
            adapter.family(),
            self.target_model
        );
        self.adapter = adapter;
        Ok(())
    }
}

fn configured_adapter(
    model_id: &str,
    config: &OrchestratorConfig,
) -> Result<Box<dyn ModelAdapter>, OrchestratorError> {
    let mut adapter = select_adapter(model_id)?;
    adapter.set_system_prompt(&config.system_prompt);
    adapter.set_max_context_messages(config.max_context_messages);
    adapter.set_max_output_tokens(config.max_output_tokens);
    if let Some((space, space_type)) = &config.action_space {
        adapter.set_action_space(space.clone(), *space_type);
    }
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::TokenUsage;
    use crate::transport::PricingSource;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    struct NullPricingSource;

    #[async_trait]
    impl PricingSource for NullPricingSource {
        async fn fetch_products(
            &self,
            _service_code: &str,
            _model_name: &str,
            _region: &str,
        ) -> Result<Vec<Value>, TransportError> {
            Ok(Vec::new())
        }
    }

    /// Canned-response transport that records every payload it receives.
    struct MockTransport {
        responses: Mutex<Vec<Value>>,
        payloads: Arc<Mutex<Vec<Value>>>,
        delay: Option<Duration>,
    }

    impl MockTransport {
        fn new(responses: Vec<Value>) -> (Self, Arc<Mutex<Vec<Value>>>) {
            let payloads = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    responses: Mutex::new(responses),
                    payloads: Arc::clone(&payloads),
                    delay: None,
                },
                payloads,
            )
        }

        fn slow(response: Value, delay: Duration) -> Self {
            Self {
                responses: Mutex::new(vec![response]),
                payloads: Arc::new(Mutex::new(Vec::new())),
                delay: Some(delay),
            }
        }
    }

    #[async_trait]
    impl InferenceTransport for MockTransport {
        async fn invoke(&self, _model_id: &str, body: &Value) -> Result<Value, TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.payloads.lock().unwrap().push(body.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TransportError::Endpoint {
                    status: 500,
                    message: "no canned response".to_string(),
                });
            }
            Ok(responses.remove(0))
        }
    }

    fn claude_response(text: &str) -> Value {
        json!({
            "content": [{"type": "text", "text": text}],
            "usage": {"input_tokens": 100, "output_tokens": 25},
        })
    }

    fn orchestrator(
        config: OrchestratorConfig,
        transport: MockTransport,
    ) -> Orchestrator<MockTransport> {
        Orchestrator::new(config, transport, PricingService::new(NullPricingSource)).unwrap()
    }

    #[tokio::test]
    async fn test_complete_action_passes_through() {
        let (transport, _) = MockTransport::new(vec![claude_response(
            "{\"speed\": 2.0, \"steering_angle\": -10.0, \"reasoning\": \"left curve\"}",
        )]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );

        let action = orch.process_image(b"jpegbytes", "drive").await.unwrap();
        assert_eq!(action.speed, Some(2.0));
        assert_eq!(action.steering_angle, Some(-10.0));
        assert!(!action.fallback);
    }

    #[tokio::test]
    async fn test_missing_fields_become_fallback() {
        let (transport, _) = MockTransport::new(vec![claude_response(
            "{\"reasoning\": \"unsure about the track\"}",
        )]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );

        let action = orch.process_image(b"jpegbytes", "drive").await.unwrap();
        assert_eq!(action.speed, Some(1.0));
        assert_eq!(action.steering_angle, Some(0.0));
        assert!(action.fallback);
        assert_eq!(action.error.as_deref(), Some(MISSING_PARAMS_ERROR));
        assert_eq!(action.reasoning.as_deref(), Some("unsure about the track"));
    }

    #[tokio::test]
    async fn test_no_json_propagates() {
        let (transport, _) =
            MockTransport::new(vec![claude_response("I would rather describe the scenery.")]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );

        let err = orch.process_image(b"jpegbytes", "drive").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Adapter(AdapterError::NoJsonFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_surfaces() {
        let transport = MockTransport::slow(claude_response("{}"), Duration::from_millis(200));
        let mut config = OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0");
        config.timeout_ms = 10;
        let mut orch = orchestrator(config, transport);

        let err = orch.process_image(b"jpegbytes", "drive").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(10)));
        assert_eq!(orch.state(), RequestState::Idle);
    }

    #[tokio::test]
    async fn test_context_window_scenario() {
        // Three frames at capacity 2: the third payload must carry exactly
        // the two most recent retained turns before the new user turn.
        let responses: Vec<Value> = (1..=3)
            .map(|n| claude_response(&format!("{{\"speed\": {n}.0, \"steering_angle\": 0.5}}")))
            .collect();
        let (transport, payloads) = MockTransport::new(responses);
        let mut config = OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0");
        config.max_context_messages = 2;
        let mut orch = orchestrator(config, transport);

        for n in 1..=3 {
            orch.process_image(b"jpegbytes", &format!("frame {n}"))
                .await
                .unwrap();
        }

        let payloads = payloads.lock().unwrap();
        let third = payloads[2]["messages"].as_array().unwrap().to_vec();
        assert_eq!(third.len(), 3);
        // Retained pair from frame 2, then the new user turn for frame 3.
        assert_eq!(third[0]["role"], json!("user"));
        assert_eq!(third[0]["content"][0]["text"], json!("frame 2"));
        assert_eq!(third[1]["role"], json!("assistant"));
        assert_eq!(
            third[1]["content"][0]["text"],
            json!("{\"speed\": 2.0, \"steering_angle\": 0.5}")
        );
        assert_eq!(third[2]["content"][0]["text"], json!("frame 3"));
    }

    #[tokio::test]
    async fn test_usage_accumulates_and_resets() {
        let (transport, _) = MockTransport::new(vec![
            claude_response("{\"speed\": 1.0, \"steering_angle\": 0.5}"),
            claude_response("{\"speed\": 1.0, \"steering_angle\": 0.5}"),
        ]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );

        orch.process_image(b"a", "one").await.unwrap();
        orch.process_image(b"b", "two").await.unwrap();

        let report = orch.token_usage();
        assert_eq!(report.usage.prompt_tokens, 200);
        assert_eq!(report.usage.completion_tokens, 50);
        // Re-reading changes nothing.
        assert_eq!(orch.token_usage().usage, report.usage);
        let expected = 200.0 * 0.002 / 1000.0 + 50.0 * 0.006 / 1000.0;
        assert!((report.estimated_cost - expected).abs() < 1e-12);

        orch.reset(true);
        assert_eq!(orch.token_usage().usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_model_swap_carries_settings() {
        let nova_response = json!({
            "output": {"message": {"content": [{"text": "{\"speed\": 1.5, \"steering_angle\": 3.0}"}]}},
            "usage": {"inputTokens": 80, "outputTokens": 10},
        });
        let (transport, payloads) = MockTransport::new(vec![
            claude_response("{\"speed\": 1.0, \"steering_angle\": 0.5}"),
            nova_response,
        ]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );
        orch.set_system_prompt("Stay on the track.");
        orch.set_max_context_messages(4);

        orch.process_image(b"a", "one").await.unwrap();

        orch.set_model("amazon.nova-pro-v1:0");
        let action = orch.process_image(b"b", "two").await.unwrap();
        assert_eq!(action.speed, Some(1.5));

        let payloads = payloads.lock().unwrap();
        // The second payload is Nova-shaped and inherits the system prompt.
        assert_eq!(
            payloads[1]["messages"][0]["content"][0]["text"],
            json!("Stay on the track.")
        );
        assert!(payloads[1]["inferenceConfig"]["max_new_tokens"].is_u64());
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let (transport, _) = MockTransport::new(vec![]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0"),
            transport,
        );
        let err = orch.process_image(b"a", "one").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Transport(TransportError::Endpoint { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_action_space_normalizes_result() {
        use crate::action::{ContinuousActionSpace, ContinuousRange};
        let (transport, _) = MockTransport::new(vec![claude_response(
            "{\"speed\": 9.0, \"steering_angle\": -50.0}",
        )]);
        let mut config = OrchestratorConfig::new("anthropic.claude-3-sonnet-20240229-v1:0");
        config.action_space = Some((
            ActionSpace::Continuous(ContinuousActionSpace {
                speed: ContinuousRange { low: 0.5, high: 4.0 },
                steering_angle: ContinuousRange {
                    low: -30.0,
                    high: 30.0,
                },
            }),
            ActionSpaceType::Continuous,
        ));
        let mut orch = orchestrator(config, transport);

        let action = orch.process_image(b"a", "one").await.unwrap();
        assert_eq!(action.speed, Some(4.0));
        assert_eq!(action.steering_angle, Some(-30.0));
    }

    #[test]
    fn test_unknown_model_fails_construction() {
        let (transport, _) = MockTransport::new(vec![]);
        let result = Orchestrator::new(
            OrchestratorConfig::new("cohere.command-r-v1:0"),
            transport,
            PricingService::new(NullPricingSource),
        );
        assert!(matches!(
            result,
            Err(OrchestratorError::Adapter(AdapterError::UnsupportedModel(_)))
        ));
    }

    #[tokio::test]
    async fn test_total_only_usage_split() {
        let (transport, payloads) = MockTransport::new(vec![json!({
            "choices": [{"message": {"content": "{\"speed\": 1.0, \"steering_angle\": 0.5}"}}],
            "usage": {"total_tokens": 90},
        })]);
        let mut orch = orchestrator(
            OrchestratorConfig::new("mistral.pixtral-large-2502-v1:0"),
            transport,
        );
        orch.process_image(b"a", "one").await.unwrap();

        let payloads = payloads.lock().unwrap();
        assert_eq!(payloads[0]["messages"][0]["role"], json!("system"));

        // Total-only usage was split by the documented heuristic.
        let report = orch.token_usage();
        assert_eq!(report.usage.total_tokens, 90);
        assert_eq!(report.usage.prompt_tokens, 60);
    }
}
