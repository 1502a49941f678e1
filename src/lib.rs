//! llmpilot - Driving decisions from camera frames via multimodal LLMs
//!
//! This library turns a single camera frame plus a prompt into a structured
//! driving action by calling a cloud-hosted model inference endpoint.
//!
//! ## Key Features
//!
//! - **Model Adapters**: Three incompatible model families (Claude, Mistral,
//!   Nova) behind one capability interface, selected from the model identifier
//! - **Rolling Context**: Bounded per-adapter conversation windows for frame
//!   continuity
//! - **Graceful Degradation**: Malformed model output becomes a flagged safe
//!   fallback action instead of halting the control loop
//! - **Cost Tracking**: Cumulative token accounting with catalog-backed
//!   pricing and static fallbacks

pub mod action;
pub mod adapters;
pub mod config;
pub mod extract;
pub mod orchestrator;
pub mod pricing;
pub mod transport;

pub use action::{
    ActionSpace, ActionSpaceType, ContinuousActionSpace, ContinuousRange, DiscreteAction,
    DrivingAction,
};
pub use adapters::{
    select_adapter, AdapterError, ClaudeAdapter, ContextWindow, ConversationTurn, MistralAdapter,
    ModelAdapter, ModelFamily, NovaAdapter, Role,
};
pub use config::{ConfigBuilder, ConfigError, PilotConfig};
pub use extract::{extract_json, ExtractError};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, RequestState, MISSING_PARAMS_ERROR,
};
pub use pricing::{
    CostBreakdown, PricingService, TokenPricing, TokenUsage, UsageReport, UsageTracker,
};
pub use transport::{
    HttpInferenceTransport, HttpPricingSource, InferenceTransport, PricingSource, TransportError,
};
