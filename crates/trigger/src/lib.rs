//! Evaluation trigger: turns resource and policy change events into stored
//! verdicts and alert candidates.

pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod pipeline;

pub use cache::CachedPolicySource;
pub use context::TriggerContext;
pub use engine::{
    EnginePolicy, EngineResource, EvaluationRequest, EvaluationResponse, HttpPolicyEngine, PolicyEngine, PolicyError,
    ResourceResult,
};
pub use error::TriggerError;
pub use event::{classify, ChangeEvent};
pub use http::{HttpPolicySource, HttpResourceSource};
pub use pipeline::{handle_batch, BatchReport};
