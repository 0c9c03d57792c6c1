//! Runtime layer of the prediction pipeline: cache, throttling, worker pool,
//! orchestration, plus the adapters for historical data and publishing.

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod publish;
pub mod source;
pub mod throttle;
pub mod timers;
pub mod worker;


pub use config::PipelineConfig;
pub use error::PipelineFailure;
pub use orchestrator::{Collaborators, OrchestratorConfig, PredictionOrchestrator};
