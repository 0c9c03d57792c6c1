//! Worker pool: one isolated forecast worker, its health checks, and the
//! circuit breaker that stops dispatching to it when it misbehaves.
//!
//! ## Components
//!
//! - `WorkerUnit`: the dedicated thread running a `Forecaster` (message passing only)
//! - `WorkerPool`: lifecycle (initialize/terminate/restart), dispatch, ping/pong health
//! - `CircuitBreaker`: consecutive-failure gate; opening it triggers a restart

pub mod breaker;
mod health;
pub mod pool;
mod unit;

use std::time::Duration;

use async_trait::async_trait;

use foresight_ai::{ForecastError, ForecastOutput, ForecastRequest};

pub use breaker::{BreakerConfig, BreakerTransition, CircuitBreaker, CircuitBreakerState};
pub use health::is_unresponsive;
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStatus};
pub use unit::{ForecasterFactory, ForecasterPrototype};

/// Why a dispatch produced no forecast.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("forecast worker not ready")]
    WorkerUnavailable,
    #[error("forecast worker exited while handling the request")]
    WorkerCrashed,
    #[error("forecast worker unresponsive for {0:?}")]
    Unresponsive(Duration),
    #[error("forecast worker did not answer within {0:?}")]
    Timeout(Duration),
    #[error("forecast failed: {0}")]
    Forecast(#[from] ForecastError),
    #[error("could not start forecast worker: {0}")]
    Spawn(String),
    #[error("a worker restart is already in progress")]
    RestartInProgress,
    #[error("worker pool is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    /// Short-circuited by the breaker; expected, not a fresh failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, DispatchError::CircuitOpen)
    }
}

/// Something that turns a forecast request into a forecast, asynchronously.
///
/// The throttling engine sits in front of one of these; in production that is
/// the `WorkerPool`.
#[async_trait]
pub trait PredictionExecutor: Send + Sync + 'static {
    async fn execute(&self, request: ForecastRequest) -> Result<ForecastOutput, DispatchError>;
}
