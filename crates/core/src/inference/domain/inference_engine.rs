use std::sync::Arc;

use thiserror::Error;

use crate::inference::domain::engine_options::EngineOptions;
use crate::inference::domain::inference_result::{InferenceRequest, InferenceResult};

/// The engine could not be constructed. Fatal to the pipeline instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("model asset unavailable: {0}")]
    MissingModel(String),
    #[error("compute backend unavailable: {0}")]
    UnsupportedBackend(String),
    #[error("invalid engine options: {0}")]
    InvalidOptions(String),
    #[error("engine construction failed: {0}")]
    Engine(String),
}

/// The engine failed on one specific request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("inference failed for request {request_id}: {message}")]
pub struct InferenceRuntimeError {
    pub request_id: u64,
    pub message: String,
}

impl InferenceRuntimeError {
    pub fn new(request_id: u64, message: impl Into<String>) -> Self {
        Self {
            request_id,
            message: message.into(),
        }
    }
}

/// Completion callbacks registered with an engine at construction.
///
/// Invoked on whatever context the engine chooses, exactly once per
/// accepted request.
pub trait ResultListener: Send + Sync {
    fn on_result(&self, result: InferenceResult);
    fn on_error(&self, error: InferenceRuntimeError);
}

/// An asynchronous inference engine.
pub trait InferenceEngine: Send {
    /// Starts inference and returns without waiting for it.
    ///
    /// `Err` means the request was not accepted and no callback will follow.
    fn detect_async(&mut self, request: InferenceRequest) -> Result<(), InferenceRuntimeError>;

    /// Releases engine resources. Does not abort a running request.
    fn close(&mut self);
}

/// Builds engines. Construction failures surface as [`InitError`].
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        options: &EngineOptions,
        listener: Arc<dyn ResultListener>,
    ) -> Result<Box<dyn InferenceEngine>, InitError>;
}
