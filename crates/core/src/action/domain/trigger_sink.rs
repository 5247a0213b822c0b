use thiserror::Error;

use crate::shared::clock::Timestamp;

/// The downstream surface is not attached (e.g. torn down).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("trigger sink unavailable: {0}")]
pub struct SinkUnavailableError(pub String);

/// Downstream consumer of synthetic taps.
///
/// Implementations report unavailability instead of panicking into the
/// pipeline.
pub trait TriggerSink: Send {
    fn tap(&mut self, x: f32, y: f32, timestamp: Timestamp) -> Result<(), SinkUnavailableError>;
}
