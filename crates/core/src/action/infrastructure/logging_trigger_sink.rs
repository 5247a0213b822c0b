use crate::action::domain::trigger_sink::{SinkUnavailableError, TriggerSink};
use crate::shared::clock::Timestamp;

/// Headless sink that logs each tap instead of driving a real surface.
pub struct LoggingTriggerSink {
    surface: String,
    taps: u64,
}

impl LoggingTriggerSink {
    pub fn new(surface: impl Into<String>) -> Self {
        Self {
            surface: surface.into(),
            taps: 0,
        }
    }

    pub fn taps(&self) -> u64 {
        self.taps
    }
}

impl TriggerSink for LoggingTriggerSink {
    fn tap(&mut self, x: f32, y: f32, timestamp: Timestamp) -> Result<(), SinkUnavailableError> {
        self.taps += 1;
        log::info!(
            "Tap #{} on {} at ({x:.0}, {y:.0}) [{timestamp}]",
            self.taps,
            self.surface
        );
        Ok(())
    }
}
