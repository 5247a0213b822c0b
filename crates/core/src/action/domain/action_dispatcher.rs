use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::action::domain::trigger_sink::{SinkUnavailableError, TriggerSink};
use crate::trigger::domain::trigger_debouncer::TriggerEvent;

/// Shared attachment point for the downstream sink.
///
/// The surface owner attaches and detaches its sink here while the
/// dispatcher keeps delivering through the same handle.
#[derive(Clone, Default)]
pub struct SinkHandle {
    sink: Arc<Mutex<Option<Box<dyn TriggerSink>>>>,
}

impl SinkHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(sink: Box<dyn TriggerSink>) -> Self {
        let handle = Self::new();
        handle.attach(sink);
        handle
    }

    pub fn attach(&self, sink: Box<dyn TriggerSink>) {
        *self.lock() = Some(sink);
    }

    pub fn detach(&self) -> Option<Box<dyn TriggerSink>> {
        self.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn TriggerSink>>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Delivers trigger events to the attached sink. Failed deliveries are
/// reported and dropped; the next qualifying signal supersedes them.
pub struct ActionDispatcher {
    sink: SinkHandle,
    delivered: u64,
}

impl ActionDispatcher {
    pub fn new(sink: SinkHandle) -> Self {
        Self { sink, delivered: 0 }
    }

    pub fn dispatch(&mut self, event: TriggerEvent) -> Result<(), SinkUnavailableError> {
        let mut guard = self.sink.lock();
        let sink = guard
            .as_mut()
            .ok_or_else(|| SinkUnavailableError("no sink attached".into()))?;
        sink.tap(event.target.x, event.target.y, event.timestamp)?;
        self.delivered += 1;
        Ok(())
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}
