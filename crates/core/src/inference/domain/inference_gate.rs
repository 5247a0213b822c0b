//! Lifecycle and single-flight submission around an [`InferenceEngine`].
//!
//! ```text
//! Uninitialized ──initialize──▶ Ready ──submit──▶ Detecting
//!       │                         ▲                   │
//!       └──(InitError)──▶ Failed  └────completion─────┘
//!
//! close(): any state ──▶ Closed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::inference::domain::engine_options::EngineOptions;
use crate::inference::domain::inference_engine::{
    EngineFactory, InferenceEngine, InferenceRuntimeError, InitError, ResultListener,
};
use crate::inference::domain::inference_result::{InferenceRequest, InferenceResult};
use crate::shared::clock::Timestamp;
use crate::shared::frame::NormalizedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Uninitialized,
    Ready,
    Detecting,
    Closed,
    Failed,
}

/// A submission was attempted while the gate was not `Ready`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("inference gate is {state:?}, not ready for submission")]
pub struct NotReadyError {
    pub state: GateState,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    NotReady(#[from] NotReadyError),
    #[error(transparent)]
    Rejected(#[from] InferenceRuntimeError),
}

/// Receives the outcome of every accepted request, on the engine's context.
pub trait CompletionHandler: Send + Sync {
    fn on_completion(&self, outcome: Result<InferenceResult, InferenceRuntimeError>);
}

struct GateCell {
    state: GateState,
    in_flight: Option<u64>,
}

struct GateShared {
    cell: Mutex<GateCell>,
    handler: Arc<dyn CompletionHandler>,
}

impl GateShared {
    fn cell(&self) -> MutexGuard<'_, GateCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears the in-flight marker for `request_id`; returns whether it matched.
    fn settle(&self, request_id: u64) -> bool {
        let mut cell = self.cell();
        if cell.in_flight != Some(request_id) {
            return false;
        }
        cell.in_flight = None;
        if cell.state == GateState::Detecting {
            cell.state = GateState::Ready;
        }
        true
    }

    fn complete(&self, request_id: u64, outcome: Result<InferenceResult, InferenceRuntimeError>) {
        // State goes back to Ready before the handler runs, so anything the
        // handler wakes up observes a submittable gate.
        if self.settle(request_id) {
            self.handler.on_completion(outcome);
        } else {
            log::warn!("Ignoring completion for request {request_id}: not the in-flight request");
        }
    }
}

/// Listener registered with the engine; routes callbacks back through the gate.
struct GateListener {
    shared: Arc<GateShared>,
}

impl ResultListener for GateListener {
    fn on_result(&self, result: InferenceResult) {
        self.shared.complete(result.request_id, Ok(result));
    }

    fn on_error(&self, error: InferenceRuntimeError) {
        self.shared.complete(error.request_id, Err(error));
    }
}

/// Owns an inference engine and admits at most one request at a time.
pub struct InferenceGate {
    shared: Arc<GateShared>,
    engine: Mutex<Option<Box<dyn InferenceEngine>>>,
    next_id: AtomicU64,
}

impl InferenceGate {
    pub fn new(handler: Arc<dyn CompletionHandler>) -> Self {
        Self {
            shared: Arc::new(GateShared {
                cell: Mutex::new(GateCell {
                    state: GateState::Uninitialized,
                    in_flight: None,
                }),
                handler,
            }),
            engine: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Constructs the engine. On failure the gate is permanently `Failed`.
    pub fn initialize(
        &self,
        factory: &dyn EngineFactory,
        options: &EngineOptions,
    ) -> Result<(), InitError> {
        if self.state() != GateState::Uninitialized {
            return Err(InitError::Engine(format!(
                "gate already {:?}",
                self.state()
            )));
        }

        let listener = Arc::new(GateListener {
            shared: self.shared.clone(),
        });
        match factory.create(options, listener) {
            Ok(engine) => {
                *self.engine_slot() = Some(engine);
                let mut cell = self.shared.cell();
                // close() may have raced with construction
                if cell.state == GateState::Uninitialized {
                    cell.state = GateState::Ready;
                    drop(cell);
                } else {
                    drop(cell);
                    self.release_engine();
                }
                Ok(())
            }
            Err(e) => {
                self.shared.cell().state = GateState::Failed;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> GateState {
        self.shared.cell().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == GateState::Ready
    }

    /// Submits a frame and returns its request id without waiting for
    /// inference. Only valid while `Ready`.
    pub fn submit(&self, frame: NormalizedFrame, timestamp: Timestamp) -> Result<u64, SubmitError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut cell = self.shared.cell();
            if cell.state != GateState::Ready {
                return Err(NotReadyError { state: cell.state }.into());
            }
            cell.state = GateState::Detecting;
            cell.in_flight = Some(id);
        }

        let request = InferenceRequest {
            id,
            frame,
            timestamp,
        };
        // A synchronous engine may complete inside detect_async; completion
        // only touches the state cell, never the engine lock.
        let accepted = match self.engine_slot().as_mut() {
            Some(engine) => engine.detect_async(request),
            None => {
                self.shared.settle(id);
                return Err(NotReadyError {
                    state: self.state(),
                }
                .into());
            }
        };

        match accepted {
            Ok(()) => Ok(id),
            Err(e) => {
                self.shared.settle(id);
                Err(e.into())
            }
        }
    }

    /// Stops future submissions and releases the engine. Idempotent.
    ///
    /// An in-flight request is not aborted; its completion is still
    /// delivered, but the gate stays `Closed`.
    pub fn close(&self) {
        let previous = {
            let mut cell = self.shared.cell();
            std::mem::replace(&mut cell.state, GateState::Closed)
        };
        if previous != GateState::Closed {
            log::debug!("Closing inference gate (was {previous:?})");
        }
        self.release_engine();
    }

    fn release_engine(&self) {
        if let Some(mut engine) = self.engine_slot().take() {
            engine.close();
        }
    }

    fn engine_slot(&self) -> MutexGuard<'_, Option<Box<dyn InferenceEngine>>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InferenceGate {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Outcomes = Arc<Mutex<Vec<Result<InferenceResult, InferenceRuntimeError>>>>;

    struct RecordingHandler {
        outcomes: Outcomes,
    }

    impl CompletionHandler for RecordingHandler {
        fn on_completion(&self, outcome: Result<InferenceResult, InferenceRuntimeError>) {
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    /// Engine that parks requests until the test completes them.
    struct ManualEngine {
        pending: Arc<Mutex<Vec<InferenceRequest>>>,
        closed: Arc<AtomicUsize>,
        reject: bool,
    }

    impl InferenceEngine for ManualEngine {
        fn detect_async(&mut self, request: InferenceRequest) -> Result<(), InferenceRuntimeError> {
            if self.reject {
                return Err(InferenceRuntimeError::new(request.id, "busy"));
            }
            self.pending.lock().unwrap().push(request);
            Ok(())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ManualFactory {
        pending: Arc<Mutex<Vec<InferenceRequest>>>,
        closed: Arc<AtomicUsize>,
        listener: Mutex<Option<Arc<dyn ResultListener>>>,
        reject: bool,
        fail: bool,
    }

    impl ManualFactory {
        fn listener(&self) -> Arc<dyn ResultListener> {
            self.listener.lock().unwrap().clone().unwrap()
        }

        fn take_pending(&self) -> Vec<InferenceRequest> {
            std::mem::take(&mut *self.pending.lock().unwrap())
        }
    }

    impl EngineFactory for ManualFactory {
        fn create(
            &self,
            _options: &EngineOptions,
            listener: Arc<dyn ResultListener>,
        ) -> Result<Box<dyn InferenceEngine>, InitError> {
            if self.fail {
                return Err(InitError::UnsupportedBackend("gpu".into()));
            }
            *self.listener.lock().unwrap() = Some(listener);
            Ok(Box::new(ManualEngine {
                pending: self.pending.clone(),
                closed: self.closed.clone(),
                reject: self.reject,
            }))
        }
    }

    /// Engine that answers inside detect_async, on the caller's thread.
    struct InlineEngine {
        listener: Arc<dyn ResultListener>,
    }

    impl InferenceEngine for InlineEngine {
        fn detect_async(&mut self, request: InferenceRequest) -> Result<(), InferenceRuntimeError> {
            self.listener.on_result(InferenceResult::empty(&request));
            Ok(())
        }

        fn close(&mut self) {}
    }

    struct InlineFactory;

    impl EngineFactory for InlineFactory {
        fn create(
            &self,
            _options: &EngineOptions,
            listener: Arc<dyn ResultListener>,
        ) -> Result<Box<dyn InferenceEngine>, InitError> {
            Ok(Box::new(InlineEngine { listener }))
        }
    }

    fn gate() -> (InferenceGate, Outcomes) {
        let outcomes: Outcomes = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(RecordingHandler {
            outcomes: outcomes.clone(),
        });
        (InferenceGate::new(handler), outcomes)
    }

    fn frame() -> NormalizedFrame {
        NormalizedFrame::new(vec![0u8; 3], 1, 1)
    }

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_starts_uninitialized_and_rejects_submit() {
        let (gate, _) = gate();
        assert_eq!(gate.state(), GateState::Uninitialized);
        let err = gate.submit(frame(), ts(0)).unwrap_err();
        assert_eq!(
            err,
            SubmitError::NotReady(NotReadyError {
                state: GateState::Uninitialized
            })
        );
    }

    #[test]
    fn test_initialize_makes_gate_ready() {
        let (gate, _) = gate();
        gate.initialize(&ManualFactory::default(), &EngineOptions::default())
            .unwrap();
        assert!(gate.is_ready());
    }

    #[test]
    fn test_init_failure_is_terminal() {
        let (gate, _) = gate();
        let factory = ManualFactory {
            fail: true,
            ..Default::default()
        };
        let err = gate
            .initialize(&factory, &EngineOptions::default())
            .unwrap_err();
        assert!(matches!(err, InitError::UnsupportedBackend(_)));
        assert_eq!(gate.state(), GateState::Failed);

        let err = gate.submit(frame(), ts(0)).unwrap_err();
        assert_eq!(
            err,
            SubmitError::NotReady(NotReadyError {
                state: GateState::Failed
            })
        );
        assert!(gate
            .initialize(&ManualFactory::default(), &EngineOptions::default())
            .is_err());
    }

    #[test]
    fn test_submit_enters_detecting_until_result() {
        let (gate, outcomes) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        let id = gate.submit(frame(), ts(10)).unwrap();
        assert_eq!(gate.state(), GateState::Detecting);

        let pending = factory.take_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        factory
            .listener()
            .on_result(InferenceResult::empty(&pending[0]));

        assert!(gate.is_ready());
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].as_ref().unwrap().timestamp, ts(10));
    }

    #[test]
    fn test_second_submit_while_detecting_is_not_ready() {
        let (gate, _) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        gate.submit(frame(), ts(0)).unwrap();
        let err = gate.submit(frame(), ts(1)).unwrap_err();

        assert_eq!(
            err,
            SubmitError::NotReady(NotReadyError {
                state: GateState::Detecting
            })
        );
        assert_eq!(factory.take_pending().len(), 1);
    }

    #[test]
    fn test_error_completion_returns_to_ready() {
        let (gate, outcomes) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        let id = gate.submit(frame(), ts(0)).unwrap();
        factory
            .listener()
            .on_error(InferenceRuntimeError::new(id, "model crashed"));

        assert!(gate.is_ready());
        assert!(outcomes.lock().unwrap()[0].is_err());
        assert!(gate.submit(frame(), ts(1)).is_ok());
    }

    #[test]
    fn test_synchronous_rejection_returns_to_ready() {
        let (gate, outcomes) = gate();
        let factory = ManualFactory {
            reject: true,
            ..Default::default()
        };
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        let err = gate.submit(frame(), ts(0)).unwrap_err();

        assert!(matches!(err, SubmitError::Rejected(_)));
        assert!(gate.is_ready());
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let (gate, outcomes) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        let id = gate.submit(frame(), ts(0)).unwrap();
        factory
            .listener()
            .on_error(InferenceRuntimeError::new(id + 100, "stray"));

        assert_eq!(gate.state(), GateState::Detecting);
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inline_completion_does_not_deadlock() {
        let (gate, outcomes) = gate();
        gate.initialize(&InlineFactory, &EngineOptions::default())
            .unwrap();

        for i in 0..3 {
            gate.submit(frame(), ts(i)).unwrap();
            assert!(gate.is_ready());
        }
        assert_eq!(outcomes.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_close_is_idempotent_and_releases_engine_once() {
        let (gate, _) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        gate.close();
        gate.close();

        assert_eq!(gate.state(), GateState::Closed);
        assert_eq!(factory.closed.load(Ordering::SeqCst), 1);
        let err = gate.submit(frame(), ts(0)).unwrap_err();
        assert_eq!(
            err,
            SubmitError::NotReady(NotReadyError {
                state: GateState::Closed
            })
        );
    }

    #[test]
    fn test_completion_after_close_is_delivered_but_gate_stays_closed() {
        let (gate, outcomes) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();

        gate.submit(frame(), ts(0)).unwrap();
        gate.close();
        let pending = factory.take_pending();
        factory
            .listener()
            .on_result(InferenceResult::empty(&pending[0]));

        assert_eq!(gate.state(), GateState::Closed);
        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_submits_admit_exactly_one() {
        let (gate, _) = gate();
        let factory = ManualFactory::default();
        gate.initialize(&factory, &EngineOptions::default()).unwrap();
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.submit(frame(), ts(i)).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(factory.take_pending().len(), 1);
    }
}
