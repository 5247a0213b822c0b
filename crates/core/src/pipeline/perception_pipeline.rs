//! Wires frame intake, inference, signal extraction, debouncing and
//! dispatch onto their execution contexts.
//!
//! Layout: `producer ─offer→ [slot] ─drive thread→ gate ─engine context→
//! extractor/debouncer ─channel→ dispatch thread → sink`
//!
//! The drive thread sleeps on a capacity-1 wake channel. Producers and
//! completions both post a wake *after* changing the state they signal, and
//! every wake re-checks "gate ready and slot occupied", so a condition missed
//! on one trigger is caught by the other.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::action::domain::action_dispatcher::{ActionDispatcher, SinkHandle};
use crate::action::domain::trigger_sink::SinkUnavailableError;
use crate::capture::domain::frame_slot::FrameSlot;
use crate::inference::domain::inference_engine::{EngineFactory, InferenceRuntimeError, InitError};
use crate::inference::domain::inference_gate::{
    CompletionHandler, GateState, InferenceGate, NotReadyError, SubmitError,
};
use crate::inference::domain::inference_result::InferenceResult;
use crate::pipeline::pipeline_config::PipelineConfig;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::preprocessing::domain::frame_preprocessor::{FormatError, FramePreprocessor};
use crate::shared::clock::Clock;
use crate::shared::frame::Frame;
use crate::signal::domain::signal_extractor::SignalExtractor;
use crate::trigger::domain::trigger_debouncer::{TriggerDebouncer, TriggerEvent};

const NOTICE_CAPACITY: usize = 64;

/// Operator-facing report of something the pipeline skipped or did.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineNotice {
    FrameRejected(FormatError),
    InferenceFailed(InferenceRuntimeError),
    NotReady(NotReadyError),
    TriggerDropped(SinkUnavailableError),
    Triggered(TriggerEvent),
}

impl fmt::Display for PipelineNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineNotice::FrameRejected(e) => write!(f, "Frame skipped: {e}"),
            PipelineNotice::InferenceFailed(e) => write!(f, "Detection failed: {e}"),
            PipelineNotice::NotReady(e) => write!(f, "Frame dropped: {e}"),
            PipelineNotice::TriggerDropped(e) => write!(f, "Tap dropped: {e}"),
            PipelineNotice::Triggered(event) => write!(
                f,
                "Tap at ({:.0}, {:.0}) [{}]",
                event.target.x, event.target.y, event.timestamp
            ),
        }
    }
}

/// Counters accumulated over a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_offered: u64,
    /// Frames overwritten in the slot before inference could take them.
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    pub frames_submitted: u64,
    pub results: u64,
    pub empty_results: u64,
    pub inference_errors: u64,
    pub not_ready: u64,
    pub triggers_fired: u64,
    pub triggers_suppressed: u64,
    pub triggers_delivered: u64,
    pub triggers_dropped: u64,
}

#[derive(Default)]
struct Counters {
    frames_offered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_rejected: AtomicU64,
    frames_submitted: AtomicU64,
    results: AtomicU64,
    empty_results: AtomicU64,
    inference_errors: AtomicU64,
    not_ready: AtomicU64,
    triggers_fired: AtomicU64,
    triggers_delivered: AtomicU64,
    triggers_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// State shared by every execution context.
struct Shared {
    slot: FrameSlot,
    wake_tx: Sender<()>,
    stopping: AtomicBool,
    counters: Counters,
    notice_tx: Sender<PipelineNotice>,
    logger: Mutex<Box<dyn PipelineLogger>>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn wake(&self) {
        // A full channel already holds a pending wake.
        let _ = self.wake_tx.try_send(());
    }

    fn notify(&self, notice: PipelineNotice) {
        if let Err(TrySendError::Full(notice)) = self.notice_tx.try_send(notice) {
            log::debug!("Notice channel full, dropping: {notice}");
        }
    }

    fn logger(&self) -> MutexGuard<'_, Box<dyn PipelineLogger>> {
        self.logger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer-side handle. Offering is O(1) and never blocks.
#[derive(Clone)]
pub struct FrameIntake {
    shared: Arc<Shared>,
}

impl FrameIntake {
    pub fn offer(&self, frame: Frame) {
        bump(&self.shared.counters.frames_offered);
        if self.shared.slot.offer(frame) {
            bump(&self.shared.counters.frames_dropped);
        }
        self.shared.wake();
    }
}

enum DispatchCommand {
    Deliver(TriggerEvent),
    Stop,
}

/// Result-delivery stage: runs on whatever context the engine completes on.
struct SignalStage {
    shared: Arc<Shared>,
    extractor: SignalExtractor,
    debouncer: Arc<TriggerDebouncer>,
    dispatch_tx: Sender<DispatchCommand>,
}

impl SignalStage {
    fn handle_result(&self, result: InferenceResult) {
        let now = self.shared.clock.now();
        bump(&self.shared.counters.results);
        if result.is_empty() {
            bump(&self.shared.counters.empty_results);
        }

        let signal = self.extractor.extract(&result);
        {
            let mut logger = self.shared.logger();
            logger.timing("inference", result.latency(now).as_secs_f64() * 1000.0);
            if let Some(ref s) = signal {
                logger.metric(&format!("{}_score", s.category), s.score as f64);
            }
        }

        if let Some(event) = self.debouncer.evaluate(signal.as_ref(), now) {
            bump(&self.shared.counters.triggers_fired);
            log::debug!("Trigger fired at {}", event.timestamp);
            if self.dispatch_tx.send(DispatchCommand::Deliver(event)).is_err() {
                log::debug!("Dispatcher stopped, trigger discarded");
            }
        }
    }
}

impl CompletionHandler for SignalStage {
    fn on_completion(&self, outcome: Result<InferenceResult, InferenceRuntimeError>) {
        match outcome {
            Ok(result) => self.handle_result(result),
            Err(e) => {
                bump(&self.shared.counters.inference_errors);
                log::warn!("{e}");
                self.shared.notify(PipelineNotice::InferenceFailed(e));
            }
        }
        self.shared.wake();
    }
}

/// A running perception-to-action pipeline.
pub struct PerceptionPipeline {
    shared: Arc<Shared>,
    gate: Arc<InferenceGate>,
    debouncer: Arc<TriggerDebouncer>,
    dispatch_tx: Sender<DispatchCommand>,
    notice_rx: Receiver<PipelineNotice>,
    driver: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<ActionDispatcher>>,
}

impl PerceptionPipeline {
    /// Constructs the engine and starts the drive and dispatch threads.
    ///
    /// `InitError` is fatal: no threads are left running.
    pub fn start(
        config: PipelineConfig,
        factory: &dyn EngineFactory,
        sink: SinkHandle,
        logger: Box<dyn PipelineLogger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InitError> {
        config
            .validate()
            .map_err(|e| InitError::InvalidOptions(e.to_string()))?;

        let (wake_tx, wake_rx) = crossbeam_channel::bounded::<()>(1);
        let (notice_tx, notice_rx) = crossbeam_channel::bounded(NOTICE_CAPACITY);
        let (dispatch_tx, dispatch_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            slot: FrameSlot::new(),
            wake_tx,
            stopping: AtomicBool::new(false),
            counters: Counters::default(),
            notice_tx,
            logger: Mutex::new(logger),
            clock,
        });
        let debouncer = Arc::new(TriggerDebouncer::new(
            config.threshold,
            config.cooldown(),
            config.target_point(),
        ));
        let stage = Arc::new(SignalStage {
            shared: shared.clone(),
            extractor: SignalExtractor::new(config.category_name.clone()),
            debouncer: debouncer.clone(),
            dispatch_tx: dispatch_tx.clone(),
        });

        let gate = Arc::new(InferenceGate::new(stage));
        if let Err(e) = gate.initialize(factory, &config.engine) {
            log::error!("Inference engine failed to initialize: {e}");
            return Err(e);
        }

        let dispatcher = spawn_dispatcher(
            ActionDispatcher::new(sink),
            dispatch_rx,
            shared.clone(),
        );
        let driver = spawn_driver(shared.clone(), gate.clone(), wake_rx, config.mirror);

        shared.logger().info(&format!(
            "Pipeline started: watching '{}' (threshold {:.2}, cooldown {}ms, backend {})",
            config.category_name, config.threshold, config.cooldown_ms, config.engine.backend
        ));

        Ok(Self {
            shared,
            gate,
            debouncer,
            dispatch_tx,
            notice_rx,
            driver: Some(driver),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn intake(&self) -> FrameIntake {
        FrameIntake {
            shared: self.shared.clone(),
        }
    }

    /// Transient notices for an operator-facing channel. Bounded; notices
    /// nobody drains are discarded.
    pub fn notifications(&self) -> Receiver<PipelineNotice> {
        self.notice_rx.clone()
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            frames_offered: read(&c.frames_offered),
            frames_dropped: read(&c.frames_dropped),
            frames_rejected: read(&c.frames_rejected),
            frames_submitted: read(&c.frames_submitted),
            results: read(&c.results),
            empty_results: read(&c.empty_results),
            inference_errors: read(&c.inference_errors),
            not_ready: read(&c.not_ready),
            triggers_fired: read(&c.triggers_fired),
            triggers_suppressed: self.debouncer.suppressed_count(),
            triggers_delivered: read(&c.triggers_delivered),
            triggers_dropped: read(&c.triggers_dropped),
        }
    }

    /// Closes the gate, joins the worker threads and reports final stats.
    pub fn shutdown(mut self) -> PipelineStats {
        self.stop();
        let stats = self.stats();
        self.shared.logger().summary();
        stats
    }

    fn stop(&mut self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.close();
        self.shared.wake();
        if let Some(driver) = self.driver.take() {
            if driver.join().is_err() {
                log::error!("Drive thread panicked");
            }
        }
        let _ = self.dispatch_tx.send(DispatchCommand::Stop);
        if let Some(dispatcher) = self.dispatcher.take() {
            match dispatcher.join() {
                Ok(d) => log::debug!("Dispatcher delivered {} taps", d.delivered()),
                Err(_) => log::error!("Dispatch thread panicked"),
            }
        }
    }
}

impl Drop for PerceptionPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_driver(
    shared: Arc<Shared>,
    gate: Arc<InferenceGate>,
    wake_rx: Receiver<()>,
    mirror: bool,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while wake_rx.recv().is_ok() {
            if shared.stopping.load(Ordering::SeqCst) {
                break;
            }
            drive(&shared, &gate, mirror);
        }
    })
}

/// Submits slot frames for as long as the gate accepts them.
fn drive(shared: &Shared, gate: &InferenceGate, mirror: bool) {
    while gate.is_ready() {
        let Some(frame) = shared.slot.take_if_present() else {
            break;
        };

        let started = Instant::now();
        let normalized = match FramePreprocessor::normalize(&frame, mirror) {
            Ok(n) => n,
            Err(e) => {
                bump(&shared.counters.frames_rejected);
                log::warn!("Dropping frame captured at {}: {e}", frame.timestamp());
                shared.notify(PipelineNotice::FrameRejected(e));
                continue;
            }
        };
        let preprocess_ms = started.elapsed().as_secs_f64() * 1000.0;

        match gate.submit(normalized, frame.timestamp()) {
            Ok(id) => {
                let submitted = bump(&shared.counters.frames_submitted);
                log::debug!("Submitted request {id} for frame at {}", frame.timestamp());
                let mut logger = shared.logger();
                logger.timing("preprocess", preprocess_ms);
                logger.progress(submitted);
            }
            Err(SubmitError::NotReady(e)) => {
                bump(&shared.counters.not_ready);
                log::warn!("Submission while not ready, frame dropped: {e}");
                shared.notify(PipelineNotice::NotReady(e));
            }
            Err(SubmitError::Rejected(e)) => {
                bump(&shared.counters.inference_errors);
                log::warn!("{e}");
                shared.notify(PipelineNotice::InferenceFailed(e));
            }
        }
    }
}

fn spawn_dispatcher(
    mut dispatcher: ActionDispatcher,
    dispatch_rx: Receiver<DispatchCommand>,
    shared: Arc<Shared>,
) -> JoinHandle<ActionDispatcher> {
    std::thread::spawn(move || {
        for command in dispatch_rx {
            let event = match command {
                DispatchCommand::Deliver(event) => event,
                DispatchCommand::Stop => break,
            };
            match dispatcher.dispatch(event.clone()) {
                Ok(()) => {
                    bump(&shared.counters.triggers_delivered);
                    shared.notify(PipelineNotice::Triggered(event));
                }
                Err(e) => {
                    bump(&shared.counters.triggers_dropped);
                    log::warn!("Trigger at {} dropped: {e}", event.timestamp);
                    shared.notify(PipelineNotice::TriggerDropped(e));
                }
            }
        }
        dispatcher
    })
}
