use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::clock::Timestamp;
use crate::signal::domain::signal_extractor::Signal;

/// Sentinel for "never triggered".
const NEVER: u64 = u64::MAX;

/// A point on the presentation surface, in its own pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub x: f32,
    pub y: f32,
}

/// A discrete action to perform on the downstream surface.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub target: TargetPoint,
    pub timestamp: Timestamp,
}

/// Turns a noisy confidence stream into rate-limited trigger events.
///
/// A signal fires when its score reaches the threshold and at least
/// `cooldown` has elapsed since the last fired event. The last-fired time is
/// updated with a single compare-and-swap, so concurrent evaluations can
/// never both pass the cooldown check.
pub struct TriggerDebouncer {
    threshold: f32,
    cooldown: Duration,
    target: TargetPoint,
    last_trigger_ms: AtomicU64,
    suppressed: AtomicU64,
}

impl TriggerDebouncer {
    pub fn new(threshold: f32, cooldown: Duration, target: TargetPoint) -> Self {
        Self {
            threshold,
            cooldown,
            target,
            last_trigger_ms: AtomicU64::new(NEVER),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn evaluate(&self, signal: Option<&Signal>, now: Timestamp) -> Option<TriggerEvent> {
        let signal = signal?;
        if signal.score.is_nan() || signal.score < self.threshold {
            return None;
        }

        let mut last = self.last_trigger_ms.load(Ordering::Acquire);
        loop {
            if last != NEVER && now.saturating_since(Timestamp::from_millis(last)) < self.cooldown {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "Trigger suppressed at {now}: score {:.2}, last fired {last}ms",
                    signal.score
                );
                return None;
            }
            match self.last_trigger_ms.compare_exchange_weak(
                last,
                now.as_millis(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => last = actual,
            }
        }

        Some(TriggerEvent {
            target: self.target,
            timestamp: now,
        })
    }

    pub fn last_trigger(&self) -> Option<Timestamp> {
        match self.last_trigger_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => Some(Timestamp::from_millis(ms)),
        }
    }

    /// Above-threshold signals rejected by the cooldown so far.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
