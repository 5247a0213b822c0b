use std::time::Duration;

use crate::shared::clock::Timestamp;
use crate::shared::frame::NormalizedFrame;

/// A normalized frame submitted for inference, tagged with its capture time.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: u64,
    pub frame: NormalizedFrame,
    pub timestamp: Timestamp,
}

/// One scored expression category.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub name: String,
    pub score: f32,
}

impl Category {
    pub fn new(name: impl Into<String>, score: f32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Categories scored for one detected subject, in model output order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subject {
    pub categories: Vec<Category>,
}

/// Engine output for one request.
///
/// No subjects is a valid, non-error outcome ("empty").
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub request_id: u64,
    pub subjects: Vec<Subject>,
    /// Capture timestamp of the originating request.
    pub timestamp: Timestamp,
    pub input_width: u32,
    pub input_height: u32,
}

impl InferenceResult {
    pub fn empty(request: &InferenceRequest) -> Self {
        Self::with_subjects(request, Vec::new())
    }

    pub fn with_subjects(request: &InferenceRequest, subjects: Vec<Subject>) -> Self {
        Self {
            request_id: request.id,
            subjects,
            timestamp: request.timestamp,
            input_width: request.frame.width(),
            input_height: request.frame.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Time from capture to `finished`.
    pub fn latency(&self, finished: Timestamp) -> Duration {
        finished.saturating_since(self.timestamp)
    }
}
