use std::sync::atomic::{AtomicBool, Ordering};

use crate::inference::domain::inference_result::{Category, InferenceResult};
use crate::shared::clock::Timestamp;
use crate::shared::constants::blendshape_index;

/// Confidence for the watched expression in one inference result.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub category: String,
    pub score: f32,
    pub timestamp: Timestamp,
}

/// Reads the watched category's score from the first detected subject.
///
/// Models emit categories in a fixed layout, so the expected position is
/// checked first and the list is only scanned when it does not match.
pub struct SignalExtractor {
    category: String,
    index_hint: Option<usize>,
    missing_reported: AtomicBool,
}

impl SignalExtractor {
    /// Extractor for `category`, using its position in the standard
    /// blendshape layout as the lookup hint when it has one.
    pub fn new(category: impl Into<String>) -> Self {
        let category = category.into();
        let index_hint = blendshape_index(&category);
        Self::with_index_hint(category, index_hint)
    }

    pub fn with_index_hint(category: impl Into<String>, index_hint: Option<usize>) -> Self {
        Self {
            category: category.into(),
            index_hint,
            missing_reported: AtomicBool::new(false),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// `None` when no subject was detected or the category is absent.
    pub fn extract(&self, result: &InferenceResult) -> Option<Signal> {
        let subject = result.subjects.first()?;
        let Some(found) = self.find(&subject.categories) else {
            // Same outcome as an empty frame, but usually a label/model mismatch.
            if !self.missing_reported.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "Category '{}' not present in detector output ({} categories)",
                    self.category,
                    subject.categories.len()
                );
            }
            return None;
        };
        Some(Signal {
            category: self.category.clone(),
            score: found.score,
            timestamp: result.timestamp,
        })
    }

    fn find<'a>(&self, categories: &'a [Category]) -> Option<&'a Category> {
        self.index_hint
            .and_then(|i| categories.get(i))
            .filter(|c| c.name == self.category)
            .or_else(|| categories.iter().find(|c| c.name == self.category))
    }
}
