use std::sync::{Mutex, PoisonError};

use crate::shared::frame::Frame;

/// Single-cell "keep only latest" buffer between the frame producer and
/// the inference stage.
///
/// Offering while occupied replaces the held frame; the displaced frame is
/// dropped. The lock is held only for the swap itself, so producers never
/// wait on inference.
#[derive(Default)]
pub struct FrameSlot {
    cell: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `frame`, returning `true` if an unconsumed frame was displaced.
    pub fn offer(&self, frame: Frame) -> bool {
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        let displaced = cell.replace(frame);
        drop(cell);
        displaced.is_some()
    }

    /// Takes the held frame, leaving the slot empty.
    pub fn take_if_present(&self) -> Option<Frame> {
        self.cell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
