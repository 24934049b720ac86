//! Detection records and the fixed-capacity buffer the evaluator writes into.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Kind tag carried by every detection produced by a single-class cascade.
pub const KIND_OBJECT: u32 = 0;

/// Raw detection buffer size: one slot is reserved for the
/// counter, the rest hold detections.
pub const DETECTION_SLOTS: usize = 4096;

/// Default number of detections a single frame may produce.
pub const MAX_DETECTIONS: usize = DETECTION_SLOTS - 1;

/// An accepted window in full-resolution frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Top-left corner in frame pixels.
    pub x: u32,
    pub y: u32,
    /// Window size in frame pixels (the level's object size).
    pub width: u32,
    pub height: u32,
    /// Accumulated stage score at acceptance.
    pub confidence: f32,
    pub kind: u32,
}

impl Detection {
    pub fn new(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            kind: KIND_OBJECT,
        }
    }

    #[inline]
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area of the intersection with `other`, zero when disjoint.
    #[inline]
    pub fn intersection_area(&self, other: &Detection) -> u64 {
        let x0 = self.x.max(other.x) as u64;
        let y0 = self.y.max(other.y) as u64;
        let x1 = (self.x as u64 + self.width as u64).min(other.x as u64 + other.width as u64);
        let y1 = (self.y as u64 + self.height as u64).min(other.y as u64 + other.height as u64);
        x1.saturating_sub(x0) * y1.saturating_sub(y0)
    }
}

/// Append-only detection storage shared by all evaluation workers.
///
/// Slots are reserved with an atomic counter and written exactly once. Writes
/// beyond capacity are dropped; the counter keeps counting so the overflow can
/// be reported.
#[derive(Debug)]
pub struct DetectionBuffer {
    counter: AtomicUsize,
    slots: Vec<OnceLock<Detection>>,
}

impl Default for DetectionBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_DETECTIONS)
    }
}

impl DetectionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reserve a slot and store `det`. Returns `false` when the buffer is full.
    pub fn push(&self, det: Detection) -> bool {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        match self.slots.get(idx) {
            Some(slot) => slot.set(det).is_ok(),
            None => false,
        }
    }

    /// Number of stored detections.
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::Acquire).min(self.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of detections rejected because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.counter
            .load(Ordering::Acquire)
            .saturating_sub(self.slots.len())
    }

    /// Stored detections in slot order.
    pub fn to_vec(&self) -> Vec<Detection> {
        self.slots[..self.len()]
            .iter()
            .filter_map(|slot| slot.get().copied())
            .collect()
    }

    /// Empty the buffer for the next frame, keeping its allocation.
    pub fn clear(&mut self) {
        *self.counter.get_mut() = 0;
        for slot in &mut self.slots {
            slot.take();
        }
    }

    /// Resize to `capacity` slots and clear.
    pub fn reset(&mut self, capacity: usize) {
        self.clear();
        self.slots.resize_with(capacity, OnceLock::new);
    }
}
