use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery watermark: the next update id to ask the source for.
///
/// Only ever moves forward through [`DeliveryCursor::advance_past`]; the
/// explicit [`DeliveryCursor::seed`] exists for resuming from a stored
/// offset. Handlers never get a handle to it.
#[derive(Debug, Default)]
pub struct DeliveryCursor {
    next: AtomicU64,
}

impl DeliveryCursor {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Offset to pass to the next fetch.
    pub fn offset(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    /// Mark everything up to and including `id` as delivered. Never moves the
    /// cursor backwards. Returns the resulting offset.
    pub fn advance_past(&self, id: u64) -> u64 {
        let target = id.saturating_add(1);
        let prev = self.next.fetch_max(target, Ordering::AcqRel);
        prev.max(target)
    }

    /// Overwrite the offset (startup / resume).
    pub fn seed(&self, offset: u64) {
        self.next.store(offset, Ordering::Release);
    }
}
