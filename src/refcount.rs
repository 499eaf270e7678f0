//! External reference counting for handed-out objects.
//!
//! Only references held by clients are counted. Internal back-references
//! use `Arc`/`Weak` directly and never keep an object open.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// A count with no external holders yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an external reference and return the new count.
    pub fn add_ref(&self) -> usize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop an external reference.
    ///
    /// Returns true exactly once: for the release that takes the count from
    /// one to zero. Releasing at zero is ignored.
    pub fn release(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                log::warn!("RefCount released below zero; ignoring");
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 1,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}
