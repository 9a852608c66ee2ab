//! Output budget for the execution phase.
//!
//! Callbacks report how many bytes of output they produced. Once the
//! configured ceiling is crossed the runtime guardian raises RESOURCE_LIMIT.

use std::sync::atomic::{AtomicU64, Ordering};

/// Byte budget for one cycle. `None` means unlimited.
#[derive(Debug)]
pub struct ResourceBudget {
    /// Maximum bytes allowed
    pub max_bytes: Option<u64>,

    /// Bytes reported so far
    used: AtomicU64,
}

impl ResourceBudget {
    pub fn new(max_bytes: Option<u64>) -> Self {
        Self {
            max_bytes,
            used: AtomicU64::new(0),
        }
    }

    /// Record usage. Returns true once the budget is exceeded.
    pub fn record(&self, bytes: u64) -> bool {
        self.used.fetch_add(bytes, Ordering::SeqCst);
        self.is_exceeded()
    }

    pub fn is_exceeded(&self) -> bool {
        match self.max_bytes {
            Some(max) => self.used() > max,
            None => false,
        }
    }

    /// Remaining bytes, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        self.max_bytes.map(|max| max.saturating_sub(self.used()))
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::new(None)
    }
}
