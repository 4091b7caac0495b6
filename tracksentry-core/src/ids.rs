//! Process-wide ID allocation
//!
//! Conditions, groups, alarms and actions each draw from their own
//! allocator. IDs increase monotonically and are never handed out twice
//! until the allocator is explicitly reset.

use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic ID source, starting at 1 (0 is never a valid ID).
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Start again from 1. Only safe once every object holding an ID
    /// from this allocator has been destroyed.
    pub fn reset_next_id(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) static CONDITION_IDS: IdAllocator = IdAllocator::new();
pub(crate) static GROUP_IDS: IdAllocator = IdAllocator::new();
pub(crate) static ACTION_IDS: IdAllocator = IdAllocator::new();
pub(crate) static ALARM_IDS: IdAllocator = IdAllocator::new();

/// Reset every process-wide allocator, used on a full engine reset.
pub fn reset_all() {
    CONDITION_IDS.reset_next_id();
    GROUP_IDS.reset_next_id();
    ACTION_IDS.reset_next_id();
    ALARM_IDS.reset_next_id();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdAllocator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let c = ids.next_id();
        assert_eq!(a, 1);
        assert!(b > a && c > b);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let ids = IdAllocator::new();
        ids.next_id();
        ids.next_id();
        ids.reset_next_id();
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_global_allocator_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(CONDITION_IDS.next_id()));
        }
    }
}
