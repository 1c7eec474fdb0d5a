//! Callback identifier allocation.

use bridge_core::CallbackId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out callback identifiers for one extension process.
///
/// Identifiers start at 1 and are strictly increasing. Nothing ever returns an
/// identifier to the pool, so a stale identifier can never alias a live one.
#[derive(Debug)]
pub struct CallbackIdAllocator {
    next: AtomicU64,
}

impl CallbackIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> CallbackId {
        CallbackId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of identifiers handed out so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for CallbackIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one_and_increases() {
        let ids = CallbackIdAllocator::new();
        assert_eq!(ids.next(), CallbackId(1));
        assert_eq!(ids.next(), CallbackId(2));
        assert_eq!(ids.next(), CallbackId(3));
        assert_eq!(ids.issued(), 3);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(CallbackIdAllocator::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    let mut local = Vec::new();
                    for _ in 0..500 {
                        local.push(ids.next());
                    }
                    local
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            let local = worker.join().unwrap();
            assert!(local.windows(2).all(|w| w[0] < w[1]));
            for id in local {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(ids.issued(), 4000);
    }
}
