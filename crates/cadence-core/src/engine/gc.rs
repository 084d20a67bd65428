//! Deferred deallocation for engine data
//!
//! Scheduled callbacks may swap new data into the engine (a tuning table,
//! for example). The value being replaced is then dropped on the audio
//! thread, which must not call into the allocator. Holding such data in a
//! `basedrop::Shared<T>` turns that drop into a pointer push; the actual
//! free happens when the control thread calls [`GarbageCollector::collect`]
//! on its next loop iteration.
//!
//! ```ignore
//! use basedrop::Shared;
//!
//! let table = Shared::new(&gc.handle(), TuningTable::from_cents(&cents));
//! // ... moved into the engine by a callback; the old table's drop is deferred
//! gc.collect();
//! ```

use basedrop::{Collector, Handle};

/// Owner of the deferred-drop queue
///
/// Lives on the control thread. Handles are cheap to clone and can be used
/// from any thread to create `Shared<T>` values.
pub struct GarbageCollector {
    collector: Collector,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
        }
    }

    /// Handle for creating `Shared<T>` allocations
    pub fn handle(&self) -> Handle {
        self.collector.handle()
    }

    /// Allocations made through this collector that are not freed yet
    pub fn live_allocations(&self) -> usize {
        self.collector.alloc_count()
    }

    /// Free everything whose last reference has been dropped
    pub fn collect(&mut self) {
        self.collector.collect();
    }
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_deferred_until_collect() {
        let mut gc = GarbageCollector::new();
        let drops = Arc::new(AtomicUsize::new(0));

        let shared = Shared::new(&gc.handle(), Tracked(Arc::clone(&drops)));
        let audio_side = std::thread::spawn(move || drop(shared));
        audio_side.join().unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        gc.collect();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
