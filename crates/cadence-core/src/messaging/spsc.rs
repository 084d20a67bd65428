//! Bounded single-producer single-consumer queue
//!
//! A thin layer over `rtrb` that fixes the contract the audio thread relies on:
//!
//! - **No allocation after construction**: the ringbuffer is sized once
//! - **Never blocks**: [`SpscSender::try_enqueue`] fails instead of waiting
//! - **FIFO** between the one producer and the one consumer
//!
//! Single-writer/single-reader discipline is enforced by ownership: the
//! sender and receiver halves are separate, non-`Clone` values that move to
//! the thread that uses them. Rejected enqueues are counted in a shared
//! [`DropCounter`] so a non-real-time thread can report them later.
//!
//! Element types are `Copy`, so a value rejected on a full queue is simply
//! forgotten on the producer's stack and never runs a destructor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default entries per queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Upper bound on queue backing storage
///
/// Leaves headroom for bursts (preset loads can emit hundreds of
/// parameter changes in one go) while keeping each queue small.
pub const MAX_QUEUE_CAPACITY: usize = 1024;

/// Create a queue holding at most `capacity` values
///
/// `capacity` is clamped to `1..=MAX_QUEUE_CAPACITY`.
pub fn channel<T: Copy + Send>(capacity: usize) -> (SpscSender<T>, SpscReceiver<T>) {
    let capacity = capacity.clamp(1, MAX_QUEUE_CAPACITY);
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let rejected = DropCounter::default();

    (
        SpscSender {
            producer,
            capacity,
            rejected,
        },
        SpscReceiver { consumer, capacity },
    )
}

/// Count of values rejected by a full queue
///
/// Cloned out of the sender so a different thread can read it.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    /// Total rejected enqueues so far
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Producer half of a bounded SPSC queue
pub struct SpscSender<T> {
    producer: rtrb::Producer<T>,
    capacity: usize,
    rejected: DropCounter,
}

impl<T: Copy> SpscSender<T> {
    /// Enqueue without blocking
    ///
    /// Returns `false` when the queue is full. The value is not stored and
    /// queued entries are untouched.
    #[inline]
    pub fn try_enqueue(&mut self, value: T) -> bool {
        match self.producer.push(value) {
            Ok(()) => true,
            Err(_) => {
                self.rejected.increment();
                false
            }
        }
    }

    /// Free entries right now
    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total rejected enqueues on this queue
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Shareable handle on the rejection count
    pub fn drop_counter(&self) -> DropCounter {
        self.rejected.clone()
    }
}

/// Consumer half of a bounded SPSC queue
pub struct SpscReceiver<T> {
    consumer: rtrb::Consumer<T>,
    capacity: usize,
}

impl<T: Copy> SpscReceiver<T> {
    /// Dequeue the oldest value without blocking
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Values waiting to be dequeued
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
