//! Callback slots: deferred work for the audio thread
//!
//! The control thread can hand the audio thread an arbitrary closure without
//! the audio thread ever allocating or freeing memory:
//!
//! ```text
//!  Control thread                          Audio thread
//!  ──────────────                          ────────────
//!  acquire free slot (grow pool if empty)
//!  store closure in slot
//!  push RunCallback{slot} ───────────────► pop RunCallback{slot}
//!                                          run closure once (&mut EngineState)
//!  pop CallbackReturned{slot} ◄─────────── push CallbackReturned{slot}
//!  drop closure, slot back on free list
//! ```
//!
//! Slots live in an arena of fixed-size chunks addressed by [`SlotIndex`].
//! Chunks are only ever added (on the control thread) and never move, so a
//! slot index stays valid for the lifetime of the pool. The free list is a
//! plain `Vec` of indices owned by the control thread.
//!
//! Closures are `FnMut` and are invoked through a mutable reference: their
//! captured state is dropped later by the control thread, not by the audio
//! thread.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::engine::EngineState;

use super::audio::{ControlToAudio, ControlToAudioSender, QueueDirection};
use super::error::{MessagingError, MessagingResult};

/// Work scheduled onto the audio thread
pub type AudioCallback = Box<dyn FnMut(&mut EngineState) + Send>;

/// Slots per arena chunk
pub const CHUNK_SIZE: usize = 16;

/// Chunks the arena can ever hold
pub const MAX_CHUNKS: usize = 256;

/// Hard ceiling on slots (4096)
pub const MAX_SLOTS: usize = CHUNK_SIZE * MAX_CHUNKS;

/// Stable index of a callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotIndex(u32);

impl SlotIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn chunk(self) -> usize {
        self.index() / CHUNK_SIZE
    }

    #[inline]
    fn offset(self) -> usize {
        self.index() % CHUNK_SIZE
    }
}

// Slot states
const FREE: u8 = 0;
/// Filled and handed to the audio thread
const PENDING: u8 = 1;
/// Ran; a CallbackReturned message is on its way
const RETURNING: u8 = 2;
/// Ran, but the return message was rejected by a full queue
const ORPHANED: u8 = 3;

struct Slot {
    work: UnsafeCell<Option<AudioCallback>>,
    state: AtomicU8,
}

impl Slot {
    fn new() -> Self {
        Self {
            work: UnsafeCell::new(None),
            state: AtomicU8::new(FREE),
        }
    }
}

// SAFETY: `work` is only touched by the control thread while the slot is
// FREE (not visible to the audio thread), and only by the audio thread while
// it is PENDING. Ownership moves between them through the release/acquire
// pair on `state` and on the SPSC queues.
unsafe impl Sync for Slot {}

struct SlotArena {
    chunks: [OnceLock<Box<[Slot]>>; MAX_CHUNKS],
}

impl SlotArena {
    fn new() -> Self {
        Self {
            chunks: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    #[inline]
    fn slot(&self, index: SlotIndex) -> Option<&Slot> {
        self.chunks
            .get(index.chunk())?
            .get()?
            .get(index.offset())
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Slots ever allocated
    pub allocated: usize,
    /// Slots on the free list
    pub free: usize,
}

impl PoolStats {
    /// Slots currently checked out to the audio thread
    pub fn in_flight(&self) -> usize {
        self.allocated - self.free
    }
}

/// Control-thread side of the callback slots
pub struct CallbackPool {
    arena: Arc<SlotArena>,
    free: Vec<SlotIndex>,
    allocated: usize,
}

impl CallbackPool {
    /// Create a pool with at least `initial_slots` slots and the matching
    /// audio-side runner
    pub fn new(initial_slots: usize) -> (Self, CallbackRunner) {
        let arena = Arc::new(SlotArena::new());
        let mut pool = Self {
            arena: Arc::clone(&arena),
            free: Vec::with_capacity(initial_slots.min(MAX_SLOTS)),
            allocated: 0,
        };
        while pool.allocated < initial_slots.min(MAX_SLOTS) {
            if !pool.add_chunk() {
                break;
            }
        }
        (pool, CallbackRunner { arena })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated,
            free: self.free.len(),
        }
    }

    /// Store `work` in a slot and queue it for the audio thread
    ///
    /// Grows the pool when no slot is free. Fails only if the control→audio
    /// queue is full (the work is dropped here, on the control thread) or
    /// the pool is at [`MAX_SLOTS`].
    pub fn schedule(
        &mut self,
        work: AudioCallback,
        to_audio: &mut ControlToAudioSender,
    ) -> MessagingResult<SlotIndex> {
        let index = self.acquire()?;
        let slot = self.slot(index)?;

        // SAFETY: the slot came off the free list, so the audio thread
        // holds no reference to it.
        unsafe {
            *slot.work.get() = Some(work);
        }
        slot.state.store(PENDING, Ordering::Release);

        if to_audio.try_enqueue(ControlToAudio::RunCallback { slot: index }) {
            Ok(index)
        } else {
            self.recycle(index);
            Err(MessagingError::QueueFull(QueueDirection::ControlToAudio))
        }
    }

    /// Recycle a slot the audio thread handed back
    ///
    /// Returns `false` (and changes nothing) if the slot was not waiting
    /// to be returned.
    pub fn release(&mut self, index: SlotIndex) -> bool {
        let Some(slot) = self.arena.slot(index) else {
            log::warn!("Callback return for unknown slot {}", index.index());
            return false;
        };
        if slot
            .state
            .compare_exchange(RETURNING, FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Callback slot {} returned twice", index.index());
            return false;
        }
        self.clear(index);
        true
    }

    /// Take back slots whose return message was lost to a full queue
    pub fn reclaim_orphans(&mut self) -> usize {
        let mut reclaimed = 0;
        for raw in 0..self.allocated {
            let index = SlotIndex(raw as u32);
            let orphaned = self.arena.slot(index).is_some_and(|slot| {
                slot.state
                    .compare_exchange(ORPHANED, FREE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            });
            if orphaned {
                self.clear(index);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            log::debug!("Reclaimed {} orphaned callback slots", reclaimed);
        }
        reclaimed
    }

    fn acquire(&mut self) -> MessagingResult<SlotIndex> {
        if let Some(index) = self.free.pop() {
            return Ok(index);
        }
        if self.reclaim_orphans() == 0 && !self.add_chunk() {
            return Err(MessagingError::CallbackPoolExhausted(self.allocated));
        }
        self.free
            .pop()
            .ok_or(MessagingError::CallbackPoolExhausted(self.allocated))
    }

    fn slot(&self, index: SlotIndex) -> MessagingResult<&Slot> {
        self.arena
            .slot(index)
            .ok_or(MessagingError::CallbackPoolExhausted(self.allocated))
    }

    /// Undo a schedule whose RunCallback never reached the queue
    fn recycle(&mut self, index: SlotIndex) {
        if let Some(slot) = self.arena.slot(index) {
            slot.state.store(FREE, Ordering::Release);
        }
        self.clear(index);
    }

    /// Drop the stored closure and put the slot on the free list
    fn clear(&mut self, index: SlotIndex) {
        if let Some(slot) = self.arena.slot(index) {
            // SAFETY: the slot is FREE, so the audio thread no longer
            // touches it.
            let work = unsafe { (*slot.work.get()).take() };
            drop(work);
        }
        self.free.push(index);
    }

    /// Allocate one more chunk. Returns `false` at the ceiling.
    fn add_chunk(&mut self) -> bool {
        let chunk = self.allocated / CHUNK_SIZE;
        let Some(cell) = self.arena.chunks.get(chunk) else {
            return false;
        };

        let slots: Box<[Slot]> = (0..CHUNK_SIZE).map(|_| Slot::new()).collect();
        if cell.set(slots).is_err() {
            return false;
        }

        let first = self.allocated;
        self.allocated += CHUNK_SIZE;
        // Reversed so the lowest index is handed out first
        self.free
            .extend((first..self.allocated).rev().map(|raw| SlotIndex(raw as u32)));

        if first > 0 {
            log::debug!("Callback pool grew to {} slots", self.allocated);
        }
        true
    }
}

/// Audio-thread side of the callback slots
pub struct CallbackRunner {
    arena: Arc<SlotArena>,
}

impl CallbackRunner {
    /// Run the closure stored in `index` against the engine state
    ///
    /// Returns `false` if the slot was not pending (unknown index or
    /// already run); nothing is executed in that case.
    #[inline]
    pub fn run(&self, index: SlotIndex, state: &mut EngineState) -> bool {
        let Some(slot) = self.arena.slot(index) else {
            return false;
        };
        if slot.state.load(Ordering::Acquire) != PENDING {
            return false;
        }

        // SAFETY: PENDING slots belong to the audio thread until it
        // publishes RETURNING below.
        let work = unsafe { &mut *slot.work.get() };
        if let Some(callback) = work.as_mut() {
            callback(state);
        }

        slot.state.store(RETURNING, Ordering::Release);
        true
    }

    /// Record that the return message for `index` could not be queued
    #[inline]
    pub fn mark_orphaned(&self, index: SlotIndex) {
        if let Some(slot) = self.arena.slot(index) {
            slot.state.store(ORPHANED, Ordering::Release);
        }
    }
}
