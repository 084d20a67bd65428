//! Explicit thread-identity tokens
//!
//! Every thread gets a small non-zero token the first time it asks for one.
//! [`ThreadRoles`] records which token currently plays the audio role and
//! which plays the control role, so thread-restricted entry points can
//! check their caller without a process-wide singleton.
//!
//! Token lookup and role checks are a thread-local read plus an atomic
//! load: safe to call from the audio thread.

use std::cell::Cell;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

/// Identity of one OS thread for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(NonZeroU64);

impl ThreadToken {
    /// Token of the calling thread
    pub fn current() -> Self {
        CURRENT.with(|cell| {
            let token = match cell.get() {
                0 => {
                    let fresh = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
                    cell.set(fresh);
                    fresh
                }
                existing => existing,
            };
            // Tokens start at 1 and a u64 counter does not wrap in practice
            ThreadToken(NonZeroU64::new(token).unwrap_or(NonZeroU64::MIN))
        })
    }

    fn raw(self) -> u64 {
        self.0.get()
    }
}

/// The restricted execution contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// The real-time render thread
    Audio,
    /// The messaging control thread
    Control,
}

impl std::fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// Which thread currently holds each role (0 = unbound)
#[derive(Debug, Default)]
pub struct ThreadRoles {
    audio: AtomicU64,
    control: AtomicU64,
}

impl ThreadRoles {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, role: ThreadRole) -> &AtomicU64 {
        match role {
            ThreadRole::Audio => &self.audio,
            ThreadRole::Control => &self.control,
        }
    }

    /// Assign `role` to the calling thread
    pub fn bind_current(&self, role: ThreadRole) {
        self.slot(role).store(ThreadToken::current().raw(), Ordering::Release);
    }

    /// Release `role` so another thread may take it
    pub fn clear(&self, role: ThreadRole) {
        self.slot(role).store(0, Ordering::Release);
    }

    /// Whether any thread holds `role`
    pub fn is_bound(&self, role: ThreadRole) -> bool {
        self.slot(role).load(Ordering::Acquire) != 0
    }

    /// Whether the calling thread holds `role`
    #[inline]
    pub fn is_current(&self, role: ThreadRole) -> bool {
        self.slot(role).load(Ordering::Acquire) == ThreadToken::current().raw()
    }

    /// Claim `role` for the calling thread if unbound
    ///
    /// Returns `true` when the calling thread now holds the role, `false`
    /// when another thread already does.
    #[inline]
    pub fn claim_or_check(&self, role: ThreadRole) -> bool {
        let me = ThreadToken::current().raw();
        match self
            .slot(role)
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(holder) => holder == me,
        }
    }
}
