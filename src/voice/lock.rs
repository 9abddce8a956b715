//! Process-wide speech lock
//!
//! At most one speech-producing component holds the audio session. A new
//! holder preempts the previous one: the previous holder's stop hook runs
//! before `acquire` returns, so the newcomer can start speaking immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

static GLOBAL: LazyLock<AudioSession> = LazyLock::new(AudioSession::new);

/// Stop hook run when a holder is preempted or force-released
type StopHook = Box<dyn Fn() + Send>;

struct Holder {
    id: u64,
    stop: StopHook,
}

#[derive(Default)]
struct Inner {
    holder: Mutex<Option<Holder>>,
    next_id: AtomicU64,
}

/// Handle to a speech lock; clones share the same lock
#[derive(Clone, Default)]
pub struct AudioSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("holder", &self.holder())
            .finish()
    }
}

impl AudioSession {
    /// Create an independent lock (tests, embedded hosts)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock shared by every player in the process
    #[must_use]
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Take the lock, stopping the current holder first
    ///
    /// Returns the lease id to pass to [`release`](Self::release).
    pub fn acquire(&self, on_preempt: impl Fn() + Send + 'static) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.slot().replace(Holder {
            id,
            stop: Box::new(on_preempt),
        });

        if let Some(previous) = previous {
            tracing::debug!(previous = previous.id, next = id, "preempting speech holder");
            (previous.stop)();
        }
        id
    }

    /// Give the lock back if `id` still holds it
    ///
    /// Returns whether anything was released.
    pub fn release(&self, id: u64) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Stop and evict whoever holds the lock
    pub fn force_release(&self) {
        let previous = self.slot().take();
        if let Some(previous) = previous {
            tracing::debug!(holder = previous.id, "force-releasing speech lock");
            (previous.stop)();
        }
    }

    /// Current lease id, if held
    #[must_use]
    pub fn holder(&self) -> Option<u64> {
        self.slot().as_ref().map(|h| h.id)
    }

    /// Whether anyone holds the lock
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Holder>> {
        self.inner
            .holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
