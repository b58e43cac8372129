//! Mutexes and events are built on a single atomic word each, and only call into the host when
//! they actually need to block or wake someone up.

use crate::{AmlError, Handler};
use core::sync::atomic::{AtomicU32, Ordering};

/// Passed as a deadline to never block.
pub const NO_WAIT: u64 = 0;
/// Passed as a deadline to block until woken.
pub const WAIT_FOREVER: u64 = u64::MAX;

const MUTEX_LOCKED: u32 = 1 << 0;
const MUTEX_CONTENDED: u32 = 1 << 1;

const EVENT_COUNT_MASK: u32 = 0x7fff_ffff;
const EVENT_WAITERS: u32 = 1 << 31;

/// The state of a mutex or event. The host's `sync_wait` and `sync_wake` are handed a reference to
/// this, and can use its address to key their wait queues.
#[derive(Debug, Default)]
pub struct SyncState {
    value: AtomicU32,
}

impl SyncState {
    pub const fn new() -> SyncState {
        SyncState { value: AtomicU32::new(0) }
    }

    pub fn value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Lock this state as a mutex. Returns `Ok(false)` if the deadline passed before the mutex
    /// could be acquired.
    pub fn lock(&self, handler: &dyn Handler, deadline: u64) -> Result<bool, AmlError> {
        /*
         * Once we've slept on the mutex, we don't know if anyone else is still waiting, so we
         * have to take it in the contended state to make sure they get woken on unlock.
         */
        let mut locked_value = MUTEX_LOCKED;
        let mut value = self.value.load(Ordering::Relaxed);
        loop {
            if value & MUTEX_LOCKED == 0 {
                match self.value.compare_exchange(value, locked_value, Ordering::Acquire, Ordering::Relaxed) {
                    Ok(_) => return Ok(true),
                    Err(actual) => {
                        value = actual;
                        continue;
                    }
                }
            }

            if value & MUTEX_CONTENDED == 0 {
                if let Err(actual) = self.value.compare_exchange(
                    value,
                    MUTEX_LOCKED | MUTEX_CONTENDED,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    value = actual;
                    continue;
                }
            }

            if deadline == NO_WAIT {
                return Ok(false);
            }
            if handler.sync_wait(self, MUTEX_LOCKED | MUTEX_CONTENDED, deadline)? {
                return Ok(false);
            }
            locked_value = MUTEX_LOCKED | MUTEX_CONTENDED;
            value = self.value.load(Ordering::Relaxed);
        }
    }

    pub fn unlock(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        let old = self.value.swap(0, Ordering::Release);
        if old & MUTEX_LOCKED == 0 {
            log::warn!("Unlocking a mutex that isn't locked");
        }
        if old & MUTEX_CONTENDED != 0 {
            handler.sync_wake(self)?;
        }
        Ok(())
    }

    /// Wait on this state as an event. Returns `Ok(false)` if the deadline passed before the event
    /// was signalled.
    pub fn wait(&self, handler: &dyn Handler, deadline: u64) -> Result<bool, AmlError> {
        let mut value = self.value.load(Ordering::Relaxed);
        loop {
            if value & EVENT_COUNT_MASK != 0 {
                match self.value.compare_exchange(value, value - 1, Ordering::Acquire, Ordering::Relaxed) {
                    Ok(_) => return Ok(true),
                    Err(actual) => {
                        value = actual;
                        continue;
                    }
                }
            }

            if value & EVENT_WAITERS == 0 {
                if let Err(actual) =
                    self.value.compare_exchange(value, EVENT_WAITERS, Ordering::Relaxed, Ordering::Relaxed)
                {
                    value = actual;
                    continue;
                }
            }

            if deadline == NO_WAIT {
                return Ok(false);
            }
            if handler.sync_wait(self, EVENT_WAITERS, deadline)? {
                return Ok(false);
            }
            value = self.value.load(Ordering::Relaxed);
        }
    }

    /// Signal this state as an event. If someone is waiting, exactly one of them is woken and
    /// consumes the signal, so the count ends up at zero.
    pub fn signal(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        let mut value = self.value.load(Ordering::Relaxed);
        loop {
            if value & EVENT_WAITERS == 0 {
                // The count saturates.
                if value & EVENT_COUNT_MASK == EVENT_COUNT_MASK {
                    return Ok(());
                }
                match self.value.compare_exchange(value, value + 1, Ordering::Release, Ordering::Relaxed) {
                    Ok(_) => return Ok(()),
                    Err(actual) => value = actual,
                }
            } else {
                /*
                 * Hand a single count over to the waiter we're about to wake. It decrements it
                 * again when it retries, leaving the count at zero.
                 */
                match self.value.compare_exchange(value, 1, Ordering::Release, Ordering::Relaxed) {
                    Ok(_) => return handler.sync_wake(self),
                    Err(actual) => value = actual,
                }
            }
        }
    }

    pub fn reset(&self) {
        let mut value = self.value.load(Ordering::Relaxed);
        loop {
            // With waiters present, the count is already zero.
            if value & EVENT_WAITERS != 0 || value & EVENT_COUNT_MASK == 0 {
                return;
            }
            match self.value.compare_exchange(value, 0, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => value = actual,
            }
        }
    }
}
