//! Busy counters with a folded-in wakeup-request flag (spec §5; original
//! `INTNET_BUSY_WAKEUP_MASK`).
//!
//! An object (interface or trunk) that's mid-delivery increments its busy
//! counter before touching shared state and decrements it after. A thread
//! that needs the object quiescent (teardown, reconnection) sets the
//! wakeup bit and then waits; the last busy holder to leave notices the
//! bit and signals a condvar instead of just decrementing silently.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

use intnet_wire::constants::BUSY_WAKEUP_MASK;

const COUNT_MASK: u32 = !BUSY_WAKEUP_MASK;

pub struct BusyCounter {
    value: AtomicU32,
    quiescent: Mutex<()>,
    condvar: Condvar,
}

/// RAII guard: decrements on drop, including on an early return or panic
/// unwind out of whatever critical section incremented it.
pub struct BusyGuard<'a> {
    counter: &'a BusyCounter,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.counter.leave();
    }
}

impl BusyCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
            quiescent: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    pub fn enter(&self) -> BusyGuard<'_> {
        self.value.fetch_add(1, Ordering::AcqRel);
        BusyGuard { counter: self }
    }

    fn leave(&self) {
        let prev = self.value.fetch_sub(1, Ordering::AcqRel);
        let new_count = (prev - 1) & COUNT_MASK;
        let wakeup_requested = prev & BUSY_WAKEUP_MASK != 0;
        if wakeup_requested && new_count == 0 {
            let _guard = self.quiescent.lock().unwrap();
            self.condvar.notify_all();
        }
    }

    pub fn count(&self) -> u32 {
        self.value.load(Ordering::Acquire) & COUNT_MASK
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    /// Blocks until the counter reaches zero, setting the wakeup bit so
    /// concurrent `leave()` calls know to signal rather than silently
    /// decrement past zero busy holders.
    pub fn wait_for_idle(&self) {
        self.value.fetch_or(BUSY_WAKEUP_MASK, Ordering::AcqRel);
        if self.count() == 0 {
            self.value.fetch_and(!BUSY_WAKEUP_MASK, Ordering::AcqRel);
            return;
        }
        let guard = self.quiescent.lock().unwrap();
        let _guard = self
            .condvar
            .wait_while(guard, |_| self.count() != 0)
            .unwrap();
        self.value.fetch_and(!BUSY_WAKEUP_MASK, Ordering::AcqRel);
    }
}

impl Default for BusyCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn enter_leave_tracks_count() {
        let busy = BusyCounter::new();
        assert!(busy.is_idle());
        let g1 = busy.enter();
        assert_eq!(busy.count(), 1);
        let g2 = busy.enter();
        assert_eq!(busy.count(), 2);
        drop(g1);
        assert_eq!(busy.count(), 1);
        drop(g2);
        assert!(busy.is_idle());
    }

    #[test]
    fn wait_for_idle_returns_immediately_when_already_idle() {
        let busy = BusyCounter::new();
        busy.wait_for_idle();
        assert!(busy.is_idle());
    }

    #[test]
    fn wait_for_idle_wakes_once_last_holder_leaves() {
        let busy = Arc::new(BusyCounter::new());
        let guard = busy.enter();
        let waiter = {
            let busy = busy.clone();
            std::thread::spawn(move || busy.wait_for_idle())
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        waiter.join().unwrap();
        assert!(busy.is_idle());
    }
}
