//! Opaque interface handle returned by `Open`/`IfCreate` (spec §6.1).
//!
//! Backed by a process-wide monotonic counter rather than a table index, so
//! a handle is never reused: once an interface closes, its handle value is
//! retired for good. This is what the "no ABA on handle" testable property
//! relies on — `intnet-service`'s handle table never has to distinguish "my
//! stale handle from three opens ago" from "a fresh handle that happens to
//! reuse the same slot".

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfHandle(u64);

impl IfHandle {
    /// Sentinel meaning "no interface", used as the zero value of a handle
    /// field before `Open` succeeds.
    pub const INVALID: IfHandle = IfHandle(0);

    pub fn next() -> Self {
        IfHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for IfHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_handles_never_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let h = IfHandle::next();
            assert!(h.is_valid());
            assert!(seen.insert(h), "handle {:?} reused", h);
        }
    }
}
