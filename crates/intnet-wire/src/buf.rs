//! `IntNetBuf`: the per-interface pair of rings plus the statistics that
//! don't belong to either ring alone (spec §3.1).

use std::sync::atomic::{AtomicU64, Ordering};

use intnet_ring::{RingBuf, RingStats};

/// Combined snapshot of everything `IntNetBuf` tracks. `recv`/`send` mirror
/// the underlying rings' own counters; `yields` and `lost` are this
/// object's own (the former incremented by a writer that had to retry
/// against a full ring, the latter by whoever had to drop a frame outright
/// rather than retry — e.g. the trunk's non-blocking delivery path).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufStats {
    pub recv: RingStats,
    pub send: RingStats,
    pub yields: u64,
    pub lost: u64,
}

pub struct IntNetBuf {
    /// Frames moving from the switch towards this interface (what a guest
    /// reads).
    pub recv: RingBuf,
    /// Frames moving from this interface towards the switch (what a guest
    /// writes).
    pub send: RingBuf,
    yields: AtomicU64,
    lost: AtomicU64,
}

impl IntNetBuf {
    pub fn new(recv_capacity: u32, send_capacity: u32) -> Self {
        Self {
            recv: RingBuf::new(recv_capacity),
            send: RingBuf::new(send_capacity),
            yields: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    pub fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, count: u64) {
        self.lost.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BufStats {
        BufStats {
            recv: self.recv.stats(),
            send: self.send.stats(),
            yields: self.yields.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}
