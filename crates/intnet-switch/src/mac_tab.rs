//! Per-network MAC learning table (spec §3.1, §4.3; original `MacTab`).
//!
//! Keyed by interface rather than by MAC: two interfaces legitimately
//! sharing a MAC (a bridged pair, a failover pair) must both stay
//! reachable, so lookups that need "the" owner of a MAC (`lookup`) return
//! the first match and callers needing every owner use `lookup_all`. Also
//! carries the trunk's host-stack/wire activity and promiscuous-mode
//! flags, which the switching algorithms consult to decide whether the
//! trunk counts as a destination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use intnet_proto::IfHandle;
use intnet_wire::Mac;

#[derive(Debug, Clone, Copy)]
struct MacEntry {
    mac: Mac,
    active: bool,
    promisc_effective: bool,
    promisc_sees_trunk: bool,
}

impl Default for MacEntry {
    fn default() -> Self {
        Self {
            mac: Mac::DUMMY,
            active: false,
            promisc_effective: false,
            promisc_sees_trunk: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct MacTab {
    entries: RwLock<HashMap<IfHandle, MacEntry>>,
    host_active: AtomicBool,
    wire_active: AtomicBool,
    host_promiscuous: AtomicBool,
    wire_promiscuous: AtomicBool,
    n_promisc: AtomicU32,
    n_promisc_no_trunk: AtomicU32,
}

impl MacTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or updates) `handle`'s MAC. Multicast addresses are never
    /// learned as an owned MAC.
    pub fn learn(&self, mac: Mac, handle: IfHandle) {
        if mac.is_multicast() {
            return;
        }
        let mut entries = self.entries.write().unwrap();
        entries.entry(handle).or_default().mac = mac;
    }

    /// The first interface found owning `mac`, for the common case where
    /// exactly one does.
    pub fn lookup(&self, mac: &Mac) -> Option<IfHandle> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .find(|(_, e)| e.mac == *mac)
            .map(|(h, _)| *h)
    }

    /// Every interface owning `mac`, for unicast switching — a duplicate
    /// MAC across interfaces (bridge, failover pair) must reach all of
    /// them, not just the first one found.
    pub fn lookup_all(&self, mac: &Mac) -> Vec<IfHandle> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.mac == *mac)
            .map(|(h, _)| *h)
            .collect()
    }

    /// Drops the entry for `handle`, called when an interface closes.
    pub fn forget_interface(&self, handle: IfHandle) {
        let mut entries = self.entries.write().unwrap();
        entries.remove(&handle);
        drop(entries);
        self.recount_promisc();
    }

    pub fn set_if_active(&self, handle: IfHandle, active: bool) {
        self.entries.write().unwrap().entry(handle).or_default().active = active;
    }

    /// Updates an interface's effective promiscuous mode and whether that
    /// promiscuity extends to trunk-sourced traffic, then re-tallies the
    /// `n_promisc`/`n_promisc_no_trunk` counters the broadcast/unicast
    /// switch paths use to short-circuit the common non-promiscuous case
    /// (§4.5).
    pub fn set_promiscuous(&self, handle: IfHandle, promisc_effective: bool, promisc_sees_trunk: bool) {
        {
            let mut entries = self.entries.write().unwrap();
            let entry = entries.entry(handle).or_default();
            entry.promisc_effective = promisc_effective;
            entry.promisc_sees_trunk = promisc_sees_trunk;
        }
        self.recount_promisc();
    }

    fn recount_promisc(&self) {
        let entries = self.entries.read().unwrap();
        let n_promisc = entries.values().filter(|e| e.promisc_effective).count() as u32;
        let n_promisc_no_trunk = entries
            .values()
            .filter(|e| e.promisc_effective && !e.promisc_sees_trunk)
            .count() as u32;
        drop(entries);
        self.n_promisc.store(n_promisc, Ordering::Relaxed);
        self.n_promisc_no_trunk.store(n_promisc_no_trunk, Ordering::Relaxed);
    }

    pub fn n_promisc(&self) -> u32 {
        self.n_promisc.load(Ordering::Relaxed)
    }

    pub fn n_promisc_no_trunk(&self) -> u32 {
        self.n_promisc_no_trunk.load(Ordering::Relaxed)
    }

    pub fn set_host_active(&self, active: bool) {
        self.host_active.store(active, Ordering::Relaxed);
    }

    pub fn host_active(&self) -> bool {
        self.host_active.load(Ordering::Relaxed)
    }

    pub fn set_wire_active(&self, active: bool) {
        self.wire_active.store(active, Ordering::Relaxed);
    }

    pub fn wire_active(&self) -> bool {
        self.wire_active.load(Ordering::Relaxed)
    }

    pub fn set_host_promiscuous(&self, on: bool) {
        self.host_promiscuous.store(on, Ordering::Relaxed);
    }

    pub fn host_promiscuous(&self) -> bool {
        self.host_promiscuous.load(Ordering::Relaxed)
    }

    pub fn set_wire_promiscuous(&self, on: bool) {
        self.wire_promiscuous.store(on, Ordering::Relaxed);
    }

    pub fn wire_promiscuous(&self) -> bool {
        self.wire_promiscuous.load(Ordering::Relaxed)
    }

    pub fn trunk_active(&self) -> bool {
        self.host_active() || self.wire_active()
    }
}
