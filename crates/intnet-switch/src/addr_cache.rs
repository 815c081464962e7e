//! Per-interface IP→MAC address cache and blacklist (spec §3.1, §4.7).
//!
//! Populated by snooping (`intnet-snoop`) and consulted by the L3 switch
//! path when a network is in shared-MAC-on-wire mode and needs to know
//! which guest interface owns a destination IP address. Keyed by
//! interface rather than globally by IP, bounded to `CAPACITY` bindings
//! per interface with FIFO eviction — a guest that churns through
//! addresses doesn't get to grow the cache without bound, and an evicted
//! binding just falls back to broadcast/promiscuous delivery rather than
//! failing outright. An address the host itself owns is blacklisted so a
//! guest spoofing it never hijacks host-bound traffic.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use intnet_proto::IfHandle;
use intnet_wire::Mac;

/// Per-interface binding capacity before FIFO eviction kicks in.
pub const CAPACITY: usize = 32;

#[derive(Debug, Default)]
pub struct AddrCache {
    per_if: RwLock<HashMap<IfHandle, Vec<(IpAddr, Mac)>>>,
    blacklist: RwLock<std::collections::HashSet<IpAddr>>,
}

impl AddrCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blacklisted(&self, ip: &IpAddr) -> bool {
        self.blacklist.read().unwrap().contains(ip)
    }

    /// Looks up `ip` only within `handle`'s own cache.
    pub fn lookup_for(&self, handle: IfHandle, ip: &IpAddr) -> Option<Mac> {
        if self.is_blacklisted(ip) {
            return None;
        }
        self.per_if
            .read()
            .unwrap()
            .get(&handle)
            .and_then(|entries| entries.iter().find(|(i, _)| i == ip).map(|(_, m)| *m))
    }

    /// Scans every interface's cache for whoever owns `ip`, for the level-3
    /// switch path which doesn't know the owner's handle up front.
    pub fn find_owner(&self, ip: &IpAddr) -> Option<(IfHandle, Mac)> {
        if self.is_blacklisted(ip) {
            return None;
        }
        self.per_if.read().unwrap().iter().find_map(|(handle, entries)| {
            entries.iter().find(|(i, _)| i == ip).map(|(_, m)| (*handle, *m))
        })
    }

    /// Records a learned binding for `handle`. Evicts the oldest entry
    /// (FIFO) if the interface's cache is already at capacity. No-op
    /// (returns `false`) if `ip` is blacklisted.
    pub fn learn(&self, handle: IfHandle, ip: IpAddr, mac: Mac) -> bool {
        if self.is_blacklisted(&ip) {
            return false;
        }
        let mut per_if = self.per_if.write().unwrap();
        let entries = per_if.entry(handle).or_default();
        if let Some(existing) = entries.iter_mut().find(|(i, _)| *i == ip) {
            existing.1 = mac;
            return true;
        }
        if entries.len() >= CAPACITY {
            entries.remove(0);
        }
        entries.push((ip, mac));
        true
    }

    pub fn forget(&self, handle: IfHandle, ip: &IpAddr) {
        if let Some(entries) = self.per_if.write().unwrap().get_mut(&handle) {
            entries.retain(|(i, _)| i != ip);
        }
    }

    /// Drops every binding owned by `handle` — called when an interface
    /// closes so a reused address doesn't keep resolving to a gone MAC.
    pub fn forget_interface(&self, handle: IfHandle) {
        self.per_if.write().unwrap().remove(&handle);
    }

    /// The host stack gained or lost ownership of `addr` — called from the
    /// trunk's `notify_host_address`. Adding blacklists the address and
    /// purges any guest binding for it (a guest spoofing the host's own
    /// address must never shadow it); removing lifts the blacklist.
    pub fn set_host_address(&self, added: bool, addr: IpAddr) {
        if added {
            self.blacklist.write().unwrap().insert(addr);
            for entries in self.per_if.write().unwrap().values_mut() {
                entries.retain(|(i, _)| *i != addr);
            }
        } else {
            self.blacklist.write().unwrap().remove(&addr);
        }
    }

    pub fn clear_blacklist(&self, ip: &IpAddr) {
        self.blacklist.write().unwrap().remove(ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> Mac {
        Mac([2, 0, 0, 0, 0, n])
    }

    #[test]
    fn learns_and_looks_up_binding() {
        let cache = AddrCache::new();
        let h = IfHandle::next();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert!(cache.learn(h, ip, mac(1)));
        assert_eq!(cache.lookup_for(h, &ip), Some(mac(1)));
        assert_eq!(cache.find_owner(&ip), Some((h, mac(1))));
    }

    #[test]
    fn host_address_blacklists_and_purges_guest_bindings() {
        let cache = AddrCache::new();
        let h = IfHandle::next();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(cache.learn(h, ip, mac(1)));
        cache.set_host_address(true, ip);
        assert!(cache.is_blacklisted(&ip));
        assert_eq!(cache.lookup_for(h, &ip), None);
        assert!(!cache.learn(h, ip, mac(1)));
        cache.set_host_address(false, ip);
        assert!(cache.learn(h, ip, mac(1)));
    }

    #[test]
    fn forget_interface_drops_only_its_own_bindings() {
        let cache = AddrCache::new();
        let h1 = IfHandle::next();
        let h2 = IfHandle::next();
        let ip_a: IpAddr = "10.0.0.5".parse().unwrap();
        let ip_b: IpAddr = "10.0.0.6".parse().unwrap();
        cache.learn(h1, ip_a, mac(1));
        cache.learn(h2, ip_b, mac(2));
        cache.forget_interface(h1);
        assert_eq!(cache.lookup_for(h1, &ip_a), None);
        assert_eq!(cache.lookup_for(h2, &ip_b), Some(mac(2)));
    }

    #[test]
    fn capacity_evicts_oldest_binding_first() {
        let cache = AddrCache::new();
        let h = IfHandle::next();
        for i in 0..CAPACITY {
            let ip: IpAddr = format!("10.0.{}.{}", i / 256, i % 256).parse().unwrap();
            assert!(cache.learn(h, ip, mac(1)));
        }
        let first: IpAddr = "10.0.0.0".parse().unwrap();
        assert_eq!(cache.lookup_for(h, &first), Some(mac(1)));

        let overflow: IpAddr = "10.9.9.9".parse().unwrap();
        cache.learn(h, overflow, mac(1));
        assert_eq!(cache.lookup_for(h, &first), None);
        assert_eq!(cache.lookup_for(h, &overflow), Some(mac(1)));
    }
}
