//! The per-network object: interface table, MAC table, address cache,
//! optional trunk, and the big create/open/destroy mutex (spec §3.1, §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use intnet_backend::{Sg, TrunkDst, TrunkInterfacePort};
use intnet_proto::{IfHandle, InterfaceOpenFlags, IntNetError, NetworkOpenFlags, Result, TrunkType};
use intnet_snoop::{apply_dhcp_broadcast_workaround, snoop_outbound};
use intnet_wire::constants::MAX_IFS_PER_NETWORK;
use intnet_wire::Mac;

use crate::addr_cache::AddrCache;
use crate::dst_tab::DstTab;
use crate::if_::If;
use crate::mac_tab::MacTab;
use crate::switch::{self, Sender};
use crate::trunk::Trunk;

/// Builds a replacement trunk backend for the reconnection thread. `None`
/// means this attempt failed and the thread should retry later.
pub type TrunkReconnectFactory = Arc<dyn Fn() -> Option<Box<dyn TrunkInterfacePort>> + Send + Sync>;

/// How often the reconnection thread retries after a failed attempt (§4.5
/// "Reconnection thread").
const RECONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

struct ReconnectState {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

pub struct Network {
    pub name: String,
    flags: RwLock<NetworkOpenFlags>,
    pub mac_tab: MacTab,
    pub addr_cache: AddrCache,
    ifs: RwLock<HashMap<IfHandle, Arc<If>>>,
    n_active: AtomicU32,
    trunk: RwLock<Option<Arc<Trunk>>>,
    /// Name and type of the currently (or most recently) attached trunk,
    /// kept so the reconnection thread can rebuild an equivalent `Trunk`
    /// object around whatever backend its factory hands back.
    trunk_meta: Mutex<Option<(String, TrunkType)>>,
    reconnect_factory: Mutex<Option<TrunkReconnectFactory>>,
    reconnect: Mutex<Option<ReconnectState>>,
    /// Big create/open/destroy mutex (spec §5, lock order position 1):
    /// held only around structural changes, never across a switching
    /// call.
    big_mutex: Mutex<()>,
}

impl Network {
    pub fn new(name: impl Into<String>, flags: NetworkOpenFlags) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            flags: RwLock::new(flags),
            mac_tab: MacTab::new(),
            addr_cache: AddrCache::new(),
            ifs: RwLock::new(HashMap::new()),
            n_active: AtomicU32::new(0),
            trunk: RwLock::new(None),
            trunk_meta: Mutex::new(None),
            reconnect_factory: Mutex::new(None),
            reconnect: Mutex::new(None),
            big_mutex: Mutex::new(()),
        })
    }

    pub fn flags(&self) -> NetworkOpenFlags {
        *self.flags.read().unwrap()
    }

    /// Recomputes the network's effective flags against a newly-opening
    /// interface's requested flags, per §4.5's fixed/exact/as-restrictive
    /// merge rules: each policy pair resolves to whichever side names the
    /// restrictive bit, a pair already `FIXED` rejects any differing
    /// request outright, and `if_flags` lets the opener demand the result
    /// match its own request exactly or be no more permissive than it.
    pub fn merge_open_flags(&self, requested: NetworkOpenFlags, if_flags: InterfaceOpenFlags) -> Result<()> {
        let mut current = self.flags.write().unwrap();
        if *current == requested {
            return Ok(());
        }
        for &(pair, _restrictive, fixed) in NetworkOpenFlags::PAIR_TABLE {
            if current.intersects(fixed) {
                let cur_pair = *current & pair;
                let req_pair = requested & pair;
                if !req_pair.is_empty() && req_pair != cur_pair {
                    return Err(IntNetError::IncompatibleFlags);
                }
            }
        }
        let merged = current.merge_restrictive(requested);
        merged.validate()?;

        if if_flags.contains(InterfaceOpenFlags::REQUIRE_EXACT) {
            for &(pair, _, _) in NetworkOpenFlags::PAIR_TABLE {
                let req_pair = requested & pair;
                if !req_pair.is_empty() && (merged & pair) != req_pair {
                    return Err(IntNetError::IncompatibleFlags);
                }
            }
        }
        if if_flags.contains(InterfaceOpenFlags::REQUIRE_AS_RESTRICTIVE_POLICIES) {
            for &(_, restrictive, _) in NetworkOpenFlags::PAIR_TABLE {
                if requested.contains(restrictive) && !merged.contains(restrictive) {
                    return Err(IntNetError::IncompatibleFlags);
                }
            }
        }

        *current = merged;
        Ok(())
    }

    /// Attaches `trunk` to this network. `factory`, when given, is kept
    /// around so the reconnection thread can rebuild an equivalent trunk
    /// backend if this one later disconnects on its own (§4.5).
    pub fn attach_trunk(
        self: &Arc<Self>,
        trunk: Arc<Trunk>,
        factory: Option<TrunkReconnectFactory>,
    ) {
        let _guard = self.big_mutex.lock().unwrap();
        trunk.bind_network(Arc::downgrade(self));
        *self.trunk_meta.lock().unwrap() = Some((trunk.name.clone(), trunk.trunk_type));
        *self.reconnect_factory.lock().unwrap() = factory;
        let flags = self.flags();
        self.mac_tab.set_host_active(flags.trunk_host_enabled());
        self.mac_tab.set_wire_active(flags.trunk_wire_enabled());
        trunk.set_active(self.active_count() > 0);
        *self.trunk.write().unwrap() = Some(trunk);
    }

    /// Swaps in a trunk rebuilt by the reconnection thread, restoring the
    /// host/wire activity flags to whatever the network's policy allows.
    fn restore_trunk(self: &Arc<Self>, trunk: Arc<Trunk>) {
        let flags = self.flags();
        trunk.bind_network(Arc::downgrade(self));
        *self.trunk.write().unwrap() = Some(trunk.clone());
        self.mac_tab.set_host_active(flags.trunk_host_enabled());
        self.mac_tab.set_wire_active(flags.trunk_wire_enabled());
        trunk.set_active(self.active_count() > 0);
        tracing::info!(network = %self.name, "trunk reconnected");
    }

    /// Spawns the background thread that retries the trunk factory until
    /// it succeeds or the network is torn down (§4.5 "Reconnection
    /// thread"). A no-op if no factory was registered with `attach_trunk`.
    fn spawn_reconnect_thread(self: &Arc<Self>) {
        let factory = match self.reconnect_factory.lock().unwrap().clone() {
            Some(f) => f,
            None => return,
        };
        let Some((name, trunk_type)) = self.trunk_meta.lock().unwrap().clone() else {
            return;
        };
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = stop.clone();
        let net = Arc::downgrade(self);
        let network_name = self.name.clone();
        let handle = std::thread::spawn(move || loop {
            if let Some(backend) = factory() {
                if let Some(network) = net.upgrade() {
                    let trunk = Arc::new(Trunk::new(name.clone(), trunk_type, backend));
                    network.restore_trunk(trunk);
                }
                return;
            }
            let Some(_network) = net.upgrade() else { return };
            tracing::warn!(network = %network_name, "trunk reconnection attempt failed, retrying");
            let (lock, cvar) = &*stop_for_thread;
            let guard = lock.lock().unwrap();
            let (guard, _) = cvar.wait_timeout_while(guard, RECONNECT_RETRY_INTERVAL, |stop| !*stop).unwrap();
            if *guard {
                return;
            }
        });
        *self.reconnect.lock().unwrap() = Some(ReconnectState {
            stop,
            handle: Some(handle),
        });
    }

    /// Signals and joins the reconnection thread, if one is running.
    /// Joining is bounded in practice by the prompt condvar wakeup rather
    /// than a hard deadline, since `std::thread::JoinHandle` has no timed
    /// join.
    fn stop_reconnect_thread(&mut self) {
        let Some(mut state) = self.reconnect.get_mut().unwrap().take() else {
            return;
        };
        {
            let (lock, cvar) = &*state.stop;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
        if let Some(handle) = state.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn trunk(&self) -> Option<Arc<Trunk>> {
        self.trunk.read().unwrap().clone()
    }

    /// Adds a freshly opened interface to the network, learning its MAC
    /// into the table. §4.6's capacity growth is modeled here as a size
    /// check against the hard cap — the backing `HashMap` already grows
    /// incrementally, so there's no fixed-size table to swap.
    pub fn add_if(&self, iface: Arc<If>) -> Result<()> {
        let _guard = self.big_mutex.lock().unwrap();
        let mut ifs = self.ifs.write().unwrap();
        if ifs.len() as u32 >= MAX_IFS_PER_NETWORK {
            return Err(IntNetError::OutOfRange);
        }
        self.mac_tab.learn(iface.mac(), iface.handle);
        self.mac_tab
            .set_promiscuous(iface.handle, iface.is_promiscuous(), iface.open_flags().sees_trunk_traffic());
        ifs.insert(iface.handle, iface);
        Ok(())
    }

    pub fn remove_if(&self, handle: IfHandle) {
        let _guard = self.big_mutex.lock().unwrap();
        if let Some(iface) = self.ifs.write().unwrap().remove(&handle) {
            self.mac_tab.forget_interface(handle);
            self.addr_cache.forget_interface(handle);
            if iface.is_active() {
                self.n_active.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Flips an interface's effective promiscuous mode, keeping the MAC
    /// table's mirrored counters (`n_promisc`/`n_promisc_no_trunk`) in sync
    /// so the switching algorithms don't have to re-derive them per frame.
    pub fn set_promiscuous(&self, handle: IfHandle, on: bool) {
        let Some(iface) = self.get_if(handle) else { return };
        iface.set_promiscuous(on);
        self.mac_tab.set_promiscuous(handle, on, iface.open_flags().sees_trunk_traffic());
    }

    pub fn get_if(&self, handle: IfHandle) -> Option<Arc<If>> {
        self.ifs.read().unwrap().get(&handle).cloned()
    }

    pub fn ifs_snapshot(&self) -> Vec<Arc<If>> {
        self.ifs.read().unwrap().values().cloned().collect()
    }

    pub fn active_count(&self) -> u32 {
        self.n_active.load(Ordering::Acquire)
    }

    /// Flips an interface's active flag and, on a 0↔1 transition of the
    /// network's overall active count, tells the trunk (spec §4.4
    /// `set_active`).
    pub fn set_active(&self, handle: IfHandle, active: bool) {
        let Some(iface) = self.get_if(handle) else { return };
        if iface.is_active() == active {
            return;
        }
        iface.set_active(active);
        self.mac_tab.set_if_active(handle, active);
        let new_count = if active {
            self.n_active.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.n_active.fetch_sub(1, Ordering::AcqRel) - 1
        };
        if let Some(trunk) = self.trunk() {
            trunk.set_active(new_count > 0);
        }
    }

    /// Delivers a classified frame to every interface named in `dst_tab`,
    /// applying each entry's destination-MAC rewrite (the level-3 path's
    /// restore of a shared-MAC-on-wire guest's real MAC) before handing it
    /// off, and counting but not propagating per-interface ring overflows
    /// (spec §4.1: overflow is lossy, never a hard error to the sender).
    pub fn deliver_to_interfaces(&self, dst_tab: &DstTab, frame: &[u8], gso: Option<intnet_backend::GsoContext>) {
        for entry in dst_tab.entries() {
            let Some(iface) = self.get_if(entry.handle) else { continue };
            let mut edited;
            let payload: &[u8] = match entry.replace_dst_mac {
                Some(mac) => {
                    edited = frame.to_vec();
                    intnet_snoop::eth::set_dst_mac(&mut edited, mac);
                    &edited
                }
                None => frame,
            };
            let sg = match gso {
                Some(g) => Sg::new(vec![payload], Some(g)),
                None => Sg::single(payload),
            };
            if iface.deliver(&sg).is_err() {
                iface.buf.record_lost(1);
            }
        }
    }

    /// Drains everything currently queued in `handle`'s send ring: learns
    /// the source MAC the first time it's seen, snoops addresses, applies
    /// the shared-MAC-on-wire DHCP broadcast workaround, classifies, and
    /// delivers (spec §4.4 "send-buffer processing contract").
    pub fn pump_send(self: &Arc<Self>, handle: IfHandle) -> Result<()> {
        let iface = self.get_if(handle).ok_or(IntNetError::InvalidHandle)?;
        loop {
            let Some(frame) = iface.buf.send.next_readable() else {
                break;
            };
            if frame.is_gso() && frame.gso_context().is_none() {
                iface.buf.send.skip(frame);
                continue;
            }

            let gso_ctx = frame.gso_context();
            let mut owned = frame.payload().to_vec();
            iface.buf.send.skip(frame);

            self.learn_source_mac(&iface, &owned);
            if let Some(binding) = snoop_outbound(&owned) {
                self.addr_cache.learn(handle, binding.ip, binding.mac);
            }

            let shared_mac_on_wire = self.flags().contains(NetworkOpenFlags::SHARED_MAC_ON_WIRE);
            let dhcp_force_broadcast = self
                .flags()
                .contains(NetworkOpenFlags::DHCP_FORCE_BROADCAST_FLAG);
            if shared_mac_on_wire && dhcp_force_broadcast {
                apply_dhcp_broadcast_workaround(&mut owned);
            }

            let dst_tab = switch::classify(self, Sender::If(handle), &owned);
            self.deliver_to_interfaces(&dst_tab, &owned, gso_ctx);

            if dst_tab.reaches_trunk() {
                if let Some(trunk) = self.trunk() {
                    let legs = dst_tab.trunk_dst();
                    if legs.contains(TrunkDst::HOST) {
                        let sg = match gso_ctx {
                            Some(gso) => Sg::new(vec![&owned], Some(gso)),
                            None => Sg::single(&owned),
                        };
                        trunk.xmit(&sg, TrunkDst::HOST);
                    }
                    if legs.contains(TrunkDst::WIRE) {
                        let edited = self.edit_for_wire(&owned, shared_mac_on_wire, &trunk);
                        let sg = match gso_ctx {
                            Some(gso) => Sg::new(vec![&edited], Some(gso)),
                            None => Sg::single(&edited),
                        };
                        trunk.xmit(&sg, TrunkDst::WIRE);
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrites the source MAC (and any embedded ARP/ND link-layer
    /// addresses matching it) to the trunk's reported host MAC before the
    /// frame reaches the wire, per §4.7's outbound shared-MAC-on-wire
    /// edit. Returns an owned copy; the original ring payload is never
    /// mutated in place.
    fn edit_for_wire(&self, frame: &[u8], shared_mac_on_wire: bool, trunk: &Trunk) -> Vec<u8> {
        let mut out = frame.to_vec();
        if !shared_mac_on_wire {
            return out;
        }
        let host_mac = trunk.host_mac();
        if host_mac.is_zero() {
            return out;
        }
        if let Some(src) = intnet_snoop::eth::src_mac(&out) {
            if src != host_mac {
                intnet_snoop::eth::set_src_mac(&mut out, host_mac);
                intnet_snoop::arp::rewrite_sender_hw_addr(&mut out, host_mac);
                intnet_snoop::icmpv6_nd::rewrite_link_layer_addrs(&mut out, src, host_mac);
            }
        }
        out
    }

    fn learn_source_mac(&self, iface: &If, frame: &[u8]) {
        if iface.mac() != Mac::DUMMY {
            return;
        }
        let Some(src) = intnet_snoop::eth::src_mac(frame) else {
            return;
        };
        if src.is_multicast() {
            return;
        }
        iface.set_mac(src);
        self.mac_tab.learn(src, iface.handle);
    }

    /// Delivers a frame arriving from the trunk (host stack or wire) into
    /// the network, applying (in order) the WiFi broadcast-delivery
    /// workaround, the inbound shared-MAC-on-wire ARP-reply fix-up, a
    /// Duplicate Address Detection cache purge, and DHCP lease learning
    /// (§4.7, §4.8) before classification.
    pub fn recv_from_trunk(&self, frame: &[u8], src: Sender) {
        let mut owned = frame.to_vec();
        let shared_mac_on_wire = self.flags().contains(NetworkOpenFlags::SHARED_MAC_ON_WIRE);

        // Some WiFi drivers hand every frame addressed to the trunk's
        // shared MAC up as an Ethernet broadcast even when the IPv4
        // destination inside is a specific guest's address; narrow
        // delivery back down to that guest instead of flooding the
        // network.
        if shared_mac_on_wire && matches!(src, Sender::TrunkWire) {
            if let Some(dst_ip) = intnet_snoop::looks_broadcast_destination(&owned) {
                if let Some((_, real_mac)) = self.addr_cache.find_owner(&dst_ip) {
                    intnet_snoop::eth::set_dst_mac(&mut owned, real_mac);
                }
            }
        }

        if shared_mac_on_wire {
            if let (Some(trunk), Some(obs)) = (self.trunk(), intnet_snoop::arp::snoop(&owned)) {
                let host_mac = trunk.host_mac();
                if !host_mac.is_zero() {
                    let target_ip = intnet_snoop::arp::target_ipv4(&owned).unwrap_or(obs.sender_ip);
                    if let Some((_, real_mac)) = self.addr_cache.find_owner(&std::net::IpAddr::V4(target_ip)) {
                        intnet_snoop::arp::rewrite_target_hw_addr(&mut owned, real_mac);
                        intnet_snoop::eth::set_src_mac(&mut owned, obs.sender_mac);
                    }
                }
            }
            // A Duplicate Address Detection probe for an address this
            // cache still claims on behalf of some guest means that
            // binding is stale enough to be in dispute; drop it rather
            // than keep routing to an owner who may no longer hold it.
            if let Some(target) = intnet_snoop::icmpv6_nd::dad_target(&owned) {
                let target_ip = std::net::IpAddr::V6(target);
                if let Some((owner, _)) = self.addr_cache.find_owner(&target_ip) {
                    self.addr_cache.forget(owner, &target_ip);
                }
            }
        }

        if let Some(obs) = intnet_snoop::snoop_inbound_dhcp(&owned) {
            self.apply_dhcp_observation(obs);
        }

        let dst_tab = switch::classify(self, src, &owned);
        self.deliver_to_interfaces(&dst_tab, &owned, None);
    }

    /// Learns a DHCP lease offered or acknowledged to a known guest, so the
    /// address cache picks up its address without waiting for the guest's
    /// first outbound ARP (§4.8).
    fn apply_dhcp_observation(&self, obs: intnet_snoop::dhcp4::DhcpObservation) {
        use intnet_snoop::dhcp4::MessageType;
        if !matches!(obs.msg_type, MessageType::Offer | MessageType::Ack) {
            return;
        }
        if obs.offered_ip.is_unspecified() {
            return;
        }
        let Some(handle) = self.mac_tab.lookup(&obs.client_mac) else {
            return;
        };
        self.addr_cache
            .learn(handle, std::net::IpAddr::V4(obs.offered_ip), obs.client_mac);
    }

    pub fn on_trunk_disconnect(self: &Arc<Self>) {
        self.mac_tab.set_host_active(false);
        self.mac_tab.set_wire_active(false);
        tracing::warn!(network = %self.name, "trunk disconnected, starting reconnection thread");
        self.spawn_reconnect_thread();
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.stop_reconnect_thread();
    }
}
