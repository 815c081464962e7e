//! The trunk object: wraps a pluggable host/wire backend and implements
//! the switch-facing half of the two-way callback contract (spec §3.1,
//! §4.9; original `INTNETTRUNKIF`).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock, Weak};

use intnet_backend::{Sg, SwitchDecision, TrunkDst, TrunkInterfacePort, TrunkSrc, TrunkSwitchPort};
use intnet_proto::TrunkType;
use intnet_wire::Mac;

use crate::busy::BusyCounter;
use crate::network::Network;
use crate::switch::{self, Sender};

pub struct Trunk {
    pub name: String,
    pub trunk_type: TrunkType,
    backend: Box<dyn TrunkInterfacePort>,
    network: RwLock<Weak<Network>>,
    host_mac: Mutex<Mac>,
    host_promiscuous: AtomicBool,
    gso_host_mask: AtomicU32,
    gso_wire_mask: AtomicU32,
    no_preempt_dsts: AtomicU32,
    /// Guards the destination-table slot pool (spec §5 lock order: ...
    /// trunk destination-table spinlock). There's no real per-CPU pool
    /// here — every classification just builds a fresh `DstTab` — but the
    /// lock is kept so trunk-direction state changes (promiscuous mode,
    /// GSO masks) stay serialized against concurrent `recv` calls.
    dst_tab_lock: Mutex<()>,
    pub busy: BusyCounter,
    disconnecting: AtomicBool,
}

impl Trunk {
    pub fn new(name: impl Into<String>, trunk_type: TrunkType, backend: Box<dyn TrunkInterfacePort>) -> Self {
        Self {
            name: name.into(),
            trunk_type,
            backend,
            network: RwLock::new(Weak::new()),
            host_mac: Mutex::new(Mac::ZERO),
            host_promiscuous: AtomicBool::new(false),
            gso_host_mask: AtomicU32::new(0),
            gso_wire_mask: AtomicU32::new(0),
            no_preempt_dsts: AtomicU32::new(0),
            dst_tab_lock: Mutex::new(()),
            busy: BusyCounter::new(),
            disconnecting: AtomicBool::new(false),
        }
    }

    pub fn bind_network(&self, network: Weak<Network>) {
        *self.network.write().unwrap() = network;
    }

    pub fn host_mac(&self) -> Mac {
        *self.host_mac.lock().unwrap()
    }

    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.backend
            .set_promiscuous_mode(self.host_promiscuous.load(Ordering::Acquire) && active);
    }

    /// Sends `sg` towards the trunk's selected legs, falling back to
    /// software GSO segmentation (spec §4.9 "GSO fallback") if the
    /// backend hasn't reported hardware support for this type on this
    /// direction.
    pub fn xmit(&self, sg: &Sg<'_>, dst: TrunkDst) -> bool {
        if self.is_disconnecting() {
            return false;
        }
        let Some(gso) = sg.gso else {
            return self.backend.xmit(sg, dst);
        };
        let mask = if dst.contains(TrunkDst::WIRE) {
            self.gso_wire_mask.load(Ordering::Acquire)
        } else {
            self.gso_host_mask.load(Ordering::Acquire)
        };
        if mask & gso.gso_type.capability_bit() != 0 {
            return self.backend.xmit(sg, dst);
        }
        let mut full = vec![0u8; sg.total_len()];
        sg.read_into(&mut full);
        let Some(segments) = intnet_backend::segment_frame(&full, &gso) else {
            return false;
        };
        let mut all_ok = true;
        for seg in &segments {
            let seg_sg = Sg::single(seg);
            all_ok &= self.backend.xmit(&seg_sg, dst);
        }
        all_ok
    }

    pub fn disconnect_and_release(&self) {
        self.disconnecting.store(true, Ordering::Release);
        self.busy.wait_for_idle();
        self.backend.disconnect_and_release();
    }
}

impl TrunkSwitchPort for Trunk {
    fn pre_recv(&self, dst_mac: &Mac, _src: TrunkSrc) -> SwitchDecision {
        if self.is_disconnecting() {
            return SwitchDecision::Drop;
        }
        if dst_mac.is_multicast() {
            return SwitchDecision::Broadcast;
        }
        let Some(network) = self.network.read().unwrap().upgrade() else {
            return SwitchDecision::Drop;
        };
        if network.mac_tab.lookup(dst_mac).is_some() {
            SwitchDecision::IntNet
        } else {
            SwitchDecision::Drop
        }
    }

    fn recv(&self, sg: &Sg<'_>, src: TrunkSrc) -> bool {
        let _guard = self.dst_tab_lock.lock().unwrap();
        let Some(network) = self.network.read().unwrap().upgrade() else {
            return true;
        };
        let mut frame = vec![0u8; sg.total_len()];
        sg.read_into(&mut frame);
        let sender = match src {
            TrunkSrc::Host => Sender::TrunkHost,
            TrunkSrc::Wire => Sender::TrunkWire,
        };
        let dst_tab = switch::classify(&network, sender, &frame);
        network.deliver_to_interfaces(&dst_tab, &frame, sg.gso);
        if dst_tab.reaches_trunk() {
            // The frame also needs to cross to the leg it didn't arrive
            // on (e.g. a wire broadcast the host stack should see too).
            let other_leg = match src {
                TrunkSrc::Host => TrunkDst::WIRE,
                TrunkSrc::Wire => TrunkDst::HOST,
            };
            self.xmit(sg, other_leg);
        }
        dst_tab.decision().reaches_intnet() && !dst_tab.reaches_trunk()
    }

    fn report_mac_address(&self, mac: Mac) {
        *self.host_mac.lock().unwrap() = mac;
    }

    fn report_promiscuous_mode(&self, promiscuous: bool) {
        self.host_promiscuous.store(promiscuous, Ordering::Release);
        if let Some(network) = self.network.read().unwrap().upgrade() {
            network.mac_tab.set_host_promiscuous(promiscuous);
        }
    }

    fn report_gso_capabilities(&self, host_mask: u32, wire_mask: u32) {
        self.gso_host_mask.store(host_mask, Ordering::Release);
        self.gso_wire_mask.store(wire_mask, Ordering::Release);
    }

    fn report_no_preempt_dsts(&self, mask: u32) {
        self.no_preempt_dsts.store(mask, Ordering::Release);
    }

    fn notify_host_address(&self, added: bool, addr: std::net::IpAddr) {
        if let Some(network) = self.network.read().unwrap().upgrade() {
            network.addr_cache.set_host_address(added, addr);
        }
    }

    fn disconnect(&self) {
        self.disconnecting.store(true, Ordering::Release);
        if let Some(network) = self.network.read().unwrap().upgrade() {
            network.on_trunk_disconnect();
        }
    }
}
