//! Switching algorithms: classify a frame's destinations against the MAC
//! table (spec §4.3; original `intnetR0NetworkSend*`/`SwitchBroadcast`/
//! `SwitchUnicast`/`SwitchLevel3`).

use std::net::IpAddr;

use intnet_backend::TrunkDst;
use intnet_proto::IfHandle;
use intnet_snoop::eth;
use intnet_wire::Mac;

use crate::dst_tab::DstTab;
use crate::network::Network;

/// Who originated the frame being classified — needed so the destination
/// table never loops a frame back towards its own sender and so the
/// trunk's own directions are masked out of their own traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    If(IfHandle),
    TrunkHost,
    TrunkWire,
}

impl Sender {
    fn is_if(self, handle: IfHandle) -> bool {
        matches!(self, Sender::If(h) if h == handle)
    }

    fn from_trunk(self) -> bool {
        matches!(self, Sender::TrunkHost | Sender::TrunkWire)
    }
}

/// Include every active interface but the sender; the trunk is a
/// destination unless the sender itself came from that direction.
pub fn switch_broadcast(net: &Network, sender: Sender) -> DstTab {
    let mut dst = DstTab::new();
    for iface in net.ifs_snapshot() {
        if !iface.is_active() || sender.is_if(iface.handle) {
            continue;
        }
        dst.add_if(iface.handle);
    }
    let mut legs = TrunkDst::empty();
    if net.mac_tab.host_active() && !matches!(sender, Sender::TrunkHost) {
        legs |= TrunkDst::HOST;
    }
    if net.mac_tab.wire_active() && !matches!(sender, Sender::TrunkWire) {
        legs |= TrunkDst::WIRE;
    }
    dst.set_trunk_dst(legs);
    dst
}

/// Exact MAC match, dummy-MAC interfaces, and effective-promiscuous
/// interfaces (suppressing promiscuous-only delivery of trunk-origin
/// traffic to interfaces that didn't ask to see it once an exact match
/// already exists).
pub fn switch_unicast(net: &Network, dst_mac: &Mac, sender: Sender) -> DstTab {
    let mut dst = DstTab::new();
    let exact_handles: Vec<IfHandle> = net
        .mac_tab
        .lookup_all(dst_mac)
        .into_iter()
        .filter(|h| !sender.is_if(*h))
        .collect();
    let mut exact_hit = false;

    for handle in &exact_handles {
        if let Some(iface) = net.get_if(*handle) {
            if iface.is_active() {
                dst.add_if(*handle);
                exact_hit = true;
            }
        }
    }

    for iface in net.ifs_snapshot() {
        if sender.is_if(iface.handle) || !iface.is_active() || exact_handles.contains(&iface.handle) {
            continue;
        }
        if iface.mac() == Mac::DUMMY {
            dst.add_if(iface.handle);
            continue;
        }
        if iface.is_promiscuous() {
            if exact_hit && sender.from_trunk() && !iface.open_flags().sees_trunk_traffic() {
                continue;
            }
            dst.add_if(iface.handle);
        }
    }

    let mut legs = TrunkDst::empty();
    if net.mac_tab.host_active()
        && (net.mac_tab.host_promiscuous() || *dst_mac == Mac::DUMMY)
        && !matches!(sender, Sender::TrunkHost)
    {
        legs |= TrunkDst::HOST;
    }
    if net.mac_tab.wire_active()
        && (!exact_hit || net.mac_tab.wire_promiscuous())
        && !matches!(sender, Sender::TrunkWire)
    {
        legs |= TrunkDst::WIRE;
    }
    dst.set_trunk_dst(legs);
    dst
}

/// Used only for wire-origin frames under shared-MAC-on-wire: the
/// Ethernet destination is the shared host MAC, so resolve by L3
/// destination address against the network's address cache instead.
/// Falls back to `switch_broadcast` when nothing in the cache claims the
/// address (spec §4.3: "If zero exact hits, fall back to
/// switch_trunk_and_promisc").
pub fn switch_level3(net: &Network, dst_ip: IpAddr) -> DstTab {
    let mut dst = DstTab::new();
    let mut hit = false;

    if let Some((handle, owner_mac)) = net.addr_cache.find_owner(&dst_ip) {
        if let Some(iface) = net.get_if(handle) {
            if iface.is_active() {
                dst.add_if_with_replacement(handle, owner_mac);
                hit = true;
            }
        }
    }

    let delivered = dst.interfaces();
    for iface in net.ifs_snapshot() {
        if delivered.contains(&iface.handle) || !iface.is_active() {
            continue;
        }
        if iface.is_promiscuous() && iface.open_flags().sees_trunk_traffic() {
            dst.add_if(iface.handle);
        }
    }

    if !hit && dst.interfaces().is_empty() {
        return switch_broadcast(net, Sender::TrunkWire);
    }
    dst
}

fn l3_dst_ip(frame: &[u8]) -> Option<IpAddr> {
    match eth::ethertype(frame)? {
        eth::ETHERTYPE_IPV4 => {
            intnet_snoop::ipv4::Ipv4View::parse(frame).map(|v| IpAddr::V4(v.destination()))
        }
        eth::ETHERTYPE_ARP => intnet_snoop::arp::target_ipv4(frame).map(IpAddr::V4),
        _ => None,
    }
}

/// Picks the right algorithm for `frame` given who sent it and the
/// network's current mode, per §4.3's decision table.
pub fn classify(net: &Network, sender: Sender, frame: &[u8]) -> DstTab {
    let Some(dst_mac) = eth::dst_mac(frame) else {
        return DstTab::new();
    };

    if dst_mac.is_multicast() {
        return switch_broadcast(net, sender);
    }

    let shared_mac_on_wire = net
        .flags()
        .contains(intnet_proto::NetworkOpenFlags::SHARED_MAC_ON_WIRE);
    if matches!(sender, Sender::TrunkWire) && shared_mac_on_wire {
        if let Some(ip) = l3_dst_ip(frame) {
            return switch_level3(net, ip);
        }
        return switch_broadcast(net, sender);
    }

    switch_unicast(net, &dst_mac, sender)
}
