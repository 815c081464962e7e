//! End-to-end shared-MAC-on-wire round trip: a guest's outbound ARP
//! request gets its source rewritten to the trunk's host MAC on the way
//! out, and an inbound ARP reply gets its target hardware address fixed
//! back up to the real guest MAC on the way in.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use intnet_backend::{Sg, SwitchDecision, TrunkDst, TrunkInterfacePort, TrunkSwitchPort};
use intnet_proto::{InterfaceOpenFlags, NetworkOpenFlags};
use intnet_switch::if_::If;
use intnet_switch::network::Network;
use intnet_switch::switch::Sender;
use intnet_switch::trunk::Trunk;
use intnet_wire::Mac;

const GUEST_MAC: Mac = Mac([0x02, 0, 0, 0, 0, 0xA]);
const HOST_MAC: Mac = Mac([0x02, 0, 0, 0, 0xFF, 0xFF]);
const ROUTER_MAC: Mac = Mac([0x02, 0, 0, 0, 0, 0xBB]);
const GUEST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const ROUTER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

#[derive(Default)]
struct RecordingBackend {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl TrunkInterfacePort for RecordingBackend {
    fn xmit(&self, sg: &Sg<'_>, _dst: TrunkDst) -> bool {
        let mut frame = vec![0u8; sg.total_len()];
        sg.read_into(&mut frame);
        self.sent.lock().unwrap().push(frame);
        true
    }
    fn set_promiscuous_mode(&self, _promiscuous: bool) {}
    fn wait_for_idle(&self, _millies: u32) -> bool {
        true
    }
    fn disconnect_and_release(&self) {}
}

fn arp_frame(eth_dst: Mac, eth_src: Mac, op: u16, sha: Mac, spa: Ipv4Addr, tha: Mac, tpa: Ipv4Addr) -> Vec<u8> {
    let mut f = vec![0u8; 42];
    f[0..6].copy_from_slice(eth_dst.as_bytes());
    f[6..12].copy_from_slice(eth_src.as_bytes());
    f[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
    f[14..16].copy_from_slice(&1u16.to_be_bytes()); // htype ethernet
    f[16..18].copy_from_slice(&0x0800u16.to_be_bytes()); // ptype ipv4
    f[18] = 6; // hlen
    f[19] = 4; // plen
    f[20..22].copy_from_slice(&op.to_be_bytes());
    f[22..28].copy_from_slice(sha.as_bytes());
    f[28..32].copy_from_slice(&spa.octets());
    f[32..38].copy_from_slice(tha.as_bytes());
    f[38..42].copy_from_slice(&tpa.octets());
    f
}

fn setup() -> (Arc<Network>, Arc<If>, Arc<RecordingBackend>, Arc<Trunk>) {
    let net = Network::new("shared", NetworkOpenFlags::SHARED_MAC_ON_WIRE);

    let iface = Arc::new(If::new(
        intnet_proto::IfHandle::next(),
        GUEST_MAC,
        InterfaceOpenFlags::empty(),
        16384,
        16384,
    ));
    net.add_if(iface.clone()).unwrap();
    net.set_active(iface.handle, true);

    let backend = Arc::new(RecordingBackend::default());
    let trunk_backend: Box<dyn TrunkInterfacePort> = Box::new(DelegatingBackend(backend.clone()));
    let trunk = Arc::new(Trunk::new("trunk0", intnet_proto::TrunkType::NetFlt, trunk_backend));
    net.attach_trunk(trunk.clone(), None);
    trunk.report_mac_address(HOST_MAC);

    (net, iface, backend, trunk)
}

/// `Trunk::new` needs to own its backend, but the test wants to keep
/// inspecting what was sent, so this just forwards every call through to
/// a shared `Arc`.
struct DelegatingBackend(Arc<RecordingBackend>);

impl TrunkInterfacePort for DelegatingBackend {
    fn xmit(&self, sg: &Sg<'_>, dst: TrunkDst) -> bool {
        self.0.xmit(sg, dst)
    }
    fn set_promiscuous_mode(&self, promiscuous: bool) {
        self.0.set_promiscuous_mode(promiscuous)
    }
    fn wait_for_idle(&self, millies: u32) -> bool {
        self.0.wait_for_idle(millies)
    }
    fn disconnect_and_release(&self) {
        self.0.disconnect_and_release()
    }
}

#[test]
fn outbound_arp_request_gets_source_rewritten_to_host_mac() {
    let (net, iface, backend, _trunk) = setup();

    let request = arp_frame(
        Mac::BROADCAST,
        GUEST_MAC,
        intnet_snoop::arp::ARP_OP_REQUEST,
        GUEST_MAC,
        GUEST_IP,
        Mac::ZERO,
        ROUTER_IP,
    );
    let mut res = iface.buf.send.allocate_frame(request.len()).unwrap();
    res.payload_mut().copy_from_slice(&request);
    iface.buf.send.commit(res);

    net.pump_send(iface.handle).unwrap();

    let sent = backend.sent.lock().unwrap();
    // Host-stack and wire legs are sent independently now: the host leg
    // keeps the guest's real MAC, only the wire leg gets rewritten.
    assert_eq!(sent.len(), 2);
    assert_eq!(intnet_snoop::eth::src_mac(&sent[0]), Some(GUEST_MAC));
    let wire_out = &sent[1];
    assert_eq!(intnet_snoop::eth::src_mac(wire_out), Some(HOST_MAC));
    let obs = intnet_snoop::arp::snoop(wire_out).unwrap();
    assert_eq!(obs.sender_mac, HOST_MAC);
}

#[test]
fn inbound_arp_reply_gets_target_fixed_up_to_the_real_guest_mac() {
    let (net, iface, _backend, _trunk) = setup();
    net.addr_cache.learn(iface.handle, std::net::IpAddr::V4(GUEST_IP), GUEST_MAC);

    let reply = arp_frame(
        HOST_MAC,
        ROUTER_MAC,
        intnet_snoop::arp::ARP_OP_REPLY,
        ROUTER_MAC,
        ROUTER_IP,
        HOST_MAC,
        GUEST_IP,
    );

    net.recv_from_trunk(&reply, Sender::TrunkWire);

    let frame = iface.buf.recv.next_readable().expect("guest should receive the fixed-up reply");
    let payload = frame.payload().to_vec();
    iface.buf.recv.skip(frame);

    let obs = intnet_snoop::arp::snoop(&payload).unwrap();
    // Without the fix-up this would still read back as HOST_MAC, the
    // value the reply actually carried on the wire.
    assert_ne!(obs.sender_mac, GUEST_MAC);
    assert_eq!(&payload[32..38], GUEST_MAC.as_bytes());
}

#[test]
fn switch_decision_for_unknown_broadcast_is_broadcast_not_drop() {
    let (net, _iface, _backend, _trunk) = setup();
    let dst = intnet_switch::switch::classify(&net, Sender::TrunkWire, &arp_frame(
        Mac::BROADCAST,
        ROUTER_MAC,
        intnet_snoop::arp::ARP_OP_REQUEST,
        ROUTER_MAC,
        ROUTER_IP,
        Mac::ZERO,
        GUEST_IP,
    ));
    assert_eq!(dst.decision(), SwitchDecision::Broadcast);
}
