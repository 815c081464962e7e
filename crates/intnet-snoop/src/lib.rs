//! Address-family snooping and the MAC-sharing edit path (spec §4.7,
//! §4.8): watches frames leaving a guest interface to learn IP↔MAC
//! bindings for the address cache, and edits ARP/DHCP/ND payloads when the
//! network is in shared-MAC-on-wire mode.

pub mod arp;
pub mod dhcp4;
pub mod eth;
pub mod icmpv6_nd;
pub mod ipv4;

use std::net::IpAddr;

use intnet_wire::Mac;

use eth::{ethertype, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6};

/// One learned (IP, MAC) binding, source-tagged so a caller building an
/// address cache entry can prioritize ARP/ND bindings (explicit) over
/// plain IPv4/IPv6 source-address observations (incidental).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub ip: IpAddr,
    pub mac: Mac,
}

const UDP_SRC_PORT_OFF: usize = 0;
const UDP_DST_PORT_OFF: usize = 2;
const UDP_HDR_LEN: usize = 8;

/// Watches a frame a guest is sending and returns any address binding it
/// reveals (mirrors `intnetR0IfSnoopAddr`'s ethertype dispatch). GSO
/// frames should be snooped with the reassembled header template, not a
/// carved segment.
pub fn snoop_outbound(frame: &[u8]) -> Option<Binding> {
    match ethertype(frame)? {
        ETHERTYPE_ARP => arp::snoop(frame).map(|obs| Binding {
            ip: IpAddr::V4(obs.sender_ip),
            mac: obs.sender_mac,
        }),
        ETHERTYPE_IPV4 => {
            let view = ipv4::Ipv4View::parse(frame)?;
            if !view.verify_checksum() {
                return None;
            }
            let mac = eth::src_mac(frame)?;
            let ip = view.source();
            if ipv4::is_good_source(ip) {
                Some(Binding {
                    ip: IpAddr::V4(ip),
                    mac,
                })
            } else {
                None
            }
        }
        ETHERTYPE_IPV6 => icmpv6_nd::snoop(frame).map(|obs| Binding {
            ip: IpAddr::V6(obs.ip),
            mac: obs.mac,
        }),
        _ => None,
    }
}

/// Watches a frame arriving from the trunk (host stack or wire) for a DHCP
/// lease worth learning, so the address cache picks up a guest's assigned
/// address without waiting for its first outbound ARP.
pub fn snoop_inbound_dhcp(frame: &[u8]) -> Option<dhcp4::DhcpObservation> {
    if ethertype(frame)? != ETHERTYPE_IPV4 {
        return None;
    }
    let view = ipv4::Ipv4View::parse(frame)?;
    if view.protocol() != ipv4::PROTO_UDP {
        return None;
    }
    let udp = view.payload();
    if udp.len() < UDP_HDR_LEN {
        return None;
    }
    let dst_port = u16::from_be_bytes([udp[UDP_DST_PORT_OFF], udp[UDP_DST_PORT_OFF + 1]]);
    let src_port = u16::from_be_bytes([udp[UDP_SRC_PORT_OFF], udp[UDP_SRC_PORT_OFF + 1]]);
    if dst_port != dhcp4::CLIENT_PORT && src_port != dhcp4::SERVER_PORT {
        return None;
    }
    dhcp4::snoop(&udp[UDP_HDR_LEN..])
}

/// Some WiFi drivers deliver every frame addressed to the trunk's shared
/// MAC up through the host stack tagged as an Ethernet broadcast, even
/// though the IPv4 destination carried inside is a specific unicast
/// address. Recognizes that shape so the caller can narrow delivery back
/// down to whichever guest interface actually owns the address, instead of
/// flooding it to every interface on the network.
pub fn looks_broadcast_destination(frame: &[u8]) -> Option<IpAddr> {
    if eth::dst_mac(frame) != Some(Mac::BROADCAST) {
        return None;
    }
    if ethertype(frame)? != ETHERTYPE_IPV4 {
        return None;
    }
    let view = ipv4::Ipv4View::parse(frame)?;
    let dst = view.destination();
    if dst.is_broadcast() || dst.is_multicast() {
        None
    } else {
        Some(IpAddr::V4(dst))
    }
}

/// Applies the shared-MAC-on-wire DHCP broadcast-flag workaround to an
/// outbound DHCPDISCOVER/REQUEST, if this frame is one.
pub fn apply_dhcp_broadcast_workaround(frame: &mut [u8]) -> bool {
    if ethertype(frame) != Some(ETHERTYPE_IPV4) {
        return false;
    }
    let Some(view) = ipv4::Ipv4View::parse(frame) else {
        return false;
    };
    if view.protocol() != ipv4::PROTO_UDP {
        return false;
    }
    let dst_port = {
        let udp = view.payload();
        if udp.len() < UDP_HDR_LEN {
            return false;
        }
        u16::from_be_bytes([udp[UDP_DST_PORT_OFF], udp[UDP_DST_PORT_OFF + 1]])
    };
    if dst_port != dhcp4::SERVER_PORT {
        return false;
    }
    dhcp4::force_broadcast_flag_on_frame(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn snoops_plain_ipv4_source_as_binding() {
        let mut frame = vec![0u8; eth::ETH_HDR_LEN + 20];
        frame[6..12].copy_from_slice(&[2, 1, 2, 3, 4, 5]);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[eth::ETH_HDR_LEN] = 0x45;
        frame[eth::ETH_HDR_LEN + 12..eth::ETH_HDR_LEN + 16]
            .copy_from_slice(&Ipv4Addr::new(10, 0, 0, 9).octets());
        let cksum = intnet_backend::checksum::internet_checksum(&frame[eth::ETH_HDR_LEN..eth::ETH_HDR_LEN + 20]);
        frame[eth::ETH_HDR_LEN + 10] = (cksum >> 8) as u8;
        frame[eth::ETH_HDR_LEN + 11] = (cksum & 0xFF) as u8;

        let binding = snoop_outbound(&frame).unwrap();
        assert_eq!(binding.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(binding.mac, Mac([2, 1, 2, 3, 4, 5]));
    }

    #[test]
    fn bad_ipv4_checksum_yields_no_binding() {
        let mut frame = vec![0u8; eth::ETH_HDR_LEN + 20];
        frame[6..12].copy_from_slice(&[2, 1, 2, 3, 4, 5]);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[eth::ETH_HDR_LEN] = 0x45;
        frame[eth::ETH_HDR_LEN + 12..eth::ETH_HDR_LEN + 16]
            .copy_from_slice(&Ipv4Addr::new(10, 0, 0, 9).octets());
        frame[eth::ETH_HDR_LEN + 10] = 0xAB;
        frame[eth::ETH_HDR_LEN + 11] = 0xCD;

        assert!(snoop_outbound(&frame).is_none());
    }

    #[test]
    fn non_network_frame_yields_no_binding() {
        let frame = vec![0u8; 64];
        assert!(snoop_outbound(&frame).is_none());
    }

    #[test]
    fn broadcast_frame_with_unicast_ipv4_dest_looks_broadcast() {
        let mut frame = vec![0u8; eth::ETH_HDR_LEN + 20];
        frame[0..6].copy_from_slice(Mac::BROADCAST.as_bytes());
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[eth::ETH_HDR_LEN] = 0x45;
        frame[eth::ETH_HDR_LEN + 16..eth::ETH_HDR_LEN + 20]
            .copy_from_slice(&Ipv4Addr::new(10, 0, 0, 9).octets());

        assert_eq!(
            looks_broadcast_destination(&frame),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))
        );
    }

    #[test]
    fn genuinely_broadcast_destination_is_not_flagged() {
        let mut frame = vec![0u8; eth::ETH_HDR_LEN + 20];
        frame[0..6].copy_from_slice(Mac::BROADCAST.as_bytes());
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame[eth::ETH_HDR_LEN] = 0x45;
        frame[eth::ETH_HDR_LEN + 16..eth::ETH_HDR_LEN + 20]
            .copy_from_slice(&Ipv4Addr::BROADCAST.octets());

        assert!(looks_broadcast_destination(&frame).is_none());
    }
}
