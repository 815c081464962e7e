//! ARP (IPv4) snooping and sender-hardware-address rewriting (spec §4.7;
//! original `intnetR0IfSnoopArpAddr`/`intnetR0TrunkIfSnoopArp`).

use std::net::Ipv4Addr;

use intnet_wire::Mac;

use crate::eth::ETH_HDR_LEN;

const ARP_HLEN_OFF: usize = ETH_HDR_LEN + 4;
const ARP_OPER_OFF: usize = ETH_HDR_LEN + 6;
const ARP_SHA_OFF: usize = ETH_HDR_LEN + 8;
const ARP_SPA_OFF: usize = ETH_HDR_LEN + 14;
const ARP_THA_OFF: usize = ETH_HDR_LEN + 18;
const ARP_TPA_OFF: usize = ETH_HDR_LEN + 24;
const ARP_IPV4_LEN: usize = ETH_HDR_LEN + 28;

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_HLEN_ETHERNET: u8 = 6;
const ARP_PLEN_IPV4: u8 = 4;

pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpObservation {
    pub sender_mac: Mac,
    pub sender_ip: Ipv4Addr,
    pub op: u16,
}

fn is_arp_ipv4(frame: &[u8]) -> bool {
    if frame.len() < ARP_IPV4_LEN {
        return false;
    }
    let htype = u16::from_be_bytes([frame[ETH_HDR_LEN], frame[ETH_HDR_LEN + 1]]);
    let ptype = u16::from_be_bytes([frame[ETH_HDR_LEN + 2], frame[ETH_HDR_LEN + 3]]);
    htype == ARP_HTYPE_ETHERNET
        && ptype == ARP_PTYPE_IPV4
        && frame[ARP_HLEN_OFF] == ARP_HLEN_ETHERNET
        && frame[ARP_HLEN_OFF + 1] == ARP_PLEN_IPV4
}

/// Extracts the sender protocol/hardware address pair a switch should
/// learn from this ARP packet, if it parses as Ethernet/IPv4 ARP.
pub fn snoop(frame: &[u8]) -> Option<ArpObservation> {
    if !is_arp_ipv4(frame) {
        return None;
    }
    let op = u16::from_be_bytes([frame[ARP_OPER_OFF], frame[ARP_OPER_OFF + 1]]);
    let sender_mac = Mac::from_bytes(frame[ARP_SHA_OFF..ARP_SHA_OFF + 6].try_into().unwrap());
    let sender_ip = Ipv4Addr::new(
        frame[ARP_SPA_OFF],
        frame[ARP_SPA_OFF + 1],
        frame[ARP_SPA_OFF + 2],
        frame[ARP_SPA_OFF + 3],
    );
    Some(ArpObservation {
        sender_mac,
        sender_ip,
        op,
    })
}

/// The target hardware/protocol address an ARP request is asking about,
/// used by the L3 switch path to decide which guest interface (if any)
/// owns `tpa` before forwarding to the trunk.
pub fn target_ipv4(frame: &[u8]) -> Option<Ipv4Addr> {
    if !is_arp_ipv4(frame) {
        return None;
    }
    Some(Ipv4Addr::new(
        frame[ARP_TPA_OFF],
        frame[ARP_TPA_OFF + 1],
        frame[ARP_TPA_OFF + 2],
        frame[ARP_TPA_OFF + 3],
    ))
}

/// Rewrites the sender hardware address field (and, by convention, the
/// Ethernet source address is rewritten separately by the caller) to
/// `mac` — used on egress to the wire under shared-MAC-on-wire mode so the
/// host's real MAC appears as the ARP sender instead of the guest's.
pub fn rewrite_sender_hw_addr(frame: &mut [u8], mac: Mac) -> bool {
    if !is_arp_ipv4(frame) {
        return false;
    }
    frame[ARP_SHA_OFF..ARP_SHA_OFF + 6].copy_from_slice(mac.as_bytes());
    true
}

/// Rewrites the target hardware address field — used on ingress replies
/// under shared-MAC-on-wire mode to restore the real guest MAC the host
/// saw stripped out on the request.
pub fn rewrite_target_hw_addr(frame: &mut [u8], mac: Mac) -> bool {
    if !is_arp_ipv4(frame) {
        return false;
    }
    frame[ARP_THA_OFF..ARP_THA_OFF + 6].copy_from_slice(mac.as_bytes());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_arp_request(sender_mac: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut f = vec![0u8; ARP_IPV4_LEN];
        f[12..14].copy_from_slice(&crate::eth::ETHERTYPE_ARP.to_be_bytes());
        f[ETH_HDR_LEN..ETH_HDR_LEN + 2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
        f[ETH_HDR_LEN + 2..ETH_HDR_LEN + 4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        f[ARP_HLEN_OFF] = ARP_HLEN_ETHERNET;
        f[ARP_HLEN_OFF + 1] = ARP_PLEN_IPV4;
        f[ARP_OPER_OFF..ARP_OPER_OFF + 2].copy_from_slice(&ARP_OP_REQUEST.to_be_bytes());
        f[ARP_SHA_OFF..ARP_SHA_OFF + 6].copy_from_slice(sender_mac.as_bytes());
        f[ARP_SPA_OFF..ARP_SPA_OFF + 4].copy_from_slice(&sender_ip.octets());
        f[ARP_TPA_OFF..ARP_TPA_OFF + 4].copy_from_slice(&target_ip.octets());
        f
    }

    #[test]
    fn snoops_sender_mac_and_ip_from_request() {
        let mac = Mac([0x02, 1, 2, 3, 4, 5]);
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let frame = build_arp_request(mac, ip, Ipv4Addr::new(10, 0, 0, 1));
        let obs = snoop(&frame).unwrap();
        assert_eq!(obs.sender_mac, mac);
        assert_eq!(obs.sender_ip, ip);
        assert_eq!(obs.op, ARP_OP_REQUEST);
    }

    #[test]
    fn rewrite_sender_hw_addr_replaces_guest_mac_with_host_mac() {
        let guest = Mac([0x02, 1, 2, 3, 4, 5]);
        let host = Mac([0x02, 9, 9, 9, 9, 9]);
        let mut frame = build_arp_request(guest, Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1));
        assert!(rewrite_sender_hw_addr(&mut frame, host));
        assert_eq!(snoop(&frame).unwrap().sender_mac, host);
    }

    #[test]
    fn non_arp_frame_is_ignored() {
        let frame = vec![0u8; 40];
        assert!(snoop(&frame).is_none());
    }
}
