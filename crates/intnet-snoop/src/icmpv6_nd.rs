//! ICMPv6 Neighbor Discovery snooping: Neighbor Solicitation/Advertisement
//! source/target address learning (spec §4.7).

use std::net::Ipv6Addr;

use intnet_wire::Mac;

use crate::eth::ETH_HDR_LEN;

const IPV6_HDR_LEN: usize = 40;
const IPV6_NEXT_HEADER_OFF: usize = ETH_HDR_LEN + 6;
const IPV6_SRC_OFF: usize = ETH_HDR_LEN + 8;
const IPV6_DST_OFF: usize = IPV6_SRC_OFF + 16;
const NEXT_HEADER_ICMPV6: u8 = 58;

const ICMPV6_TYPE_OFF: usize = ETH_HDR_LEN + IPV6_HDR_LEN;
const ICMPV6_ROUTER_SOLICIT: u8 = 133;
const ICMPV6_ROUTER_ADVERT: u8 = 134;
const ICMPV6_NEIGHBOR_SOLICIT: u8 = 135;
const ICMPV6_NEIGHBOR_ADVERT: u8 = 136;

const ND_TARGET_OFF: usize = ICMPV6_TYPE_OFF + 8;
const NS_NA_OPTIONS_OFF: usize = ND_TARGET_OFF + 16;
/// RS carries type/code/checksum/reserved(4), no target, before options.
const RS_OPTIONS_OFF: usize = ICMPV6_TYPE_OFF + 8;
/// RA carries type/code/checksum/hop_limit/flags/lifetime(2)/reachable(4)/
/// retrans(4) before options.
const RA_OPTIONS_OFF: usize = ICMPV6_TYPE_OFF + 16;

const OPT_SOURCE_LINK_LAYER_ADDR: u8 = 1;
const OPT_TARGET_LINK_LAYER_ADDR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdObservation {
    pub ip: Ipv6Addr,
    pub mac: Mac,
}

pub fn ipv6_src(frame: &[u8]) -> Option<Ipv6Addr> {
    let b: [u8; 16] = frame.get(IPV6_SRC_OFF..IPV6_SRC_OFF + 16)?.try_into().ok()?;
    Some(Ipv6Addr::from(b))
}

pub fn ipv6_dst(frame: &[u8]) -> Option<Ipv6Addr> {
    let b: [u8; 16] = frame.get(IPV6_DST_OFF..IPV6_DST_OFF + 16)?.try_into().ok()?;
    Some(Ipv6Addr::from(b))
}

fn nd_target(frame: &[u8]) -> Option<Ipv6Addr> {
    let b: [u8; 16] = frame.get(ND_TARGET_OFF..ND_TARGET_OFF + 16)?.try_into().ok()?;
    Some(Ipv6Addr::from(b))
}

/// Scans ND options (bounded: these message types carry at most a handful)
/// starting at `options_off` for a link-layer address option of the given
/// type.
fn find_link_layer_option(frame: &[u8], options_off: usize, want_type: u8) -> Option<Mac> {
    option_offsets(frame, options_off)
        .find(|&(_, opt_type, opt_len)| opt_type == want_type && opt_len >= 8)
        .map(|(opt_off, _, _)| Mac::from_bytes(frame[opt_off + 2..opt_off + 8].try_into().unwrap()))
}

/// Iterates `(option_offset, option_type, option_len_bytes)` triples over
/// an ND option chain, bounded so a truncated or malicious chain can't loop
/// forever.
fn option_offsets(frame: &[u8], options_off: usize) -> impl Iterator<Item = (usize, u8, usize)> + '_ {
    const MAX_OPTIONS_SCANNED: usize = 16;
    let mut off = options_off;
    let mut scanned = 0;
    std::iter::from_fn(move || {
        if off + 2 > frame.len() || scanned >= MAX_OPTIONS_SCANNED {
            return None;
        }
        scanned += 1;
        let opt_type = frame[off];
        let opt_len_words = frame[off + 1] as usize;
        if opt_len_words == 0 {
            return None;
        }
        let opt_len = opt_len_words * 8;
        if off + opt_len > frame.len() {
            return None;
        }
        let this_off = off;
        off += opt_len;
        Some((this_off, opt_type, opt_len))
    })
}

/// Observes the address binding a Neighbor/Router Solicitation or
/// Advertisement reveals: for NS/RS, the sender's own (IPv6 source,
/// source-link-layer) pair; for NA, the (target, target-link-layer) pair
/// being announced; for RA, the router's own (source, source-link-layer)
/// pair.
pub fn snoop(frame: &[u8]) -> Option<NdObservation> {
    if frame.get(IPV6_NEXT_HEADER_OFF).copied() != Some(NEXT_HEADER_ICMPV6) {
        return None;
    }
    let icmp_type = *frame.get(ICMPV6_TYPE_OFF)?;
    match icmp_type {
        ICMPV6_NEIGHBOR_SOLICIT => {
            let ip = ipv6_src(frame)?;
            if ip.is_unspecified() {
                return None;
            }
            let mac = find_link_layer_option(frame, NS_NA_OPTIONS_OFF, OPT_SOURCE_LINK_LAYER_ADDR)?;
            Some(NdObservation { ip, mac })
        }
        ICMPV6_NEIGHBOR_ADVERT => {
            let ip = nd_target(frame)?;
            let mac = find_link_layer_option(frame, NS_NA_OPTIONS_OFF, OPT_TARGET_LINK_LAYER_ADDR)?;
            Some(NdObservation { ip, mac })
        }
        ICMPV6_ROUTER_SOLICIT => {
            let ip = ipv6_src(frame)?;
            if ip.is_unspecified() {
                return None;
            }
            let mac = find_link_layer_option(frame, RS_OPTIONS_OFF, OPT_SOURCE_LINK_LAYER_ADDR)?;
            Some(NdObservation { ip, mac })
        }
        ICMPV6_ROUTER_ADVERT => {
            let ip = ipv6_src(frame)?;
            let mac = find_link_layer_option(frame, RA_OPTIONS_OFF, OPT_SOURCE_LINK_LAYER_ADDR)?;
            Some(NdObservation { ip, mac })
        }
        _ => None,
    }
}

/// A Neighbor Solicitation with an unspecified source is a Duplicate
/// Address Detection probe; returns the tentative address being probed.
pub fn dad_target(frame: &[u8]) -> Option<Ipv6Addr> {
    if frame.get(IPV6_NEXT_HEADER_OFF).copied() != Some(NEXT_HEADER_ICMPV6) {
        return None;
    }
    if *frame.get(ICMPV6_TYPE_OFF)? != ICMPV6_NEIGHBOR_SOLICIT {
        return None;
    }
    if !ipv6_src(frame)?.is_unspecified() {
        return None;
    }
    nd_target(frame)
}

/// Rewrites every link-layer-address option equal to `from` to `to`, across
/// whichever ND message type `frame` is. Used on egress under
/// shared-MAC-on-wire mode so a guest's own MAC never appears in an ND
/// option once the Ethernet source has been rewritten to the host's.
/// Returns whether anything was rewritten.
pub fn rewrite_link_layer_addrs(frame: &mut [u8], from: Mac, to: Mac) -> bool {
    if frame.get(IPV6_NEXT_HEADER_OFF).copied() != Some(NEXT_HEADER_ICMPV6) {
        return false;
    }
    let options_off = match frame.get(ICMPV6_TYPE_OFF).copied() {
        Some(ICMPV6_NEIGHBOR_SOLICIT) | Some(ICMPV6_NEIGHBOR_ADVERT) => NS_NA_OPTIONS_OFF,
        Some(ICMPV6_ROUTER_SOLICIT) => RS_OPTIONS_OFF,
        Some(ICMPV6_ROUTER_ADVERT) => RA_OPTIONS_OFF,
        _ => return false,
    };
    let hits: Vec<usize> = option_offsets(frame, options_off)
        .filter(|&(opt_off, opt_type, opt_len)| {
            opt_len >= 8
                && (opt_type == OPT_SOURCE_LINK_LAYER_ADDR || opt_type == OPT_TARGET_LINK_LAYER_ADDR)
                && &frame[opt_off + 2..opt_off + 8] == from.as_bytes()
        })
        .map(|(opt_off, _, _)| opt_off)
        .collect();
    for opt_off in &hits {
        frame[opt_off + 2..opt_off + 8].copy_from_slice(to.as_bytes());
    }
    !hits.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_ns(src_ip: Ipv6Addr, target: Ipv6Addr, sll_mac: Mac) -> Vec<u8> {
        let mut f = vec![0u8; NS_NA_OPTIONS_OFF + 8];
        f[12..14].copy_from_slice(&crate::eth::ETHERTYPE_IPV6.to_be_bytes());
        f[IPV6_NEXT_HEADER_OFF] = NEXT_HEADER_ICMPV6;
        f[IPV6_SRC_OFF..IPV6_SRC_OFF + 16].copy_from_slice(&src_ip.octets());
        f[ICMPV6_TYPE_OFF] = ICMPV6_NEIGHBOR_SOLICIT;
        f[ND_TARGET_OFF..ND_TARGET_OFF + 16].copy_from_slice(&target.octets());
        f[NS_NA_OPTIONS_OFF] = OPT_SOURCE_LINK_LAYER_ADDR;
        f[NS_NA_OPTIONS_OFF + 1] = 1; // 8 bytes
        f[NS_NA_OPTIONS_OFF + 2..NS_NA_OPTIONS_OFF + 8].copy_from_slice(sll_mac.as_bytes());
        f
    }

    #[test]
    fn neighbor_solicitation_yields_source_binding() {
        let mac = Mac([2, 1, 2, 3, 4, 5]);
        let src = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let frame = build_ns(src, Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2), mac);
        let obs = snoop(&frame).unwrap();
        assert_eq!(obs.ip, src);
        assert_eq!(obs.mac, mac);
    }

    #[test]
    fn non_icmpv6_ipv6_frame_ignored() {
        let mut frame = vec![0u8; NS_NA_OPTIONS_OFF + 8];
        frame[12..14].copy_from_slice(&crate::eth::ETHERTYPE_IPV6.to_be_bytes());
        frame[IPV6_NEXT_HEADER_OFF] = 6; // TCP, not ICMPv6
        assert!(snoop(&frame).is_none());
    }

    fn build_rs(src_ip: Ipv6Addr, sll_mac: Mac) -> Vec<u8> {
        let mut f = vec![0u8; RS_OPTIONS_OFF + 8];
        f[12..14].copy_from_slice(&crate::eth::ETHERTYPE_IPV6.to_be_bytes());
        f[IPV6_NEXT_HEADER_OFF] = NEXT_HEADER_ICMPV6;
        f[IPV6_SRC_OFF..IPV6_SRC_OFF + 16].copy_from_slice(&src_ip.octets());
        f[ICMPV6_TYPE_OFF] = ICMPV6_ROUTER_SOLICIT;
        f[RS_OPTIONS_OFF] = OPT_SOURCE_LINK_LAYER_ADDR;
        f[RS_OPTIONS_OFF + 1] = 1;
        f[RS_OPTIONS_OFF + 2..RS_OPTIONS_OFF + 8].copy_from_slice(sll_mac.as_bytes());
        f
    }

    fn build_ra(src_ip: Ipv6Addr, sll_mac: Mac) -> Vec<u8> {
        let mut f = vec![0u8; RA_OPTIONS_OFF + 8];
        f[12..14].copy_from_slice(&crate::eth::ETHERTYPE_IPV6.to_be_bytes());
        f[IPV6_NEXT_HEADER_OFF] = NEXT_HEADER_ICMPV6;
        f[IPV6_SRC_OFF..IPV6_SRC_OFF + 16].copy_from_slice(&src_ip.octets());
        f[ICMPV6_TYPE_OFF] = ICMPV6_ROUTER_ADVERT;
        f[RA_OPTIONS_OFF] = OPT_SOURCE_LINK_LAYER_ADDR;
        f[RA_OPTIONS_OFF + 1] = 1;
        f[RA_OPTIONS_OFF + 2..RA_OPTIONS_OFF + 8].copy_from_slice(sll_mac.as_bytes());
        f
    }

    #[test]
    fn router_solicitation_yields_source_binding() {
        let mac = Mac([2, 1, 2, 3, 4, 6]);
        let src = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 3);
        let frame = build_rs(src, mac);
        let obs = snoop(&frame).unwrap();
        assert_eq!(obs.ip, src);
        assert_eq!(obs.mac, mac);
    }

    #[test]
    fn router_advertisement_yields_router_binding() {
        let mac = Mac([2, 1, 2, 3, 4, 7]);
        let src = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 4);
        let frame = build_ra(src, mac);
        let obs = snoop(&frame).unwrap();
        assert_eq!(obs.ip, src);
        assert_eq!(obs.mac, mac);
    }

    #[test]
    fn unspecified_source_ns_is_dad_probe() {
        let target = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 9);
        let frame = build_ns(Ipv6Addr::UNSPECIFIED, target, Mac([2, 0, 0, 0, 0, 1]));
        assert_eq!(dad_target(&frame), Some(target));
        assert!(snoop(&frame).is_none());
    }

    #[test]
    fn non_dad_ns_has_no_dad_target() {
        let frame = build_ns(
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2),
            Mac([2, 0, 0, 0, 0, 1]),
        );
        assert_eq!(dad_target(&frame), None);
    }

    #[test]
    fn rewrite_link_layer_addrs_replaces_matching_source_option() {
        let guest = Mac([2, 1, 2, 3, 4, 5]);
        let host = Mac([2, 9, 9, 9, 9, 9]);
        let mut frame = build_ns(
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2),
            guest,
        );
        assert!(rewrite_link_layer_addrs(&mut frame, guest, host));
        assert_eq!(snoop(&frame).unwrap().mac, host);
        assert!(!rewrite_link_layer_addrs(&mut frame, guest, host));
    }
}
