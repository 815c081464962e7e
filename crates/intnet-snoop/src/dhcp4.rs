//! DHCPv4 (BOOTP) snooping, lease learning, and the broadcast-flag
//! workaround (spec §4.8; original `intnetR0NetworkSnoopDhcp`,
//! `RTNET_DHCP_FLAG_BROADCAST` fix-up).

use std::net::Ipv4Addr;

use intnet_wire::Mac;

use crate::ipv4::Ipv4View;

pub const CLIENT_PORT: u16 = 68;
pub const SERVER_PORT: u16 = 67;

const BOOTP_OP_OFF: usize = 0;
const BOOTP_FLAGS_OFF: usize = 10;
const BOOTP_CIADDR_OFF: usize = 12;
const BOOTP_YIADDR_OFF: usize = 16;
const BOOTP_CHADDR_OFF: usize = 28;
const BOOTP_FIXED_LEN: usize = 236;
const BOOTP_MAGIC_OFF: usize = 236;
const BOOTP_OPTIONS_OFF: usize = 240;
const DHCP_MAGIC: [u8; 4] = [99, 130, 83, 99];

const OPT_MESSAGE_TYPE: u8 = 53;
const OPT_END: u8 = 255;
const OPT_PAD: u8 = 0;

const BOOTP_OP_REPLY: u8 = 2;

const FLAG_BROADCAST: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Other(u8),
}

impl MessageType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhcpObservation {
    pub msg_type: MessageType,
    pub client_mac: Mac,
    pub client_ip: Ipv4Addr,
    pub offered_ip: Ipv4Addr,
}

/// A UDP payload view over the fixed BOOTP header; the first `options`
/// bytes after the magic cookie.
struct Bootp<'a> {
    data: &'a [u8],
}

impl<'a> Bootp<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < BOOTP_OPTIONS_OFF || data[BOOTP_MAGIC_OFF..BOOTP_MAGIC_OFF + 4] != DHCP_MAGIC {
            return None;
        }
        Some(Self { data })
    }

    fn chaddr(&self) -> Mac {
        Mac::from_bytes(self.data[BOOTP_CHADDR_OFF..BOOTP_CHADDR_OFF + 6].try_into().unwrap())
    }

    fn ciaddr(&self) -> Ipv4Addr {
        let b = &self.data[BOOTP_CIADDR_OFF..BOOTP_CIADDR_OFF + 4];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    fn yiaddr(&self) -> Ipv4Addr {
        let b = &self.data[BOOTP_YIADDR_OFF..BOOTP_YIADDR_OFF + 4];
        Ipv4Addr::new(b[0], b[1], b[2], b[3])
    }

    fn is_reply(&self) -> bool {
        self.data[BOOTP_OP_OFF] == BOOTP_OP_REPLY
    }

    /// Scans DHCP options looking for `want`, bounded so a truncated or
    /// maliciously long option chain can't make this loop unbounded (spec
    /// "Bounded work per poll").
    fn find_option(&self, want: u8) -> Option<&'a [u8]> {
        let opts = &self.data[BOOTP_OPTIONS_OFF..];
        let mut i = 0;
        let mut scanned = 0usize;
        const MAX_OPTIONS_SCANNED: usize = 64;
        while i < opts.len() && scanned < MAX_OPTIONS_SCANNED {
            scanned += 1;
            let tag = opts[i];
            if tag == OPT_END {
                break;
            }
            if tag == OPT_PAD {
                i += 1;
                continue;
            }
            if i + 1 >= opts.len() {
                break;
            }
            let len = opts[i + 1] as usize;
            if i + 2 + len > opts.len() {
                break;
            }
            let value = &opts[i + 2..i + 2 + len];
            if tag == want {
                return Some(value);
            }
            i += 2 + len;
        }
        None
    }

    fn message_type(&self) -> Option<MessageType> {
        self.find_option(OPT_MESSAGE_TYPE)
            .and_then(|v| v.first())
            .map(|b| MessageType::from_u8(*b))
    }
}

/// Extracts the lease information worth learning from a DHCP reply
/// (OFFER/ACK: client gets `offered_ip`) so the switch's address cache can
/// track it even before the guest ARPs for itself.
pub fn snoop(udp_payload: &[u8]) -> Option<DhcpObservation> {
    let bootp = Bootp::parse(udp_payload)?;
    let msg_type = bootp.message_type()?;
    Some(DhcpObservation {
        msg_type,
        client_mac: bootp.chaddr(),
        client_ip: bootp.ciaddr(),
        offered_ip: bootp.yiaddr(),
    })
}

pub fn is_client_reply(udp_payload: &[u8]) -> bool {
    Bootp::parse(udp_payload).map(|b| b.is_reply()).unwrap_or(false)
}

/// Forces the broadcast flag on an outbound DHCPDISCOVER/REQUEST when it
/// isn't already set. A shared-MAC-on-wire guest's DHCPOFFER/ACK comes
/// back addressed to the host's MAC (since that's what appeared as the
/// Ethernet source on the request); without the broadcast flag some DHCP
/// servers unicast the reply to `yiaddr`, which never reaches the guest
/// because the host's IP stack would just absorb it. Forcing broadcast
/// makes the reply arrive as an Ethernet broadcast, which the switch can
/// still learn from and deliver correctly.
///
/// `ipv4_header_len` lets the caller avoid re-parsing it.
pub fn force_broadcast_flag(frame: &mut [u8], ipv4_header_len: usize, udp_header_len: usize) -> bool {
    let eth_ipv4_udp = crate::eth::ETH_HDR_LEN + ipv4_header_len + udp_header_len;
    let flags_off = eth_ipv4_udp + BOOTP_FLAGS_OFF;
    if frame.len() < flags_off + 2 {
        return false;
    }
    let cur = u16::from_be_bytes([frame[flags_off], frame[flags_off + 1]]);
    if cur & FLAG_BROADCAST != 0 {
        return false;
    }
    let new = cur | FLAG_BROADCAST;
    frame[flags_off..flags_off + 2].copy_from_slice(&new.to_be_bytes());
    recompute_udp_checksum(frame, ipv4_header_len, udp_header_len);
    true
}

/// Recomputes the UDP checksum over `frame`'s DHCP payload after the
/// broadcast flag edit, so the packet doesn't arrive at the guest looking
/// corrupt to a receiver that actually checks it.
fn recompute_udp_checksum(frame: &mut [u8], ipv4_header_len: usize, udp_header_len: usize) {
    let ipv4_off = crate::eth::ETH_HDR_LEN;
    let udp_off = ipv4_off + ipv4_header_len;
    if frame.len() < udp_off + udp_header_len {
        return;
    }
    let mut src = [0u8; 4];
    src.copy_from_slice(&frame[ipv4_off + 12..ipv4_off + 16]);
    let mut dst = [0u8; 4];
    dst.copy_from_slice(&frame[ipv4_off + 16..ipv4_off + 20]);
    let udp_len = (frame.len() - udp_off) as u16;

    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src);
    pseudo[4..8].copy_from_slice(&dst);
    pseudo[9] = crate::ipv4::PROTO_UDP;
    pseudo[10..12].copy_from_slice(&udp_len.to_be_bytes());

    let cksum_off = udp_off + 6;
    frame[cksum_off..cksum_off + 2].copy_from_slice(&[0, 0]);
    let cksum = intnet_backend::checksum::internet_checksum_with_pseudo(&pseudo, &frame[udp_off..]);
    // 0 would mean "no checksum" per RFC 768's reserved value; since we're
    // actively computing one, fold that case to all-ones instead.
    let cksum = if cksum == 0 { 0xFFFF } else { cksum };
    frame[cksum_off..cksum_off + 2].copy_from_slice(&cksum.to_be_bytes());
}

/// Convenience wrapper that parses the IPv4 header itself rather than
/// requiring the caller to already know its length.
pub fn force_broadcast_flag_on_frame(frame: &mut [u8]) -> bool {
    let Some(view) = Ipv4View::parse(frame) else {
        return false;
    };
    let ipv4_header_len = view.header_len();
    force_broadcast_flag(frame, ipv4_header_len, 8)
}
