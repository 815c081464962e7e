//! Ethernet header field access shared by every protocol snooper.

use intnet_wire::Mac;

pub const ETH_HDR_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;

pub fn ethertype(frame: &[u8]) -> Option<u16> {
    frame.get(12..14).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

pub fn src_mac(frame: &[u8]) -> Option<Mac> {
    frame.get(6..12).map(|b| Mac::from_bytes(b.try_into().unwrap()))
}

pub fn dst_mac(frame: &[u8]) -> Option<Mac> {
    frame.get(0..6).map(|b| Mac::from_bytes(b.try_into().unwrap()))
}

pub fn set_src_mac(frame: &mut [u8], mac: Mac) -> bool {
    if frame.len() < ETH_HDR_LEN {
        return false;
    }
    frame[6..12].copy_from_slice(mac.as_bytes());
    true
}

pub fn set_dst_mac(frame: &mut [u8], mac: Mac) -> bool {
    if frame.len() < ETH_HDR_LEN {
        return false;
    }
    frame[0..6].copy_from_slice(mac.as_bytes());
    true
}
