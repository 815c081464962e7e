//! Trunk kind a network is opened/created with (spec §6.2).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrunkType {
    /// No trunk: the network is purely internal, guest-to-guest only.
    None,
    /// Caller doesn't care; the service picks (or keeps) whatever an
    /// existing network already has.
    WhateverNone,
    /// Host network-filter style passthrough trunk.
    NetFlt,
    /// Host-only adapter style trunk (no real wire, host stack only).
    NetAdp,
    /// NAT-service style trunk.
    SrvNat,
}

impl TrunkType {
    /// A request to join an existing network never has to match its trunk
    /// type exactly when the caller used one of these — they mean "whatever
    /// is already there is fine" (mirrors `kIntNetTrunkType_WhateverNone`
    /// and `SrvNat`'s "similar security" carve-out in the original).
    pub fn is_wildcard_on_join(self) -> bool {
        matches!(self, Self::WhateverNone | Self::SrvNat)
    }
}
