//! Open flags (spec §6.3). Network-scoped and interface-scoped flags are
//! modeled as separate `bitflags!` types; each policy is a bit pair (deny
//! bit + allow bit) plus a "fixed" bit that freezes the pair against later
//! relaxation. `intnet-switch` reconciles these across every interface
//! joining a network (the "as restrictive as" / "exact" logic of §4.3);
//! this crate only defines the bits and the self-consistency check.

use bitflags::bitflags;

use crate::error::{IntNetError, Result};

bitflags! {
    /// Flags carried on the network object itself, supplied when the
    /// network is first created and adjustable afterwards unless a
    /// `*_FIXED` bit freezes the pair.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetworkOpenFlags: u32 {
        const ACCESS_RESTRICTED        = 1 << 0;
        const ACCESS_PUBLIC            = 1 << 1;
        const ACCESS_FIXED             = 1 << 2;

        const PROMISC_DENY_CLIENTS     = 1 << 3;
        const PROMISC_ALLOW_CLIENTS    = 1 << 4;
        const PROMISC_FIXED            = 1 << 5;

        const PROMISC_DENY_TRUNK_HOST  = 1 << 6;
        const PROMISC_ALLOW_TRUNK_HOST = 1 << 7;

        const PROMISC_DENY_TRUNK_WIRE  = 1 << 8;
        const PROMISC_ALLOW_TRUNK_WIRE = 1 << 9;

        const TRUNK_HOST_DISABLED      = 1 << 10;
        const TRUNK_HOST_ENABLED       = 1 << 11;
        const TRUNK_FIXED              = 1 << 12;

        const TRUNK_HOST_CHASTE_MODE   = 1 << 13;
        const TRUNK_HOST_PROMISC_MODE  = 1 << 14;

        const TRUNK_WIRE_DISABLED      = 1 << 15;
        const TRUNK_WIRE_ENABLED       = 1 << 16;

        const TRUNK_WIRE_CHASTE_MODE   = 1 << 17;
        const TRUNK_WIRE_PROMISC_MODE  = 1 << 18;

        /// Guests share one MAC with the host on the wire; outbound/inbound
        /// frames need L3 switching plus ARP/ND/DHCP rewriting (§4.7/§4.8).
        const SHARED_MAC_ON_WIRE       = 1 << 19;

        /// DHCP fix-up workaround: force the broadcast flag on outgoing
        /// DHCPDISCOVER/REQUEST so a shared-MAC guest's lease reply routes
        /// correctly (§4.8, Open Question).
        const DHCP_FORCE_BROADCAST_FLAG = 1 << 20;
    }
}

impl NetworkOpenFlags {
    const ACCESS_PAIR: Self = Self::ACCESS_RESTRICTED.union(Self::ACCESS_PUBLIC);
    const PROMISC_CLIENTS_PAIR: Self =
        Self::PROMISC_DENY_CLIENTS.union(Self::PROMISC_ALLOW_CLIENTS);
    const PROMISC_TRUNK_HOST_PAIR: Self =
        Self::PROMISC_DENY_TRUNK_HOST.union(Self::PROMISC_ALLOW_TRUNK_HOST);
    const PROMISC_TRUNK_WIRE_PAIR: Self =
        Self::PROMISC_DENY_TRUNK_WIRE.union(Self::PROMISC_ALLOW_TRUNK_WIRE);
    const TRUNK_HOST_ENABLE_PAIR: Self = Self::TRUNK_HOST_DISABLED.union(Self::TRUNK_HOST_ENABLED);
    const TRUNK_HOST_MODE_PAIR: Self =
        Self::TRUNK_HOST_CHASTE_MODE.union(Self::TRUNK_HOST_PROMISC_MODE);
    const TRUNK_WIRE_ENABLE_PAIR: Self = Self::TRUNK_WIRE_DISABLED.union(Self::TRUNK_WIRE_ENABLED);
    const TRUNK_WIRE_MODE_PAIR: Self =
        Self::TRUNK_WIRE_CHASTE_MODE.union(Self::TRUNK_WIRE_PROMISC_MODE);

    const PAIRS: &'static [Self] = &[
        Self::ACCESS_PAIR,
        Self::PROMISC_CLIENTS_PAIR,
        Self::PROMISC_TRUNK_HOST_PAIR,
        Self::PROMISC_TRUNK_WIRE_PAIR,
        Self::TRUNK_HOST_ENABLE_PAIR,
        Self::TRUNK_HOST_MODE_PAIR,
        Self::TRUNK_WIRE_ENABLE_PAIR,
        Self::TRUNK_WIRE_MODE_PAIR,
    ];

    /// Each pair alongside the bit that denotes its restrictive (deny/
    /// disabled/chaste) choice and the bit that freezes it against later
    /// relaxation. Drives the per-pair merge a network applies when a new
    /// interface joins with its own opinion on these policies (§4.3).
    pub const PAIR_TABLE: &'static [(Self, Self, Self)] = &[
        (Self::ACCESS_PAIR, Self::ACCESS_RESTRICTED, Self::ACCESS_FIXED),
        (Self::PROMISC_CLIENTS_PAIR, Self::PROMISC_DENY_CLIENTS, Self::PROMISC_FIXED),
        (Self::PROMISC_TRUNK_HOST_PAIR, Self::PROMISC_DENY_TRUNK_HOST, Self::PROMISC_FIXED),
        (Self::PROMISC_TRUNK_WIRE_PAIR, Self::PROMISC_DENY_TRUNK_WIRE, Self::PROMISC_FIXED),
        (Self::TRUNK_HOST_ENABLE_PAIR, Self::TRUNK_HOST_DISABLED, Self::TRUNK_FIXED),
        (Self::TRUNK_HOST_MODE_PAIR, Self::TRUNK_HOST_CHASTE_MODE, Self::TRUNK_FIXED),
        (Self::TRUNK_WIRE_ENABLE_PAIR, Self::TRUNK_WIRE_DISABLED, Self::TRUNK_FIXED),
        (Self::TRUNK_WIRE_MODE_PAIR, Self::TRUNK_WIRE_CHASTE_MODE, Self::TRUNK_FIXED),
    ];

    /// Neither bit of a pair set is "no opinion"; both bits set is
    /// contradictory and rejected.
    pub fn validate(self) -> Result<()> {
        for pair in Self::PAIRS {
            if (self & *pair) == *pair {
                return Err(IntNetError::IncompatibleFlags);
            }
        }
        Ok(())
    }

    /// Merges `requested` into `self` one pair at a time: whichever side
    /// names a pair's restrictive bit wins it, and if only one side has an
    /// opinion at all, that opinion stands. Bits outside any pair carry no
    /// restrictive/permissive meaning and are simply unioned in.
    pub fn merge_restrictive(self, requested: Self) -> Self {
        let mut merged = self;
        let mut paired_mask = Self::empty();
        for &(pair, restrictive, _fixed) in Self::PAIR_TABLE {
            paired_mask |= pair;
            let cur = self & pair;
            let req = requested & pair;
            let resolved = if cur.contains(restrictive) || req.contains(restrictive) {
                restrictive
            } else {
                cur | req
            };
            merged = (merged & !pair) | resolved;
        }
        merged | (requested & !paired_mask)
    }

    pub fn clients_may_go_promiscuous(self) -> bool {
        self.contains(Self::PROMISC_ALLOW_CLIENTS)
    }

    pub fn trunk_host_enabled(self) -> bool {
        self.contains(Self::TRUNK_HOST_ENABLED) || !self.contains(Self::TRUNK_HOST_DISABLED)
    }

    pub fn trunk_wire_enabled(self) -> bool {
        self.contains(Self::TRUNK_WIRE_ENABLED) || !self.contains(Self::TRUNK_WIRE_DISABLED)
    }
}

bitflags! {
    /// Flags an individual interface supplies on open (§6.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceOpenFlags: u32 {
        const PROMISC_DENY       = 1 << 0;
        const PROMISC_ALLOW      = 1 << 1;
        const FIXED              = 1 << 2;

        const PROMISC_NO_TRUNK   = 1 << 3;
        const PROMISC_SEE_TRUNK  = 1 << 4;

        /// This interface insists the network's effective flags match its
        /// own exactly, rather than merely being at least as restrictive.
        const REQUIRE_EXACT                  = 1 << 5;
        /// This interface requires the network's effective policy be no
        /// more permissive than its own requested flags.
        const REQUIRE_AS_RESTRICTIVE_POLICIES = 1 << 6;
    }
}

impl InterfaceOpenFlags {
    const PROMISC_PAIR: Self = Self::PROMISC_DENY.union(Self::PROMISC_ALLOW);
    const TRUNK_VISIBILITY_PAIR: Self = Self::PROMISC_NO_TRUNK.union(Self::PROMISC_SEE_TRUNK);

    pub fn validate(self) -> Result<()> {
        if (self & Self::PROMISC_PAIR) == Self::PROMISC_PAIR {
            return Err(IntNetError::IncompatibleFlags);
        }
        if (self & Self::TRUNK_VISIBILITY_PAIR) == Self::TRUNK_VISIBILITY_PAIR {
            return Err(IntNetError::IncompatibleFlags);
        }
        Ok(())
    }

    pub fn wants_promiscuous(self) -> bool {
        self.contains(Self::PROMISC_ALLOW)
    }

    pub fn sees_trunk_traffic(self) -> bool {
        self.contains(Self::PROMISC_SEE_TRUNK)
    }
}
