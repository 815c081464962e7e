//! Trunk port trait contract (spec §4.9; original `INTNETTRUNKSWPORT`/
//! `INTNETTRUNKIFPORT`). Two traits, one per direction of the relationship:
//!
//! - [`TrunkSwitchPort`] is implemented by the switch (`intnet-switch`) and
//!   called by the trunk backend whenever a frame arrives from the host
//!   stack or the physical wire.
//! - [`TrunkInterfacePort`] is implemented by the trunk backend and called
//!   by the switch whenever a frame needs to leave towards the host stack
//!   or the wire.

use intnet_wire::Mac;

use crate::decision::SwitchDecision;
use crate::sg::{Sg, TrunkDst, TrunkSrc};

/// Methods the switch exposes to its trunk backend.
pub trait TrunkSwitchPort: Send + Sync {
    /// Cheap pre-check before the backend bothers building a full `Sg` for
    /// a frame it has only peeked the destination MAC of.
    fn pre_recv(&self, dst_mac: &Mac, src: TrunkSrc) -> SwitchDecision;

    /// A full frame arrived from `src`; the switch classifies and
    /// delivers it. Returns `true` if it was consumed (delivered or
    /// dropped deliberately), `false` if the backend should retry later
    /// (busy/overloaded).
    fn recv(&self, sg: &Sg<'_>, src: TrunkSrc) -> bool;

    /// The backend learned (or had assigned) the host-side MAC address.
    fn report_mac_address(&self, mac: Mac);

    /// The backend's promiscuous mode changed (e.g. another process on the
    /// host enabled it on the physical NIC out of band).
    fn report_promiscuous_mode(&self, promiscuous: bool);

    /// Bitmask of [`intnet_ring::GsoType::capability_bit`] values the
    /// backend can perform in hardware, split by which leg the
    /// capabilities apply to.
    fn report_gso_capabilities(&self, host_mask: u32, wire_mask: u32);

    /// Destinations for which `xmit` tolerates being called with
    /// preemption disabled (a backend hint, not a requirement).
    fn report_no_preempt_dsts(&self, mask: u32);

    /// The host stack gained (`added = true`) or lost ownership of `addr`,
    /// e.g. a NIC got a new IP via DHCP. Lets the switch blacklist the
    /// address against guest spoofing (§4.7, `AddrCache::set_host_address`).
    fn notify_host_address(&self, added: bool, addr: std::net::IpAddr);

    /// The backend wants to hold on to `sg` past the `recv`/`pre_recv` call
    /// that handed it in (e.g. queuing it for async retry). Default no-op:
    /// every backend in this workspace only uses `Sg` synchronously.
    fn sg_retain(&self, _sg: &Sg<'_>) {}

    /// Releases a previously retained `Sg`. See `sg_retain`.
    fn sg_release(&self, _sg: &Sg<'_>) {}

    /// The backend is going away; drop any references to it.
    fn disconnect(&self);
}

/// Methods the switch calls on its trunk backend.
pub trait TrunkInterfacePort: Send + Sync {
    /// Transmit `sg` towards the destinations named in `dst`. Returns
    /// `true` on success.
    fn xmit(&self, sg: &Sg<'_>, dst: TrunkDst) -> bool;

    fn set_promiscuous_mode(&self, promiscuous: bool);

    /// Blocks up to `millies` waiting for any in-flight `recv`/`xmit` work
    /// this backend has outstanding to finish, used during teardown.
    fn wait_for_idle(&self, millies: u32) -> bool;

    /// Disconnect and release the switch's reference to this backend.
    fn disconnect_and_release(&self);
}
