//! Destination table scratch object (spec §4.3, §4.6; original `DstTab`).
//!
//! Built fresh for each frame a switching algorithm classifies: the list
//! of interfaces to deliver to (each optionally carrying a destination MAC
//! rewrite for the level-3 shared-MAC-on-wire path), plus which trunk legs
//! are also a destination. Growth happens in fixed increments so a
//! broadcast storm doesn't force a `Vec` reallocation per frame once the
//! network has settled at some steady-state fan-out.

use intnet_backend::{SwitchDecision, TrunkDst};
use intnet_proto::IfHandle;
use intnet_wire::constants::DST_TAB_GROWTH;
use intnet_wire::Mac;

#[derive(Debug, Clone, Copy)]
pub struct DstEntry {
    pub handle: IfHandle,
    /// Set only by the level-3 path: the interface's real MAC, to replace
    /// whatever destination MAC the frame carried on arrival (the shared
    /// host MAC, under shared-MAC-on-wire).
    pub replace_dst_mac: Option<Mac>,
}

#[derive(Debug, Default)]
pub struct DstTab {
    entries: Vec<DstEntry>,
    trunk_dst: TrunkDst,
}

impl DstTab {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(DST_TAB_GROWTH as usize),
            trunk_dst: TrunkDst::empty(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.trunk_dst = TrunkDst::empty();
    }

    pub fn add_if(&mut self, handle: IfHandle) {
        if self.entries.iter().any(|e| e.handle == handle) {
            return;
        }
        if self.entries.len() == self.entries.capacity() {
            self.entries.reserve(DST_TAB_GROWTH as usize);
        }
        self.entries.push(DstEntry {
            handle,
            replace_dst_mac: None,
        });
    }

    /// Adds (or updates) `handle` with a destination-MAC rewrite, used by
    /// the level-3 path to restore a shared-MAC-on-wire guest's real MAC
    /// before delivery.
    pub fn add_if_with_replacement(&mut self, handle: IfHandle, replacement: Mac) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.handle == handle) {
            existing.replace_dst_mac = Some(replacement);
            return;
        }
        self.add_if(handle);
        self.add_if_with_replacement(handle, replacement);
    }

    pub fn set_trunk_dst(&mut self, mask: TrunkDst) {
        self.trunk_dst = mask;
    }

    pub fn entries(&self) -> &[DstEntry] {
        &self.entries
    }

    pub fn interfaces(&self) -> Vec<IfHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }

    pub fn trunk_dst(&self) -> TrunkDst {
        self.trunk_dst
    }

    pub fn reaches_trunk(&self) -> bool {
        !self.trunk_dst.is_empty()
    }

    /// Derives the overall switching decision from what's been
    /// accumulated so far (original's `!pDstTab->fTrunkDst ?
    /// INTNETSWDECISION_INTNET : INTNETSWDECISION_BROADCAST` and the
    /// empty-interfaces counterpart).
    pub fn decision(&self) -> SwitchDecision {
        match (self.entries.is_empty(), self.reaches_trunk()) {
            (true, false) => SwitchDecision::Drop,
            (true, true) => SwitchDecision::Trunk,
            (false, false) => SwitchDecision::IntNet,
            (false, true) => SwitchDecision::Broadcast,
        }
    }
}
