//! Client↔service request/reply message set (spec §6.1).
//!
//! Frame payloads never ride inside these messages — a guest writes its
//! frame into the interface's send ring first (through the buffer pointers
//! handed back by `Open`/`IfGetBufferPtrs`) and `IfSend` only tells the
//! service "go switch what's in there now". This mirrors the original's
//! split between the out-of-band control calls and the shared-memory data
//! path.

use intnet_wire::Mac;

use crate::error::IntNetError;
use crate::flags::{InterfaceOpenFlags, NetworkOpenFlags};
use crate::handle::IfHandle;
use crate::trunk::TrunkType;

#[derive(Debug, Clone)]
pub enum Request {
    Open {
        network: String,
        trunk_type: TrunkType,
        trunk_name: Option<String>,
        network_flags: NetworkOpenFlags,
        if_flags: InterfaceOpenFlags,
        recv_buf_size: u32,
        send_buf_size: u32,
    },
    IfClose {
        handle: IfHandle,
    },
    IfGetBufferPtrs {
        handle: IfHandle,
    },
    IfSetPromiscuous {
        handle: IfHandle,
        promiscuous: bool,
    },
    IfSetMacAddress {
        handle: IfHandle,
        mac: Mac,
    },
    IfSetActive {
        handle: IfHandle,
        active: bool,
    },
    /// Tells the service to drain and switch whatever frames the caller has
    /// already written into this interface's send ring.
    IfSend {
        handle: IfHandle,
    },
    /// Blocks (bounded by `timeout_ms`, `None` for indefinite) until the
    /// interface's recv ring has at least one frame, or until
    /// `IfAbortWait` wakes it early.
    IfWait {
        handle: IfHandle,
        timeout_ms: Option<u32>,
    },
    /// `no_more_waits` makes the abort permanent: every future `IfWait` on
    /// this handle reports destroyed instead of blocking, used when the
    /// interface is closing. `false` just wakes whoever is blocked now.
    IfAbortWait {
        handle: IfHandle,
        no_more_waits: bool,
    },
}

#[derive(Debug, Clone)]
pub enum Response {
    Open { handle: IfHandle, mac: Mac },
    IfClose,
    IfGetBufferPtrs { recv_ring_bytes: u32, send_ring_bytes: u32 },
    IfSetPromiscuous,
    IfSetMacAddress,
    IfSetActive,
    IfSend,
    /// `true` if a frame became available, `false` on timeout/abort.
    IfWait { frame_available: bool },
    IfAbortWait,
    Error(IntNetError),
}

impl Request {
    pub fn handle(&self) -> Option<IfHandle> {
        match self {
            Request::Open { .. } => None,
            Request::IfClose { handle }
            | Request::IfGetBufferPtrs { handle }
            | Request::IfSetPromiscuous { handle, .. }
            | Request::IfSetMacAddress { handle, .. }
            | Request::IfSetActive { handle, .. }
            | Request::IfSend { handle }
            | Request::IfWait { handle, .. }
            | Request::IfAbortWait { handle, .. } => Some(*handle),
        }
    }
}
