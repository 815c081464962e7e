//! Lock-free single-producer/single-consumer frame ring used for both
//! directions (guest→switch, switch→guest) of an interface's shared buffer.
//!
//! This crate owns only the ring/header primitives. Shared-memory layout
//! (`IntNetBuf`), addressing (`Mac`) and everything above the byte level
//! live in `intnet-wire` and `intnet-switch`.

pub mod header;
pub mod ring;

pub use header::{
    align_up, FrameType, GsoContext, GsoType, IntNetHdr, GSO_CTX_SIZE, HDR_ALIGN, HDR_SIZE,
};
pub use ring::{FrameReservation, Overflow, ReadableFrame, RingBuf, RingStats};
