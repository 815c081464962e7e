//! Shared-memory-shaped layout for one interface's pair of rings, and the
//! MAC address type both the switch and the snooping code build on.

pub mod buf;
pub mod constants;
pub mod mac;

pub use buf::{BufStats, IntNetBuf};
pub use mac::Mac;
