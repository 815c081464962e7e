//! The trunk boundary: the trait contract between the switch and a
//! pluggable host/wire backend, scatter-gather frame descriptors, and the
//! software GSO segmentation fallback used when a backend can't carve
//! oversized frames itself.

pub mod checksum;
pub mod decision;
pub mod gso;
pub mod sg;
pub mod trunk;

pub use decision::SwitchDecision;
pub use gso::segment_frame;
pub use sg::{Sg, TrunkDst, TrunkSrc};
pub use trunk::{TrunkInterfacePort, TrunkSwitchPort};

pub use intnet_ring::{GsoContext, GsoType};
