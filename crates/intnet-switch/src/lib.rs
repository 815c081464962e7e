//! The switch core: MAC learning, destination-table construction, address
//! snooping integration, and the network/interface/trunk object model
//! (spec §3, §4).

pub mod addr_cache;
pub mod busy;
pub mod dst_tab;
pub mod if_;
pub mod mac_tab;
pub mod network;
pub mod switch;
pub mod trunk;

pub use addr_cache::AddrCache;
pub use busy::{BusyCounter, BusyGuard};
pub use dst_tab::DstTab;
pub use if_::{If, WaitOutcome};
pub use mac_tab::MacTab;
pub use network::{Network, TrunkReconnectFactory};
pub use switch::{classify, switch_broadcast, switch_level3, switch_unicast, Sender};
pub use trunk::Trunk;
