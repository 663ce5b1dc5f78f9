pub mod discovery;
pub mod port;
pub mod ssdp;

pub use discovery::{DiscoveryProgress, TvDiscovery};
