//! Local-network control of smart TVs from several vendors behind one command
//! interface: discovery, brand adapters, wake-on-LAN and a stateful session.

pub mod config;
pub mod db;
pub mod devices;
pub mod error;
pub mod logging;
pub mod network;
pub mod scanner;
pub mod session;

#[cfg(test)]
pub mod test_utils;

pub use config::ControlConfig;
pub use error::{ControlError, ErrorKind};
pub use network::device_control::{TvCommandResult, TvController};
pub use scanner::TvDiscovery;
pub use session::TvSession;
