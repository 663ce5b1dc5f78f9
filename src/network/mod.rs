pub mod connection;
pub mod device_control;
pub mod transport;
pub mod wake;
