mod adapter;
mod android;
mod controller;
mod lg;
mod roku;
mod samsung;
pub mod types;

pub use adapter::{AdapterContext, TvAdapter, TvBackend, TvProbe};
pub use android::AndroidController;
pub use controller::TvController;
pub use lg::LgController;
pub use roku::RokuController;
pub use samsung::SamsungController;
pub use types::{
    AppInfo, ChannelInfo, CommandResult, ConnectionStatus, DeviceInfo, Direction, DiscoveredTv, InputSource,
    PowerState, StreamingApp, TvBrand, TvCapabilities, TvCommandResult, TvDevice, TvStatus,
    TvTarget,
};
