//! Shared types for device control. Defines brands, device records, command
//! vocabularies, status and result structures used across all adapters.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvBrand {
    Samsung,
    Lg,
    Android,
    Roku,
    Vestel,
    Unknown,
}

impl TvBrand {
    pub const ALL: [TvBrand; 6] = [
        TvBrand::Samsung,
        TvBrand::Lg,
        TvBrand::Android,
        TvBrand::Roku,
        TvBrand::Vestel,
        TvBrand::Unknown,
    ];

    /// Lenient parse used for cloud records, where brand is free text
    pub fn from_loose(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(TvBrand::Unknown)
    }
}

impl fmt::Display for TvBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TvBrand::Samsung => write!(f, "samsung"),
            TvBrand::Lg => write!(f, "lg"),
            TvBrand::Android => write!(f, "android"),
            TvBrand::Roku => write!(f, "roku"),
            TvBrand::Vestel => write!(f, "vestel"),
            TvBrand::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for TvBrand {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "samsung" => Ok(TvBrand::Samsung),
            "lg" => Ok(TvBrand::Lg),
            "android" => Ok(TvBrand::Android),
            "roku" => Ok(TvBrand::Roku),
            "vestel" => Ok(TvBrand::Vestel),
            "unknown" => Ok(TvBrand::Unknown),
            other => Err(ControlError::UnknownBrand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Online,
    #[default]
    Offline,
    Connecting,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    Standby,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSource {
    #[serde(rename = "HDMI1")]
    Hdmi1,
    #[serde(rename = "HDMI2")]
    Hdmi2,
    #[serde(rename = "HDMI3")]
    Hdmi3,
    #[serde(rename = "HDMI4")]
    Hdmi4,
    #[serde(rename = "USB")]
    Usb,
    #[serde(rename = "AV")]
    Av,
    #[serde(rename = "COMPONENT")]
    Component,
    #[serde(rename = "TV")]
    Tv,
    #[serde(rename = "MIRROR")]
    Mirror,
}

impl InputSource {
    pub const ALL: [InputSource; 9] = [
        InputSource::Hdmi1,
        InputSource::Hdmi2,
        InputSource::Hdmi3,
        InputSource::Hdmi4,
        InputSource::Usb,
        InputSource::Av,
        InputSource::Component,
        InputSource::Tv,
        InputSource::Mirror,
    ];

    /// HDMI port number, if this is an HDMI input
    pub fn hdmi_port(&self) -> Option<u8> {
        match self {
            InputSource::Hdmi1 => Some(1),
            InputSource::Hdmi2 => Some(2),
            InputSource::Hdmi3 => Some(3),
            InputSource::Hdmi4 => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InputSource::Hdmi1 => "HDMI1",
            InputSource::Hdmi2 => "HDMI2",
            InputSource::Hdmi3 => "HDMI3",
            InputSource::Hdmi4 => "HDMI4",
            InputSource::Usb => "USB",
            InputSource::Av => "AV",
            InputSource::Component => "COMPONENT",
            InputSource::Tv => "TV",
            InputSource::Mirror => "MIRROR",
        };
        f.write_str(name)
    }
}

impl FromStr for InputSource {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace([' ', '-', '_'], "");
        InputSource::ALL
            .into_iter()
            .find(|input| input.to_string() == upper)
            .ok_or_else(|| ControlError::InvalidInput(format!("unknown input source '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingApp {
    Netflix,
    Youtube,
    Disney,
    Spotify,
    Prime,
    AppleTv,
    Hbo,
    Hulu,
    Twitch,
}

impl StreamingApp {
    pub const ALL: [StreamingApp; 9] = [
        StreamingApp::Netflix,
        StreamingApp::Youtube,
        StreamingApp::Disney,
        StreamingApp::Spotify,
        StreamingApp::Prime,
        StreamingApp::AppleTv,
        StreamingApp::Hbo,
        StreamingApp::Hulu,
        StreamingApp::Twitch,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            StreamingApp::Netflix => "netflix",
            StreamingApp::Youtube => "youtube",
            StreamingApp::Disney => "disney",
            StreamingApp::Spotify => "spotify",
            StreamingApp::Prime => "prime",
            StreamingApp::AppleTv => "apple_tv",
            StreamingApp::Hbo => "hbo",
            StreamingApp::Hulu => "hulu",
            StreamingApp::Twitch => "twitch",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StreamingApp::Netflix => "Netflix",
            StreamingApp::Youtube => "YouTube",
            StreamingApp::Disney => "Disney+",
            StreamingApp::Spotify => "Spotify",
            StreamingApp::Prime => "Prime Video",
            StreamingApp::AppleTv => "Apple TV",
            StreamingApp::Hbo => "HBO Max",
            StreamingApp::Hulu => "Hulu",
            StreamingApp::Twitch => "Twitch",
        }
    }
}

impl fmt::Display for StreamingApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for StreamingApp {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_lowercase().replace(['-', ' '], "_");
        StreamingApp::ALL
            .into_iter()
            .find(|app| app.id() == id)
            .ok_or_else(|| ControlError::InvalidInput(format!("unknown app '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Back,
    Home,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Enter => "enter",
            Direction::Back => "back",
            Direction::Home => "home",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            "enter" | "ok" | "select" => Ok(Direction::Enter),
            "back" => Ok(Direction::Back),
            "home" => Ok(Direction::Home),
            other => Err(ControlError::InvalidInput(format!(
                "unknown direction '{}'",
                other
            ))),
        }
    }
}

/// What a device can be asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TvCapabilities {
    pub can_power: bool,
    pub can_volume: bool,
    pub can_mute: bool,
    pub can_channel: bool,
    pub can_input: bool,
    pub can_apps: bool,
    pub can_wake_on_lan: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_apps: Vec<StreamingApp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_inputs: Vec<InputSource>,
}

impl TvCapabilities {
    pub fn for_brand(brand: TvBrand, mac: Option<&str>) -> Self {
        Self {
            can_power: true,
            can_volume: true,
            can_mute: true,
            can_channel: brand != TvBrand::Roku,
            can_input: true,
            can_apps: true,
            can_wake_on_lan: mac.is_some_and(|m| !m.trim().is_empty()),
            supported_apps: Vec::new(),
            supported_inputs: Vec::new(),
        }
    }
}

/// Result of one successful probe during discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTv {
    pub ip: String,
    pub mac: Option<String>,
    pub name: String,
    pub brand: TvBrand,
    pub model: Option<String>,
    pub port: Option<u16>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
}

impl DiscoveredTv {
    pub fn new(ip: impl Into<String>, brand: TvBrand, name: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            mac: None,
            name: name.into(),
            brand,
            model: None,
            port: None,
            friendly_name: None,
            manufacturer: None,
        }
    }
}

/// A configured TV. Session-derived fields are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvDevice {
    pub id: String,
    pub name: String,
    pub brand: TvBrand,
    pub model: Option<String>,
    pub ip: String,
    pub mac: Option<String>,
    pub port: Option<u16>,
    pub capabilities: TvCapabilities,
    pub room_id: Option<i64>,
    pub cloud_id: Option<i64>,
    pub last_seen: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub connection_status: ConnectionStatus,
    #[serde(skip)]
    pub power_state: PowerState,
    #[serde(skip)]
    pub volume: Option<u8>,
    #[serde(skip)]
    pub is_muted: Option<bool>,
    #[serde(skip)]
    pub current_channel: Option<String>,
    #[serde(skip)]
    pub current_input: Option<InputSource>,
    #[serde(skip)]
    pub current_app: Option<String>,
}

impl TvDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, brand: TvBrand, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            brand,
            model: None,
            ip: ip.into(),
            mac: None,
            port: None,
            capabilities: TvCapabilities::for_brand(brand, None),
            room_id: None,
            cloud_id: None,
            last_seen: None,
            connection_status: ConnectionStatus::Offline,
            power_state: PowerState::Unknown,
            volume: None,
            is_muted: None,
            current_channel: None,
            current_input: None,
            current_app: None,
        }
    }

    /// Turn a discovery hit into a device record ready to be saved
    pub fn from_discovered(discovered: &DiscoveredTv, room_id: Option<i64>) -> Self {
        let id = format!(
            "tv_{}_{}",
            discovered.ip.replace(['.', ':'], "_"),
            uuid::Uuid::new_v4().simple()
        );
        let name = if discovered.name.trim().is_empty() {
            format!("{} TV", discovered.brand)
        } else {
            discovered.name.clone()
        };

        let mut device = TvDevice::new(id, name, discovered.brand, discovered.ip.clone());
        device.model = discovered.model.clone();
        device.mac = discovered.mac.clone();
        device.port = discovered.port;
        device.room_id = room_id;
        device.last_seen = Some(Utc::now());
        device.capabilities = TvCapabilities::for_brand(discovered.brand, discovered.mac.as_deref());
        device
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        let mac = mac.into();
        self.capabilities.can_wake_on_lan = !mac.trim().is_empty();
        self.mac = Some(mac);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn target(&self) -> TvTarget {
        TvTarget {
            host: self.ip.clone(),
            port: self.port,
        }
    }

    /// The MAC to use for wake packets, honoring the capability flag
    pub fn wake_mac(&self) -> Option<&str> {
        if self.capabilities.can_wake_on_lan {
            self.mac.as_deref().filter(|m| !m.trim().is_empty())
        } else {
            None
        }
    }
}

/// Network address of a TV, with an optional port override for the
/// brand's default control port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TvTarget {
    pub host: String,
    pub port: Option<u16>,
}

impl TvTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl fmt::Display for TvTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
}

/// One entry of a tuner's channel lineup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub number: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: Option<String>,
    pub name: Option<String>,
    pub software_version: Option<String>,
    pub mac: Option<String>,
    pub power_mode: Option<String>,
}

/// Snapshot returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TvStatus {
    pub online: bool,
    pub power: PowerState,
    pub volume: Option<u8>,
    pub current_app: Option<String>,
}

impl TvStatus {
    pub fn offline() -> Self {
        Self {
            online: false,
            power: PowerState::Off,
            volume: None,
            current_app: None,
        }
    }

    pub fn online(power: PowerState) -> Self {
        Self {
            online: true,
            power,
            volume: None,
            current_app: None,
        }
    }
}

/// Outcome of every control operation. Callers branch on `success` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

pub type TvCommandResult = CommandResult;

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error_kind: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error_kind: Some(kind),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::failure(ErrorKind::Unsupported, message)
    }
}

impl From<ControlError> for CommandResult {
    fn from(err: ControlError) -> Self {
        CommandResult::failure(err.kind(), err.to_string())
    }
}

impl From<Result<CommandResult, ControlError>> for CommandResult {
    fn from(result: Result<CommandResult, ControlError>) -> Self {
        result.unwrap_or_else(CommandResult::from)
    }
}

/// Clamp a requested volume into the 0..=100 range every protocol expects
pub fn clamp_volume(level: i32) -> u8 {
    level.clamp(0, 100) as u8
}

/// Volume as reported by a TV, clamped before narrowing
pub fn reported_volume(level: i64) -> u8 {
    level.clamp(0, 100) as u8
}

/// Digits of a numeric channel, or an input error
pub fn channel_digits(channel: &str) -> Result<Vec<char>, ControlError> {
    let trimmed = channel.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(ControlError::InvalidInput(format!(
            "channel '{}' is not a number",
            channel
        )));
    }
    Ok(trimmed.chars().collect())
}

/// Extract a simple XML element value (basic parsing without full XML parser)
pub(crate) fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)? + start;

    let value = xml[start..end].trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(-10), 0);
        assert_eq!(clamp_volume(150), 100);
        assert_eq!(clamp_volume(42), 42);
        assert_eq!(reported_volume(4_294_967_306), 100);
        assert_eq!(reported_volume(-4_294_967_286), 0);
        assert_eq!(reported_volume(17), 17);
    }

    #[test]
    fn test_brand_parse_and_display() {
        for brand in TvBrand::ALL {
            assert_eq!(brand.to_string().parse::<TvBrand>().unwrap(), brand);
        }
        assert_eq!(TvBrand::from_loose(Some("Samsung")), TvBrand::Samsung);
        assert_eq!(TvBrand::from_loose(Some("philips")), TvBrand::Unknown);
        assert_eq!(TvBrand::from_loose(None), TvBrand::Unknown);
    }

    #[test]
    fn test_input_and_app_parsing() {
        assert_eq!("hdmi1".parse::<InputSource>().unwrap(), InputSource::Hdmi1);
        assert_eq!("HDMI-2".parse::<InputSource>().unwrap(), InputSource::Hdmi2);
        assert!("scart".parse::<InputSource>().is_err());

        assert_eq!("Netflix".parse::<StreamingApp>().unwrap(), StreamingApp::Netflix);
        assert_eq!("apple-tv".parse::<StreamingApp>().unwrap(), StreamingApp::AppleTv);
        assert!("winamp".parse::<StreamingApp>().is_err());
    }

    #[test]
    fn test_channel_digits() {
        assert_eq!(channel_digits("157").unwrap(), vec!['1', '5', '7']);
        assert!(channel_digits("").is_err());
        assert!(channel_digits("7a").is_err());
    }

    #[test]
    fn test_wake_capability_requires_mac() {
        let mut discovered = DiscoveredTv::new("192.168.1.20", TvBrand::Roku, "Den Roku");
        let device = TvDevice::from_discovered(&discovered, None);
        assert!(!device.capabilities.can_wake_on_lan);
        assert!(!device.capabilities.can_channel);
        assert!(device.wake_mac().is_none());

        discovered.mac = Some("AA:BB:CC:DD:EE:FF".to_string());
        let device = TvDevice::from_discovered(&discovered, Some(3));
        assert!(device.capabilities.can_wake_on_lan);
        assert_eq!(device.wake_mac(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(device.room_id, Some(3));
        assert!(device.id.starts_with("tv_192_168_1_20_"));
    }

    #[test]
    fn test_session_fields_not_persisted() {
        let mut device = TvDevice::new("tv1", "Bedroom", TvBrand::Lg, "192.168.1.30");
        device.volume = Some(80);
        device.power_state = PowerState::On;

        let json = serde_json::to_string(&device).unwrap();
        assert!(!json.contains("\"volume\""));
        assert!(!json.contains("power_state"));

        let restored: TvDevice = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.volume, None);
        assert_eq!(restored.power_state, PowerState::Unknown);
        assert_eq!(restored.brand, TvBrand::Lg);
    }

    #[test]
    fn test_command_result_from_error() {
        let result = CommandResult::from(ControlError::Unsupported("no".into()));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unsupported));
    }

    #[test]
    fn test_extract_xml_value() {
        let xml = "<device-info><model-name>Roku Ultra</model-name><empty></empty></device-info>";
        assert_eq!(extract_xml_value(xml, "model-name"), Some("Roku Ultra".to_string()));
        assert_eq!(extract_xml_value(xml, "empty"), None);
        assert_eq!(extract_xml_value(xml, "missing"), None);
    }
}
