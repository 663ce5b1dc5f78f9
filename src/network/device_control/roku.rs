//! Roku ECP controller. Implements the External Control Protocol on port 8060
//! for device info retrieval, app listing, and remote command execution.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::adapter::{AdapterContext, TvAdapter, TvProbe};
use super::types::{
    AppInfo, CommandResult, DeviceInfo, Direction, DiscoveredTv, InputSource, PowerState,
    StreamingApp, TvBrand, TvStatus, TvTarget, clamp_volume, extract_xml_value,
};
use crate::network::transport::HttpResponse;

fn app_id(app: StreamingApp) -> Option<&'static str> {
    match app {
        StreamingApp::Netflix => Some("12"),
        StreamingApp::Youtube => Some("837"),
        StreamingApp::Disney => Some("291097"),
        StreamingApp::Spotify => Some("22297"),
        StreamingApp::Prime => Some("13"),
        StreamingApp::AppleTv => Some("551012"),
        _ => None,
    }
}

fn direction_key(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "Up",
        Direction::Down => "Down",
        Direction::Left => "Left",
        Direction::Right => "Right",
        Direction::Enter => "Select",
        Direction::Back => "Back",
        Direction::Home => "Home",
    }
}

/// Launch target for a TV input; Roku models inputs as apps
fn input_app(input: InputSource) -> Option<String> {
    match input {
        InputSource::Tv => Some("tvinput.dtv".to_string()),
        other => other.hdmi_port().map(|n| format!("tvinput.hdmi{}", n)),
    }
}

/// Keypress path for one literal character, percent-encoded
fn literal_path(ch: char) -> String {
    let mut url = match Url::parse("http://roku/keypress") {
        Ok(url) => url,
        Err(_) => return format!("/keypress/Lit_{}", ch),
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push(&format!("Lit_{}", ch));
    }
    url.path().to_string()
}

/// Roku External Control Protocol implementation
pub struct RokuController {
    ctx: AdapterContext,
}

impl RokuController {
    const PORT: u16 = 8060;
    const TEXT_DELAY: Duration = Duration::from_millis(50);

    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    async fn get(&self, target: &TvTarget, path: &str) -> HttpResponse {
        self.ctx
            .http
            .get(
                &target.host,
                target.port_or(Self::PORT),
                path,
                self.ctx.config.command_timeout(),
            )
            .await
    }

    async fn post(&self, target: &TvTarget, path: &str) -> HttpResponse {
        self.ctx
            .http
            .post(
                &target.host,
                target.port_or(Self::PORT),
                path,
                None,
                self.ctx.config.command_timeout(),
            )
            .await
    }

    /// Send a keypress command to Roku
    pub async fn send_keypress(&self, target: &TvTarget, key: &str) -> CommandResult {
        let outcome = self.post(target, &format!("/keypress/{}", key)).await.check("Roku");
        match outcome {
            Ok(()) => {
                debug!(host = %target.host, %key, "roku keypress");
                CommandResult::ok(format!("Sent {} to Roku", key))
            }
            Err(e) => e.into(),
        }
    }

    async fn launch(&self, target: &TvTarget, id: &str, message: String) -> CommandResult {
        match self.post(target, &format!("/launch/{}", id)).await.check("Roku") {
            Ok(()) => CommandResult::ok(message),
            Err(e) => e.into(),
        }
    }

    pub async fn play(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "Play").await
    }

    pub async fn pause(&self, target: &TvTarget) -> CommandResult {
        // ECP has a single play/pause toggle key
        self.send_keypress(target, "Play").await
    }

    pub async fn rewind(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "Rev").await
    }

    pub async fn fast_forward(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "Fwd").await
    }

    /// Type text into the focused field, one literal keypress per character
    pub async fn send_text(&self, target: &TvTarget, text: &str) -> CommandResult {
        for ch in text.chars() {
            if let Err(e) = self.post(target, &literal_path(ch)).await.check("Roku") {
                return e.into();
            }
            tokio::time::sleep(Self::TEXT_DELAY).await;
        }
        CommandResult::ok("Text sent")
    }

    /// Get device info from Roku
    pub async fn get_device_info(&self, target: &TvTarget) -> Option<DeviceInfo> {
        let response = self.get(target, "/query/device-info").await;
        if !response.ok {
            return None;
        }
        Self::parse_device_info(response.body.as_deref()?)
    }

    fn parse_device_info(text: &str) -> Option<DeviceInfo> {
        if !text.contains("<device-info>") {
            return None;
        }

        // Simple XML parsing (avoiding heavy dependencies)
        Some(DeviceInfo {
            model: extract_xml_value(text, "model-name"),
            name: extract_xml_value(text, "user-device-name")
                .or_else(|| extract_xml_value(text, "friendly-device-name")),
            software_version: extract_xml_value(text, "software-version"),
            mac: extract_xml_value(text, "wifi-mac")
                .or_else(|| extract_xml_value(text, "ethernet-mac")),
            power_mode: extract_xml_value(text, "power-mode"),
        })
    }

    /// The app in the foreground, as (id, name)
    pub async fn active_app(&self, target: &TvTarget) -> Option<(String, String)> {
        let response = self.get(target, "/query/active-app").await;
        if !response.ok {
            return None;
        }
        let body = response.body?;
        body.lines()
            .find_map(|line| Self::parse_app_line(line, &target.host))
            .map(|app| (app.id, app.name))
    }

    /// Get installed apps on Roku
    pub async fn get_apps(&self, target: &TvTarget) -> Vec<AppInfo> {
        let response = self.get(target, "/query/apps").await;
        let Some(text) = response.body.filter(|_| response.ok) else {
            return Vec::new();
        };

        // Parse apps from XML like: <app id="12" version="...">Netflix</app>
        let mut apps: Vec<AppInfo> = text
            .lines()
            .filter_map(|line| Self::parse_app_line(line, &target.host))
            .collect();

        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        apps
    }

    fn parse_app_line(line: &str, host: &str) -> Option<AppInfo> {
        // Match: <app id="12345" ...>App Name</app>
        if !line.contains("<app ") || !line.contains("</app>") {
            return None;
        }

        let id_start = line.find("id=\"")? + 4;
        let id_end = line[id_start..].find('"')? + id_start;
        let id = line[id_start..id_end].to_string();

        let name_start = line.find('>')? + 1;
        let name_end = line.find("</app>")?;
        let name = line[name_start..name_end].trim().to_string();

        if name.is_empty() {
            return None;
        }

        let icon_url = Some(format!("http://{}:{}/query/icon/{}", host, Self::PORT, id));

        Some(AppInfo { id, name, icon_url })
    }

    fn power_state(mode: Option<&str>) -> PowerState {
        match mode {
            Some("PowerOn") => PowerState::On,
            Some("DisplayOff") | Some("Ready") | Some("Headless") => PowerState::Standby,
            Some("PowerOff") => PowerState::Off,
            // Streaming sticks report no power mode but are on when answering
            _ => PowerState::On,
        }
    }
}

#[async_trait]
impl TvAdapter for RokuController {
    fn brand(&self) -> TvBrand {
        TvBrand::Roku
    }

    async fn power(&self, target: &TvTarget, on: Option<bool>) -> CommandResult {
        let key = match on {
            Some(true) => "PowerOn",
            Some(false) => "PowerOff",
            None => "Power",
        };
        self.send_keypress(target, key).await
    }

    async fn set_volume(&self, _target: &TvTarget, level: i32) -> CommandResult {
        // ECP only has relative volume keys and never reports the level
        let volume = clamp_volume(level);
        let mut result = CommandResult::unsupported(format!(
            "Roku cannot set volume to {} directly; use volume up or down",
            volume
        ));
        result.data = Some(json!({ "volume": volume }));
        result
    }

    async fn volume_up(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "VolumeUp").await
    }

    async fn volume_down(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "VolumeDown").await
    }

    async fn mute(&self, target: &TvTarget, _muted: Option<bool>) -> CommandResult {
        self.send_keypress(target, "VolumeMute").await
    }

    async fn set_channel(&self, _target: &TvTarget, _channel: &str) -> CommandResult {
        CommandResult::unsupported("Roku changes channels by launching apps")
    }

    async fn channel_up(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "ChannelUp").await
    }

    async fn channel_down(&self, target: &TvTarget) -> CommandResult {
        self.send_keypress(target, "ChannelDown").await
    }

    async fn set_input(&self, target: &TvTarget, input: InputSource) -> CommandResult {
        let Some(id) = input_app(input) else {
            return CommandResult::unsupported(format!("{} input is not available on Roku", input));
        };
        self.launch(target, &id, format!("Input {}", input)).await
    }

    async fn launch_app(&self, target: &TvTarget, app: StreamingApp) -> CommandResult {
        let Some(id) = app_id(app) else {
            return CommandResult::unsupported(format!(
                "{} is not available on Roku",
                app.display_name()
            ));
        };
        self.launch(target, id, format!("Launched {}", app.display_name()))
            .await
    }

    async fn navigate(&self, target: &TvTarget, direction: Direction) -> CommandResult {
        self.send_keypress(target, direction_key(direction)).await
    }

    async fn get_status(&self, target: &TvTarget) -> TvStatus {
        let Some(info) = self.get_device_info(target).await else {
            return TvStatus::offline();
        };
        let current_app = self.active_app(target).await.map(|(_, name)| name);

        TvStatus {
            online: true,
            power: Self::power_state(info.power_mode.as_deref()),
            volume: None,
            current_app,
        }
    }
}

#[async_trait]
impl TvProbe for RokuController {
    fn probe_brand(&self) -> TvBrand {
        TvBrand::Roku
    }

    async fn probe(&self, host: &str) -> Option<DiscoveredTv> {
        let response = self
            .ctx
            .http
            .get(host, Self::PORT, "/query/device-info", self.ctx.config.probe_timeout())
            .await;
        if !response.ok {
            return None;
        }
        let info = Self::parse_device_info(response.body.as_deref()?)?;

        let mut tv = DiscoveredTv::new(
            host,
            TvBrand::Roku,
            info.name.clone().unwrap_or_else(|| "Roku TV".to_string()),
        );
        tv.friendly_name = info.name;
        tv.model = info.model;
        tv.mac = info.mac;
        tv.port = Some(Self::PORT);
        tv.manufacturer = Some("Roku".to_string());
        Some(tv)
    }
}
