//! Samsung Smart TV controller. Keypresses go over the remote-control
//! WebSocket on port 8001; device info, app launch and volume use the REST
//! sibling under `/api/v2/`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use super::adapter::{AdapterContext, TvAdapter, TvProbe};
use super::types::{
    CommandResult, DeviceInfo, Direction, DiscoveredTv, InputSource, PowerState, StreamingApp,
    TvBrand, TvStatus, TvTarget, channel_digits, clamp_volume, reported_volume,
};
use crate::db::CredentialStore;
use crate::error::{ControlError, Result};
use crate::network::connection::{ConnectionManager, Liveness};
use crate::network::transport::{HttpResponse, Method, SocketHandler, SocketLink};

const KEY_POWER: &str = "KEY_POWER";
const KEY_POWER_OFF: &str = "KEY_POWEROFF";
const KEY_VOLUME_UP: &str = "KEY_VOLUP";
const KEY_VOLUME_DOWN: &str = "KEY_VOLDOWN";
const KEY_MUTE: &str = "KEY_MUTE";
const KEY_CHANNEL_UP: &str = "KEY_CHUP";
const KEY_CHANNEL_DOWN: &str = "KEY_CHDOWN";
const KEY_ENTER: &str = "KEY_ENTER";

fn app_id(app: StreamingApp) -> Option<&'static str> {
    match app {
        StreamingApp::Netflix => Some("Netflix"),
        StreamingApp::Youtube => Some("YouTube"),
        StreamingApp::Disney => Some("DisneyPlus"),
        StreamingApp::Spotify => Some("Spotify"),
        StreamingApp::Prime => Some("AmazonInstantVideo"),
        StreamingApp::AppleTv => Some("AppleTV"),
        _ => None,
    }
}

fn input_key(input: InputSource) -> &'static str {
    match input {
        InputSource::Hdmi1 => "KEY_HDMI1",
        InputSource::Hdmi2 => "KEY_HDMI2",
        InputSource::Hdmi3 => "KEY_HDMI3",
        InputSource::Hdmi4 => "KEY_HDMI4",
        InputSource::Usb => "KEY_USB",
        InputSource::Av => "KEY_AV1",
        InputSource::Component => "KEY_COMPONENT1",
        InputSource::Tv => "KEY_TV",
        InputSource::Mirror => "KEY_CONTENTS",
    }
}

fn direction_key(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "KEY_UP",
        Direction::Down => "KEY_DOWN",
        Direction::Left => "KEY_LEFT",
        Direction::Right => "KEY_RIGHT",
        Direction::Enter => KEY_ENTER,
        Direction::Back => "KEY_RETURN",
        Direction::Home => "KEY_HOME",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    Waiting,
    Paired,
    Declined,
    Expired,
    Closed,
}

/// Key and number of presses that move the volume from one level to another
fn volume_steps(from: u8, to: u8) -> (&'static str, u8) {
    if to >= from {
        (KEY_VOLUME_UP, to - from)
    } else {
        (KEY_VOLUME_DOWN, from - to)
    }
}

/// Inbound channel events for one socket
struct SamsungEvents {
    host: String,
    state: watch::Sender<PairState>,
    credentials: Arc<dyn CredentialStore>,
}

impl SocketHandler for SamsungEvents {
    fn on_message(&self, text: &str) {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            trace!(host = %self.host, "ignoring non-json frame");
            return;
        };

        match message.get("event").and_then(Value::as_str) {
            Some("ms.channel.connect") => {
                if let Some(token) = message.pointer("/data/token").and_then(Value::as_str) {
                    match self
                        .credentials
                        .put_credential(TvBrand::Samsung, &self.host, token)
                    {
                        Ok(()) => info!(host = %self.host, "stored samsung pairing token"),
                        Err(e) => warn!(host = %self.host, error = %e, "could not store pairing token"),
                    }
                }
                self.state.send_replace(PairState::Paired);
            }
            Some("ms.channel.unauthorized") => {
                self.state.send_replace(PairState::Declined);
            }
            Some("ms.channel.timeOut") => {
                self.state.send_replace(PairState::Expired);
            }
            other => trace!(host = %self.host, event = ?other, "samsung event"),
        }
    }

    fn on_close(&self) {
        self.state.send_if_modified(|state| {
            if *state == PairState::Waiting {
                *state = PairState::Closed;
                true
            } else {
                false
            }
        });
    }
}

/// A paired remote-control socket
pub struct SamsungSession {
    link: SocketLink,
}

impl Liveness for SamsungSession {
    fn is_alive(&self) -> bool {
        self.link.is_alive()
    }
}

/// Samsung Smart TV WebSocket API implementation
pub struct SamsungController {
    ctx: AdapterContext,
    connections: ConnectionManager<SamsungSession>,
}

impl SamsungController {
    const WS_PORT: u16 = 8001;
    const WSS_PORT: u16 = 8002;

    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            ctx,
            connections: ConnectionManager::new(),
        }
    }

    /// Control port for a target. The TLS port maps to the plain one.
    fn port(target: &TvTarget) -> u16 {
        match target.port {
            None | Some(Self::WSS_PORT) => Self::WS_PORT,
            Some(port) => port,
        }
    }

    /// Build WebSocket URL for Samsung TV
    fn build_ws_url(&self, host: &str, port: u16, token: Option<&str>) -> String {
        let app_name_b64 = BASE64.encode(&self.ctx.config.app_name);

        match token {
            Some(t) => format!(
                "ws://{}:{}/api/v2/channels/samsung.remote.control?name={}&token={}",
                host, port, app_name_b64, t
            ),
            None => format!(
                "ws://{}:{}/api/v2/channels/samsung.remote.control?name={}",
                host, port, app_name_b64
            ),
        }
    }

    fn stored_token(&self, host: &str) -> Option<String> {
        match self.ctx.credentials.get_credential(TvBrand::Samsung, host) {
            Ok(token) => token,
            Err(e) => {
                warn!(%host, error = %e, "could not read pairing token");
                None
            }
        }
    }

    /// Open the socket and wait for the channel to accept us. Without a
    /// stored token the TV shows a prompt, so the wait is longer.
    async fn open_session(&self, target: &TvTarget) -> Result<SamsungSession> {
        let host = target.host.clone();
        let token = self.stored_token(&host);
        let url = self.build_ws_url(&host, Self::port(target), token.as_deref());

        let (state_tx, mut state_rx) = watch::channel(PairState::Waiting);
        let handler = Arc::new(SamsungEvents {
            host: host.clone(),
            state: state_tx,
            credentials: self.ctx.credentials.clone(),
        });

        let link = SocketLink::open(&url, self.ctx.config.handshake_timeout(), handler).await?;

        let wait = if token.is_some() {
            self.ctx.config.handshake_timeout()
        } else {
            info!(%host, "waiting for pairing approval on the TV");
            self.ctx.config.pairing_timeout()
        };

        let outcome = tokio::time::timeout(wait, state_rx.wait_for(|s| *s != PairState::Waiting))
            .await
            .map(|r| r.map(|state| *state));

        match outcome {
            Ok(Ok(PairState::Paired)) => {
                debug!(%host, "samsung channel connected");
                Ok(SamsungSession { link })
            }
            Ok(Ok(PairState::Declined)) => {
                link.close().await;
                Err(ControlError::PairingDeclined(host))
            }
            Ok(Ok(PairState::Closed)) | Ok(Err(_)) => Err(ControlError::SessionLost(host)),
            Ok(Ok(PairState::Expired)) | Ok(Ok(PairState::Waiting)) | Err(_) => {
                link.close().await;
                Err(ControlError::PairingRequired(host))
            }
        }
    }

    async fn session(&self, target: &TvTarget) -> Result<Arc<SamsungSession>> {
        self.connections
            .get_or_connect(&target.host, || self.open_session(target))
            .await
    }

    async fn send_message(&self, target: &TvTarget, message: &Value) -> Result<()> {
        let session = self.session(target).await?;
        session.link.send_json(message).await
    }

    /// Fire-and-forget keypress. The TV never acknowledges, so success is
    /// assumed after the grace delay.
    async fn send_key(&self, target: &TvTarget, key: &str) -> Result<CommandResult> {
        let message = json!({
            "method": "ms.remote.control",
            "params": {
                "Cmd": "Click",
                "DataOfCmd": key,
                "Option": "false",
                "TypeOfRemote": "SendRemoteKey",
            }
        });
        self.send_message(target, &message).await?;
        debug!(host = %target.host, %key, "samsung key sent");
        tokio::time::sleep(self.ctx.config.keypress_grace()).await;
        Ok(CommandResult::ok(format!("Sent {}", key)))
    }

    async fn key(&self, target: &TvTarget, key: &str) -> CommandResult {
        self.send_key(target, key).await.into()
    }

    async fn enter_channel(&self, target: &TvTarget, channel: &str) -> Result<CommandResult> {
        let digits = channel_digits(channel)?;
        for (i, digit) in digits.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.ctx.config.digit_delay()).await;
            }
            self.send_key(target, &format!("KEY_{}", digit)).await?;
        }
        tokio::time::sleep(self.ctx.config.digit_delay()).await;
        self.send_key(target, KEY_ENTER).await?;
        Ok(CommandResult::ok(format!("Channel {}", channel.trim())))
    }

    async fn step_volume(&self, target: &TvTarget, from: u8, to: u8) -> Result<CommandResult> {
        let (key, steps) = volume_steps(from, to);
        for _ in 0..steps {
            self.send_key(target, key).await?;
        }
        Ok(CommandResult::ok_with(
            format!("Volume {}", to),
            json!({ "volume": to, "approximate": true }),
        ))
    }

    async fn rest(
        &self,
        target: &TvTarget,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> HttpResponse {
        self.ctx
            .http
            .request_text(
                &target.host,
                Self::port(target),
                method,
                path,
                body,
                self.ctx.config.command_timeout(),
            )
            .await
    }

    /// Parse the `device` block of `/api/v2/`
    fn parse_device_info(json: &Value) -> Option<DeviceInfo> {
        let device = json.get("device")?;
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| device.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };

        Some(DeviceInfo {
            model: text(&["modelName", "model"]),
            name: text(&["name", "deviceName"]),
            software_version: text(&["firmwareVersion", "version"]),
            mac: text(&["wifiMac"]),
            power_mode: text(&["PowerState"]),
        })
    }

    /// Get device info from Samsung TV
    pub async fn get_device_info(&self, target: &TvTarget) -> Option<DeviceInfo> {
        let response = self.rest(target, Method::Get, "/api/v2/", None).await;
        Self::parse_device_info(&response.json()?)
    }
}

#[async_trait]
impl TvAdapter for SamsungController {
    fn brand(&self) -> TvBrand {
        TvBrand::Samsung
    }

    fn requires_pairing(&self) -> bool {
        true
    }

    async fn connect(&self, target: &TvTarget) -> CommandResult {
        match self.session(target).await {
            Ok(_) => CommandResult::ok("Connected"),
            Err(e) => e.into(),
        }
    }

    async fn disconnect(&self, target: &TvTarget) {
        if let Some(session) = self.connections.evict(&target.host).await {
            session.link.close().await;
        }
    }

    async fn is_paired(&self, target: &TvTarget) -> bool {
        self.connections.cached(&target.host).await.is_some()
    }

    async fn power(&self, target: &TvTarget, on: Option<bool>) -> CommandResult {
        // KEY_POWER toggles; only off has a dedicated key
        let key = if on == Some(false) { KEY_POWER_OFF } else { KEY_POWER };
        self.key(target, key).await
    }

    async fn set_volume(&self, target: &TvTarget, level: i32) -> CommandResult {
        let volume = clamp_volume(level);

        let info = self.rest(target, Method::Get, "/api/v2/", None).await;
        if !info.responded() {
            return ControlError::Unreachable(target.host.clone()).into();
        }
        let current = info
            .json()
            .and_then(|json| json.pointer("/device/volume").and_then(Value::as_i64))
            .map(reported_volume);

        if info.ok {
            let body = json!({ "volume": volume });
            let set = self
                .rest(target, Method::Put, "/api/v2/audio/volume", Some(&body))
                .await;
            if set.ok {
                return CommandResult::ok_with(format!("Volume {}", volume), json!({ "volume": volume }));
            }
            debug!(host = %target.host, status = ?set.status, "rest volume rejected");
        }

        // No direct set on this model; step there from the reported level
        let Some(current) = current else {
            let mut result = CommandResult::unsupported(format!(
                "{} does not report its volume; use volume up or down",
                target
            ));
            result.data = Some(json!({ "volume": volume }));
            return result;
        };
        self.step_volume(target, current, volume).await.into()
    }

    async fn volume_up(&self, target: &TvTarget) -> CommandResult {
        self.key(target, KEY_VOLUME_UP).await
    }

    async fn volume_down(&self, target: &TvTarget) -> CommandResult {
        self.key(target, KEY_VOLUME_DOWN).await
    }

    async fn mute(&self, target: &TvTarget, _muted: Option<bool>) -> CommandResult {
        // Mute is a toggle key on every model
        self.key(target, KEY_MUTE).await
    }

    async fn set_channel(&self, target: &TvTarget, channel: &str) -> CommandResult {
        self.enter_channel(target, channel).await.into()
    }

    async fn channel_up(&self, target: &TvTarget) -> CommandResult {
        self.key(target, KEY_CHANNEL_UP).await
    }

    async fn channel_down(&self, target: &TvTarget) -> CommandResult {
        self.key(target, KEY_CHANNEL_DOWN).await
    }

    async fn set_input(&self, target: &TvTarget, input: InputSource) -> CommandResult {
        self.key(target, input_key(input)).await
    }

    async fn launch_app(&self, target: &TvTarget, app: StreamingApp) -> CommandResult {
        let Some(id) = app_id(app) else {
            return CommandResult::unsupported(format!(
                "{} is not available on Samsung TVs",
                app.display_name()
            ));
        };

        let response = self
            .rest(target, Method::Post, &format!("/api/v2/applications/{}", id), None)
            .await;
        if response.ok {
            return CommandResult::ok(format!("Launched {}", app.display_name()));
        }

        debug!(host = %target.host, app = %id, "rest launch failed, trying deep link");
        let message = json!({
            "method": "ms.channel.emit",
            "params": {
                "event": "ed.apps.launch",
                "to": "host",
                "data": { "appId": id, "action_type": "DEEP_LINK" },
            }
        });
        match self.send_message(target, &message).await {
            Ok(()) => CommandResult::ok(format!("Launching {}", app.display_name())),
            Err(e) => e.into(),
        }
    }

    async fn navigate(&self, target: &TvTarget, direction: Direction) -> CommandResult {
        self.key(target, direction_key(direction)).await
    }

    async fn get_status(&self, target: &TvTarget) -> TvStatus {
        let response = self
            .ctx
            .http
            .get(
                &target.host,
                Self::port(target),
                "/api/v2/",
                self.ctx.config.probe_timeout(),
            )
            .await;
        if !response.ok {
            return TvStatus::offline();
        }

        let json = response.json().unwrap_or(Value::Null);
        let power = match json.pointer("/device/PowerState").and_then(Value::as_str) {
            Some("standby") => PowerState::Standby,
            Some("off") => PowerState::Off,
            // Answering REST means the panel is on for older models
            _ => PowerState::On,
        };
        let volume = json
            .pointer("/device/volume")
            .and_then(Value::as_i64)
            .map(reported_volume);

        TvStatus {
            online: true,
            power,
            volume,
            current_app: None,
        }
    }
}

#[async_trait]
impl TvProbe for SamsungController {
    fn probe_brand(&self) -> TvBrand {
        TvBrand::Samsung
    }

    async fn probe(&self, host: &str) -> Option<DiscoveredTv> {
        let ports = [Self::WS_PORT, Self::WSS_PORT];
        let answers = join_all(ports.map(|port| self.probe_port(host, port))).await;
        answers.into_iter().flatten().next()
    }
}

impl SamsungController {
    async fn probe_port(&self, host: &str, port: u16) -> Option<DiscoveredTv> {
        let response = self
            .ctx
            .http
            .get(host, port, "/api/v2/", self.ctx.config.probe_timeout())
            .await;
        if !response.ok {
            return None;
        }

        let text = response.body.as_deref().unwrap_or_default();
        // Be lenient - a "device" block or vendor string is enough
        if !(text.contains("\"device\"") || text.contains("Samsung") || text.contains("Tizen")) {
            return None;
        }

        let info = response
            .json()
            .and_then(|json| Self::parse_device_info(&json))
            .unwrap_or_default();
        let mut tv = DiscoveredTv::new(
            host,
            TvBrand::Samsung,
            info.name.clone().unwrap_or_else(|| "Samsung TV".to_string()),
        );
        tv.model = info.model;
        tv.mac = info.mac;
        tv.port = Some(port);
        tv.manufacturer = Some("Samsung".to_string());
        Some(tv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::error::ErrorKind;
    use crate::db::MemoryStore;
    use crate::test_utils::{MockSocketServer, host_port};

    fn connect_event(token: Option<&str>) -> String {
        match token {
            Some(t) => json!({"event": "ms.channel.connect", "data": {"token": t}}).to_string(),
            None => json!({"event": "ms.channel.connect", "data": {}}).to_string(),
        }
    }

    fn fast_config() -> ControlConfig {
        ControlConfig {
            keypress_grace_ms: 10,
            digit_delay_ms: 150,
            handshake_timeout_ms: 1000,
            pairing_timeout_ms: 1000,
            command_timeout_ms: 1000,
            probe_timeout_ms: 1000,
            ..ControlConfig::default()
        }
    }

    fn controller_with(store: Arc<MemoryStore>) -> SamsungController {
        SamsungController::new(AdapterContext::new(Arc::new(fast_config()), store))
    }

    fn sent_keys(server: &MockSocketServer) -> Vec<String> {
        server
            .messages()
            .iter()
            .filter_map(|m| serde_json::from_str::<Value>(m).ok())
            .filter_map(|v| v.pointer("/params/DataOfCmd").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_ws_url_contains_encoded_app_name() {
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let url = controller.build_ws_url("192.168.1.50", 8001, None);
        assert_eq!(
            url,
            format!(
                "ws://192.168.1.50:8001/api/v2/channels/samsung.remote.control?name={}",
                BASE64.encode("LanTvControl")
            )
        );
        let with_token = controller.build_ws_url("192.168.1.50", 8001, Some("123"));
        assert!(with_token.ends_with("&token=123"));
    }

    #[test]
    fn test_tls_port_maps_to_plain() {
        assert_eq!(SamsungController::port(&TvTarget::new("tv")), 8001);
        assert_eq!(SamsungController::port(&TvTarget::new("tv").with_port(8002)), 8001);
        assert_eq!(SamsungController::port(&TvTarget::new("tv").with_port(9000)), 9000);
    }

    #[test]
    fn test_app_table() {
        assert_eq!(app_id(StreamingApp::Netflix), Some("Netflix"));
        assert_eq!(app_id(StreamingApp::Prime), Some("AmazonInstantVideo"));
        assert_eq!(app_id(StreamingApp::Twitch), None);
    }

    #[tokio::test]
    async fn test_channel_entry_sends_digits_then_enter() {
        let server = MockSocketServer::start_with_greeting(Some(connect_event(None)), |_| Vec::new()).await;
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        let result = controller.set_channel(&target, "157").await;
        assert!(result.success, "{}", result.message);

        assert!(server.wait_for_messages(4, Duration::from_secs(2)).await);
        assert_eq!(sent_keys(&server), ["KEY_1", "KEY_5", "KEY_7", "KEY_ENTER"]);

        let timed = server.timed_messages();
        for pair in timed.windows(2) {
            assert!(pair[1].0.duration_since(pair[0].0) >= Duration::from_millis(100));
        }
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_channel_rejected_without_network() {
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let result = controller
            .set_channel(&TvTarget::new("127.0.0.1").with_port(1), "12a")
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Rejected));
    }

    #[tokio::test]
    async fn test_pairing_token_is_persisted() {
        let server =
            MockSocketServer::start_with_greeting(Some(connect_event(Some("9999"))), |_| Vec::new()).await;
        let store = Arc::new(MemoryStore::new());
        let controller = controller_with(store.clone());
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        let result = controller.connect(&target).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(
            store.get_credential(TvBrand::Samsung, "127.0.0.1").unwrap().as_deref(),
            Some("9999")
        );
    }

    #[tokio::test]
    async fn test_pairing_declined() {
        let declined = json!({"event": "ms.channel.unauthorized"}).to_string();
        let server = MockSocketServer::start_with_greeting(Some(declined), |_| Vec::new()).await;
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        let result = controller.power(&target, None).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Rejected));
        assert!(server.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_pairing_times_out() {
        let server = MockSocketServer::start(|_| Vec::new()).await;
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        let result = controller.connect(&target).await;
        assert!(!result.success);
        assert!(result.message.contains("Not paired"));
    }

    #[tokio::test]
    async fn test_keys_reuse_one_socket() {
        let server = MockSocketServer::start_with_greeting(Some(connect_event(None)), |_| Vec::new()).await;
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        assert!(controller.volume_up(&target).await.success);
        assert!(controller.navigate(&target, Direction::Back).await.success);
        assert!(controller.power(&target, Some(false)).await.success);

        assert!(server.wait_for_messages(3, Duration::from_secs(2)).await);
        assert_eq!(sent_keys(&server), ["KEY_VOLUP", "KEY_RETURN", "KEY_POWEROFF"]);
        assert_eq!(server.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_get_status_reads_rest_info() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v2/")
            .with_status(200)
            .with_body(r#"{"device":{"PowerState":"standby","modelName":"QN55","volume":4294967306}}"#)
            .create_async()
            .await;

        let controller = controller_with(Arc::new(MemoryStore::new()));
        let (host, port) = host_port(&server);
        let status = controller
            .get_status(&TvTarget::new(host).with_port(port))
            .await;
        assert!(status.online);
        assert_eq!(status.power, PowerState::Standby);
        assert_eq!(status.volume, Some(100));
    }

    #[tokio::test]
    async fn test_get_status_offline() {
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let status = controller
            .get_status(&TvTarget::new("127.0.0.1").with_port(1))
            .await;
        assert!(!status.online);
    }

    #[tokio::test]
    async fn test_set_volume_clamps_and_uses_rest() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/api/v2/").with_status(200).with_body("{}").create_async().await;
        let put = server
            .mock("PUT", "/api/v2/audio/volume")
            .match_body(mockito::Matcher::Json(json!({"volume": 100})))
            .with_status(200)
            .create_async()
            .await;

        let controller = controller_with(Arc::new(MemoryStore::new()));
        let (host, port) = host_port(&server);
        let result = controller
            .set_volume(&TvTarget::new(host).with_port(port), 150)
            .await;

        put.assert_async().await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["volume"], 100);
    }

    #[tokio::test]
    async fn test_rejected_rest_volume_without_level_fails() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/api/v2/").with_status(200).with_body("{}").create_async().await;
        let put = server
            .mock("PUT", "/api/v2/audio/volume")
            .with_status(500)
            .create_async()
            .await;

        let controller = controller_with(Arc::new(MemoryStore::new()));
        let (host, port) = host_port(&server);
        let result = controller
            .set_volume(&TvTarget::new(host).with_port(port), 40)
            .await;

        put.assert_async().await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unsupported));
        assert_eq!(result.data.unwrap()["volume"], 40);
        assert!(controller.connections.is_empty());
    }

    #[tokio::test]
    async fn test_set_volume_unreachable() {
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let result = controller
            .set_volume(&TvTarget::new("127.0.0.1").with_port(1), 40)
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Unreachable));
    }

    #[test]
    fn test_volume_steps() {
        assert_eq!(volume_steps(20, 25), (KEY_VOLUME_UP, 5));
        assert_eq!(volume_steps(60, 45), (KEY_VOLUME_DOWN, 15));
        assert_eq!(volume_steps(30, 30), (KEY_VOLUME_UP, 0));
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_socket() {
        let server = MockSocketServer::start_with_greeting(Some(connect_event(None)), |_| Vec::new()).await;
        let controller = controller_with(Arc::new(MemoryStore::new()));
        let target = TvTarget::new("127.0.0.1").with_port(server.port());

        assert!(!controller.is_paired(&target).await);
        let (first, second) = tokio::join!(controller.connect(&target), controller.connect(&target));

        assert!(first.success, "{}", first.message);
        assert!(second.success, "{}", second.message);
        assert_eq!(server.connection_count(), 1);
        assert!(controller.is_paired(&target).await);

        controller.disconnect(&target).await;
        assert!(!controller.is_paired(&target).await);
    }
}
