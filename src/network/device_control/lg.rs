//! LG WebOS TV controller. Talks SSAP over the WebSocket on port 3000:
//! a `register` handshake (which prompts on the TV the first time and yields
//! a client key), then `request` messages correlated by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::adapter::{AdapterContext, TvAdapter, TvProbe};
use super::types::{
    AppInfo, ChannelInfo, CommandResult, Direction, DiscoveredTv, InputSource, PowerState, StreamingApp,
    TvBrand, TvStatus, TvTarget, clamp_volume, reported_volume,
};
use crate::db::CredentialStore;
use crate::error::{ControlError, Result};
use crate::network::connection::{ConnectionManager, Liveness};
use crate::network::transport::{SocketHandler, SocketLink};

const REGISTER_ID: &str = "register_0";

fn app_id(app: StreamingApp) -> Option<&'static str> {
    match app {
        StreamingApp::Netflix => Some("netflix"),
        StreamingApp::Youtube => Some("youtube.leanback.v4"),
        StreamingApp::Disney => Some("com.disney.disneyplus-prod"),
        StreamingApp::Spotify => Some("spotify-beehive"),
        StreamingApp::Prime => Some("amazon"),
        StreamingApp::AppleTv => Some("com.apple.appletv"),
        _ => None,
    }
}

fn input_id(input: InputSource) -> Option<&'static str> {
    match input {
        InputSource::Hdmi1 => Some("HDMI_1"),
        InputSource::Hdmi2 => Some("HDMI_2"),
        InputSource::Hdmi3 => Some("HDMI_3"),
        InputSource::Hdmi4 => Some("HDMI_4"),
        InputSource::Av => Some("AV_1"),
        InputSource::Component => Some("COMP_1"),
        _ => None,
    }
}

/// Button name on the pointer input socket
fn pointer_button(direction: Direction) -> Option<&'static str> {
    match direction {
        Direction::Up => Some("UP"),
        Direction::Down => Some("DOWN"),
        Direction::Left => Some("LEFT"),
        Direction::Right => Some("RIGHT"),
        Direction::Back => Some("BACK"),
        Direction::Enter | Direction::Home => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    /// The TV is showing its accept dialog
    Prompted,
    Registered,
    Declined,
    Closed,
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Value>>>;

struct LgEvents {
    host: String,
    pending: Arc<PendingMap>,
    registration: watch::Sender<Registration>,
    credentials: Arc<dyn CredentialStore>,
}

impl LgEvents {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SocketHandler for LgEvents {
    fn on_message(&self, text: &str) {
        let Ok(message) = serde_json::from_str::<Value>(text) else {
            trace!(host = %self.host, "ignoring non-json frame");
            return;
        };
        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
        let id = message.get("id").and_then(Value::as_str).unwrap_or_default();

        if id == REGISTER_ID {
            match kind {
                "registered" => {
                    if let Some(key) = message.pointer("/payload/client-key").and_then(Value::as_str) {
                        match self.credentials.put_credential(TvBrand::Lg, &self.host, key) {
                            Ok(()) => info!(host = %self.host, "stored lg client key"),
                            Err(e) => warn!(host = %self.host, error = %e, "could not store client key"),
                        }
                    }
                    self.registration.send_replace(Registration::Registered);
                }
                "response" => {
                    if message.pointer("/payload/pairingType").and_then(Value::as_str) == Some("PROMPT") {
                        info!(host = %self.host, "accept the connection prompt on the TV");
                        self.registration.send_replace(Registration::Prompted);
                    }
                }
                "error" => {
                    debug!(host = %self.host, error = ?message.get("error"), "lg registration refused");
                    self.registration.send_replace(Registration::Declined);
                }
                _ => {}
            }
            return;
        }

        if let Some(waiter) = self.pending().remove(id) {
            let _ = waiter.send(message);
        } else {
            trace!(host = %self.host, %id, %kind, "unsolicited lg message");
        }
    }

    fn on_close(&self) {
        // Dropping the senders wakes every waiter with an error
        self.pending().clear();
        self.registration.send_if_modified(|state| {
            if matches!(state, Registration::Pending | Registration::Prompted) {
                *state = Registration::Closed;
                true
            } else {
                false
            }
        });
    }
}

/// A registered SSAP connection
pub struct LgSession {
    host: String,
    link: SocketLink,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
}

impl Liveness for LgSession {
    fn is_alive(&self) -> bool {
        self.link.is_alive()
    }
}

impl LgSession {
    fn next_request_id(&self) -> String {
        format!("command_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Send one request and wait for the correlated reply's payload
    async fn request(&self, uri: &str, payload: Option<Value>, timeout: std::time::Duration) -> Result<Value> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        let message = json!({
            "type": "request",
            "id": id,
            "uri": uri,
            "payload": payload.unwrap_or_else(|| json!({})),
        });
        if let Err(e) = self.link.send_json(&message).await {
            self.forget(&id);
            return Err(e);
        }
        trace!(host = %self.host, %id, %uri, "lg request sent");

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ControlError::SessionLost(self.host.clone())),
            Err(_) => {
                self.forget(&id);
                return Err(ControlError::Timeout(uri.to_string()));
            }
        };

        if reply.get("type").and_then(Value::as_str) == Some("error") {
            let reason = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(uri)
                .to_string();
            return Err(ControlError::Rejected(reason));
        }

        let payload = reply.get("payload").cloned().unwrap_or(Value::Null);
        if payload.get("returnValue").and_then(Value::as_bool) == Some(false) {
            let reason = payload
                .get("errorText")
                .and_then(Value::as_str)
                .unwrap_or(uri)
                .to_string();
            return Err(ControlError::Rejected(reason));
        }
        Ok(payload)
    }

    fn forget(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

/// Pointer-socket sink; button frames need no replies
struct IgnoreFrames;

impl SocketHandler for IgnoreFrames {
    fn on_message(&self, _text: &str) {}
}

/// LG WebOS TV implementation
pub struct LgController {
    ctx: AdapterContext,
    connections: ConnectionManager<LgSession>,
}

impl LgController {
    const WS_PORT: u16 = 3000;
    const WSS_PORT: u16 = 3001;

    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            ctx,
            connections: ConnectionManager::new(),
        }
    }

    fn port(target: &TvTarget) -> u16 {
        match target.port {
            None | Some(Self::WSS_PORT) => Self::WS_PORT,
            Some(port) => port,
        }
    }

    /// Build the handshake/registration message for LG TV
    fn build_handshake(&self, client_key: Option<&str>) -> Value {
        let permissions = json!([
            "LAUNCH",
            "LAUNCH_WEBAPP",
            "APP_TO_APP",
            "CLOSE",
            "TEST_OPEN",
            "TEST_PROTECTED",
            "CONTROL_AUDIO",
            "CONTROL_DISPLAY",
            "CONTROL_INPUT_JOYSTICK",
            "CONTROL_INPUT_MEDIA_RECORDING",
            "CONTROL_INPUT_MEDIA_PLAYBACK",
            "CONTROL_INPUT_TV",
            "CONTROL_POWER",
            "READ_APP_STATUS",
            "READ_CURRENT_CHANNEL",
            "READ_INPUT_DEVICE_LIST",
            "READ_NETWORK_STATE",
            "READ_RUNNING_APPS",
            "READ_TV_CHANNEL_LIST",
            "WRITE_NOTIFICATION_TOAST",
            "READ_POWER_STATE",
            "READ_COUNTRY_INFO"
        ]);
        let app_name = &self.ctx.config.app_name;

        let mut message = json!({
            "type": "register",
            "id": REGISTER_ID,
            "payload": {
                "forcePairing": false,
                "pairingType": "PROMPT",
                "manifest": {
                    "manifestVersion": 1,
                    "appVersion": "1.1",
                    "signed": {
                        "created": "20140509",
                        "appId": "com.lge.test",
                        "vendorId": "com.lge",
                        "localizedAppNames": {
                            "": app_name,
                            "en-US": app_name
                        },
                        "localizedVendorNames": {
                            "": "LG Electronics"
                        },
                        "permissions": permissions.clone(),
                        "serial": "2f930e2d2cfe083771f68e4fe7bb07"
                    },
                    "permissions": permissions,
                    "signatures": [
                        {
                            "signatureVersion": 1,
                            "signature": "eyJhbGdvcml0aG0iOiJSU0EtU0hBMjU2Iiwia2V5SWQiOiJ0ZXN0LXNpZ25pbmctY2VydCIsInNpZ25hdHVyZVZlcnNpb24iOjF9.hrVRgjCwXVvE2OOSpDZ58hR+59aFNwYDyjQgKk3auukd7pcegmE2CzPCa0bJ0ZsRAcKkCTJrWo5iDzNhMBWRyaMOv5zWSrthlf7G128qvIlpMT0YNY+n/FaOHE73uLrS/g7swl3/qH/BGFG2Hu4RlL48eb3lLKqTt2xKHdCs6Cd4RMfJPYnzgvI4BNrFUKsjkcu+WD4OO2A27Pq1n50cMchmcaXadJhGrOqH5YmHdOCj5NSHzJYrsW0HPlpuAx/ECMeIZYDh6RMqaFM2DXzdKX9NmmyqzJ3o/0lkk/N97gfVRLW5hA29yeAwaCViZNCP8iC9aO0q9fQojoa7NQnAtw=="
                        }
                    ]
                }
            }
        });

        if let Some(key) = client_key {
            message["payload"]["client-key"] = Value::String(key.to_string());
        }
        message
    }

    fn stored_key(&self, host: &str) -> Option<String> {
        match self.ctx.credentials.get_credential(TvBrand::Lg, host) {
            Ok(key) => key,
            Err(e) => {
                warn!(%host, error = %e, "could not read client key");
                None
            }
        }
    }

    async fn open_session(&self, target: &TvTarget) -> Result<LgSession> {
        let host = target.host.clone();
        let client_key = self.stored_key(&host);
        let url = format!("ws://{}:{}", host, Self::port(target));

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let (registration_tx, mut registration_rx) = watch::channel(Registration::Pending);
        let handler = Arc::new(LgEvents {
            host: host.clone(),
            pending: pending.clone(),
            registration: registration_tx,
            credentials: self.ctx.credentials.clone(),
        });

        let link = SocketLink::open(&url, self.ctx.config.handshake_timeout(), handler).await?;
        link.send_json(&self.build_handshake(client_key.as_deref()))
            .await?;

        let wait = if client_key.is_some() {
            self.ctx.config.handshake_timeout()
        } else {
            self.ctx.config.pairing_timeout()
        };
        let outcome = tokio::time::timeout(
            wait,
            registration_rx.wait_for(|s| {
                matches!(
                    s,
                    Registration::Registered | Registration::Declined | Registration::Closed
                )
            }),
        )
        .await
        .map(|r| r.map(|state| *state));

        match outcome {
            Ok(Ok(Registration::Registered)) => {
                debug!(%host, "lg registered");
                Ok(LgSession {
                    host,
                    link,
                    pending,
                    next_id: AtomicU64::new(0),
                })
            }
            Ok(Ok(Registration::Declined)) => {
                link.close().await;
                Err(ControlError::PairingDeclined(host))
            }
            Ok(Ok(Registration::Closed)) | Ok(Err(_)) => Err(ControlError::SessionLost(host)),
            Ok(Ok(_)) | Err(_) => {
                link.close().await;
                Err(ControlError::PairingRequired(host))
            }
        }
    }

    async fn session(&self, target: &TvTarget) -> Result<Arc<LgSession>> {
        self.connections
            .get_or_connect(&target.host, || self.open_session(target))
            .await
    }

    /// Send an SSAP request and return the reply payload
    pub async fn send_command(&self, target: &TvTarget, uri: &str, payload: Option<Value>) -> Result<Value> {
        let session = self.session(target).await?;
        session
            .request(uri, payload, self.ctx.config.command_timeout())
            .await
    }

    async fn command(
        &self,
        target: &TvTarget,
        uri: &str,
        payload: Option<Value>,
        success: impl Into<String>,
    ) -> CommandResult {
        match self.send_command(target, uri, payload).await {
            Ok(_) => CommandResult::ok(success),
            Err(e) => e.into(),
        }
    }

    async fn press_pointer_button(&self, target: &TvTarget, button: &str) -> Result<()> {
        let payload = self
            .send_command(
                target,
                "ssap://com.webos.service.networkinput/getPointerInputSocket",
                None,
            )
            .await?;
        let socket_path = payload
            .get("socketPath")
            .and_then(Value::as_str)
            .ok_or_else(|| ControlError::Malformed("pointer socket path missing".to_string()))?;

        let pointer = SocketLink::open(
            socket_path,
            self.ctx.config.handshake_timeout(),
            Arc::new(IgnoreFrames),
        )
        .await?;
        let sent = pointer
            .send_text(format!("type:button\nname:{}\n\n", button))
            .await;
        pointer.close().await;
        sent
    }

    /// Cheap liveness check that never triggers a pairing prompt
    async fn http_online(&self, target: &TvTarget) -> bool {
        let response = self
            .ctx
            .http
            .get(&target.host, Self::port(target), "/", self.ctx.config.probe_timeout())
            .await;
        matches!(response.status, Some(200) | Some(404))
    }

    /// Show a notification bubble on the TV
    pub async fn show_toast(&self, target: &TvTarget, message: &str) -> CommandResult {
        self.command(
            target,
            "ssap://system.notifications/createToast",
            Some(json!({ "message": message })),
            "Toast shown",
        )
        .await
    }

    pub async fn get_apps(&self, target: &TvTarget) -> Vec<AppInfo> {
        let payload = match self
            .send_command(target, "ssap://com.webos.applicationManager/listApps", None)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                debug!(host = %target.host, error = %e, "lg app list failed");
                return Vec::new();
            }
        };

        let mut apps: Vec<AppInfo> = payload
            .get("apps")
            .and_then(Value::as_array)
            .map(|apps| {
                apps.iter()
                    .filter_map(|app| {
                        Some(AppInfo {
                            id: app.get("id")?.as_str()?.to_string(),
                            name: app.get("title")?.as_str()?.to_string(),
                            icon_url: app.get("icon").and_then(Value::as_str).map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        apps
    }

    /// External inputs as (id, label) pairs
    pub async fn get_inputs(&self, target: &TvTarget) -> Vec<(String, String)> {
        let Ok(payload) = self
            .send_command(target, "ssap://tv/getExternalInputList", None)
            .await
        else {
            return Vec::new();
        };

        payload
            .get("devices")
            .and_then(Value::as_array)
            .map(|devices| {
                devices
                    .iter()
                    .filter_map(|d| {
                        let id = d.get("id")?.as_str()?.to_string();
                        let label = d
                            .get("label")
                            .and_then(Value::as_str)
                            .unwrap_or(&id)
                            .to_string();
                        Some((id, label))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tuner channel lineup; empty without a tuner or a session
    pub async fn get_channels(&self, target: &TvTarget) -> Vec<ChannelInfo> {
        let payload = match self
            .send_command(target, "ssap://tv/getChannelList", None)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                debug!(host = %target.host, error = %e, "lg channel list failed");
                return Vec::new();
            }
        };

        payload
            .get("channelList")
            .and_then(Value::as_array)
            .map(|channels| {
                channels
                    .iter()
                    .filter_map(|c| {
                        let number = c.get("channelNumber")?.as_str()?.to_string();
                        Some(ChannelInfo {
                            id: c
                                .get("channelId")
                                .and_then(Value::as_str)
                                .unwrap_or(&number)
                                .to_string(),
                            name: c.get("channelName").and_then(Value::as_str).map(str::to_string),
                            number,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl TvAdapter for LgController {
    fn brand(&self) -> TvBrand {
        TvBrand::Lg
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
        if on == Some(true) {
            return CommandResult::unsupported(
                "LG TVs cannot be turned on over the network; use Wake-on-LAN",
            );
        }
        self.command(target, "ssap://system/turnOff", None, "Power off")
            .await
    }

    async fn set_volume(&self, target: &TvTarget, level: i32) -> CommandResult {
        let volume = clamp_volume(level);
        match self
            .send_command(target, "ssap://audio/setVolume", Some(json!({ "volume": volume })))
            .await
        {
            Ok(_) => CommandResult::ok_with(format!("Volume {}", volume), json!({ "volume": volume })),
            Err(e) => e.into(),
        }
    }

    async fn volume_up(&self, target: &TvTarget) -> CommandResult {
        self.command(target, "ssap://audio/volumeUp", None, "Volume up")
            .await
    }

    async fn volume_down(&self, target: &TvTarget) -> CommandResult {
        self.command(target, "ssap://audio/volumeDown", None, "Volume down")
            .await
    }

    async fn mute(&self, target: &TvTarget, muted: Option<bool>) -> CommandResult {
        let mute = match muted {
            Some(mute) => mute,
            None => match self.send_command(target, "ssap://audio/getStatus", None).await {
                Ok(status) => !status.get("mute").and_then(Value::as_bool).unwrap_or(false),
                Err(e) => return e.into(),
            },
        };
        match self
            .send_command(target, "ssap://audio/setMute", Some(json!({ "mute": mute })))
            .await
        {
            Ok(_) => CommandResult::ok_with(
                if mute { "Muted" } else { "Unmuted" },
                json!({ "muted": mute }),
            ),
            Err(e) => e.into(),
        }
    }

    async fn set_channel(&self, target: &TvTarget, channel: &str) -> CommandResult {
        let channel = channel.trim();
        if channel.is_empty() {
            return ControlError::InvalidInput("empty channel".to_string()).into();
        }
        let payload = if channel.chars().all(|c| c.is_ascii_digit()) {
            json!({ "channelNumber": channel })
        } else {
            json!({ "channelId": channel })
        };
        self.command(
            target,
            "ssap://tv/openChannel",
            Some(payload),
            format!("Channel {}", channel),
        )
        .await
    }

    async fn channel_up(&self, target: &TvTarget) -> CommandResult {
        self.command(target, "ssap://tv/channelUp", None, "Channel up")
            .await
    }

    async fn channel_down(&self, target: &TvTarget) -> CommandResult {
        self.command(target, "ssap://tv/channelDown", None, "Channel down")
            .await
    }

    async fn set_input(&self, target: &TvTarget, input: InputSource) -> CommandResult {
        let Some(id) = input_id(input) else {
            return CommandResult::unsupported(format!("{} input is not available on LG TVs", input));
        };
        self.command(
            target,
            "ssap://tv/switchInput",
            Some(json!({ "inputId": id })),
            format!("Input {}", input),
        )
        .await
    }

    async fn launch_app(&self, target: &TvTarget, app: StreamingApp) -> CommandResult {
        let Some(id) = app_id(app) else {
            return CommandResult::unsupported(format!(
                "{} is not available on LG TVs",
                app.display_name()
            ));
        };
        self.command(
            target,
            "ssap://system.launcher/launch",
            Some(json!({ "id": id })),
            format!("Launched {}", app.display_name()),
        )
        .await
    }

    async fn navigate(&self, target: &TvTarget, direction: Direction) -> CommandResult {
        match direction {
            Direction::Enter => {
                self.command(target, "ssap://com.webos.service.ime/sendEnterKey", None, "enter")
                    .await
            }
            Direction::Home => {
                self.command(
                    target,
                    "ssap://system.launcher/launch",
                    Some(json!({ "id": "com.webos.app.home" })),
                    "home",
                )
                .await
            }
            other => {
                let Some(button) = pointer_button(other) else {
                    return CommandResult::unsupported(format!("{} is not supported", other));
                };
                match self.press_pointer_button(target, button).await {
                    Ok(()) => CommandResult::ok(other.to_string()),
                    Err(e) => e.into(),
                }
            }
        }
    }

    async fn get_status(&self, target: &TvTarget) -> TvStatus {
        // Polls only use an existing session so they never pop a prompt
        let Some(session) = self.connections.cached(&target.host).await else {
            return if self.http_online(target).await {
                TvStatus::online(PowerState::On)
            } else {
                TvStatus::offline()
            };
        };

        let timeout = self.ctx.config.command_timeout();
        let volume = match session.request("ssap://audio/getVolume", None, timeout).await {
            Ok(payload) => payload
                .get("volume")
                .or_else(|| payload.pointer("/volumeStatus/volume"))
                .and_then(Value::as_i64)
                .map(reported_volume),
            Err(ControlError::Rejected(_)) => None,
            Err(e) => {
                debug!(host = %target.host, error = %e, "lg status query failed");
                return if self.http_online(target).await {
                    TvStatus::online(PowerState::On)
                } else {
                    TvStatus::offline()
                };
            }
        };

        let current_app = session
            .request(
                "ssap://com.webos.applicationManager/getForegroundAppInfo",
                None,
                timeout,
            )
            .await
            .ok()
            .and_then(|p| p.get("appId").and_then(Value::as_str).map(str::to_string))
            .filter(|id| !id.is_empty());

        TvStatus {
            online: true,
            power: PowerState::On,
            volume,
            current_app,
        }
    }
}

#[async_trait]
impl TvProbe for LgController {
    fn probe_brand(&self) -> TvBrand {
        TvBrand::Lg
    }

    async fn probe(&self, host: &str) -> Option<DiscoveredTv> {
        let ports = [Self::WS_PORT, Self::WSS_PORT];
        let answers = join_all(ports.map(|port| async move {
            let response = self
                .ctx
                .http
                .get(host, port, "/", self.ctx.config.probe_timeout())
                .await;
            matches!(response.status, Some(200) | Some(404)).then_some(port)
        }))
        .await;

        let port = answers.into_iter().flatten().next()?;
        let mut tv = DiscoveredTv::new(host, TvBrand::Lg, "LG TV");
        tv.port = Some(port);
        tv.manufacturer = Some("LG".to_string());
        Some(tv)
    }
}
