//! Android TV / Google TV controller. There is no single documented control
//! port, so every request walks a short list of candidate ports and takes the
//! first 2xx answer.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::adapter::{AdapterContext, TvAdapter, TvProbe};
use super::types::{
    AppInfo, CommandResult, DeviceInfo, Direction, DiscoveredTv, InputSource, PowerState, StreamingApp,
    TvBrand, TvStatus, TvTarget, clamp_volume, reported_volume,
};
use crate::network::transport::{HttpResponse, Method};

const PORTS: [u16; 3] = [8008, 8443, 8009];

fn package_name(app: StreamingApp) -> Option<&'static str> {
    match app {
        StreamingApp::Netflix => Some("com.netflix.ninja"),
        StreamingApp::Youtube => Some("com.google.android.youtube.tv"),
        StreamingApp::Disney => Some("com.disney.disneyplus"),
        StreamingApp::Spotify => Some("com.spotify.tv.android"),
        StreamingApp::Prime => Some("com.amazon.amazonvideo.livingroom"),
        _ => None,
    }
}

const KEYCODE_MEDIA_PLAY: u16 = 126;
const KEYCODE_MEDIA_PAUSE: u16 = 127;

/// Android `KEYCODE_*` values
fn key_code(direction: Direction) -> u16 {
    match direction {
        Direction::Up => 19,
        Direction::Down => 20,
        Direction::Left => 21,
        Direction::Right => 22,
        Direction::Enter => 66,
        Direction::Back => 4,
        Direction::Home => 3,
    }
}

pub struct AndroidController {
    ctx: AdapterContext,
}

impl AndroidController {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    /// Explicit port first, then the usual suspects
    fn ports(target: &TvTarget) -> Vec<u16> {
        let mut ports: Vec<u16> = target.port.into_iter().collect();
        ports.extend(PORTS.iter().filter(|p| Some(**p) != target.port));
        ports
    }

    /// First successful answer across candidate ports. When none succeed the
    /// last response that answered at all is returned, so callers can tell
    /// a rejection from silence.
    async fn request(
        &self,
        target: &TvTarget,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> HttpResponse {
        let mut fallback = HttpResponse::default();
        for port in Self::ports(target) {
            let response = self
                .ctx
                .http
                .request_text(
                    &target.host,
                    port,
                    method,
                    path,
                    body,
                    self.ctx.config.command_timeout(),
                )
                .await;
            if response.ok {
                debug!(host = %target.host, port, %path, "android request accepted");
                return response;
            }
            if response.responded() {
                fallback = response;
            }
        }
        fallback
    }

    async fn post(&self, target: &TvTarget, path: &str, body: Value, success: impl Into<String>) -> CommandResult {
        match self
            .request(target, Method::Post, path, Some(&body))
            .await
            .check("Android TV")
        {
            Ok(()) => CommandResult::ok(success),
            Err(e) => e.into(),
        }
    }

    async fn send_intent(&self, target: &TvTarget, action: &str) -> HttpResponse {
        self.request(target, Method::Post, "/intent", Some(&json!({ "action": action })))
            .await
    }

    pub async fn send_text(&self, target: &TvTarget, text: &str) -> CommandResult {
        self.post(target, "/input/text", json!({ "text": text }), "Text sent")
            .await
    }

    pub async fn play(&self, target: &TvTarget) -> CommandResult {
        self.post(target, "/input/keyevent", json!({ "keyCode": KEYCODE_MEDIA_PLAY }), "Playing")
            .await
    }

    pub async fn pause(&self, target: &TvTarget) -> CommandResult {
        self.post(target, "/input/keyevent", json!({ "keyCode": KEYCODE_MEDIA_PAUSE }), "Paused")
            .await
    }

    /// Installed apps from `/apps`; empty when no port answers
    pub async fn get_apps(&self, target: &TvTarget) -> Vec<AppInfo> {
        let response = self.request(target, Method::Get, "/apps", None).await;
        if !response.ok {
            return Vec::new();
        }
        let Some(json) = response.json() else {
            return Vec::new();
        };

        let mut apps: Vec<AppInfo> = json
            .get("apps")
            .and_then(Value::as_array)
            .map(|apps| apps.iter().filter_map(Self::parse_app).collect())
            .unwrap_or_default();
        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        apps
    }

    fn parse_app(app: &Value) -> Option<AppInfo> {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| app.get(*k).and_then(Value::as_str))
                .map(str::to_string)
        };
        let id = text(&["packageName", "id"])?;
        Some(AppInfo {
            name: text(&["name", "label", "title"]).unwrap_or_else(|| id.clone()),
            icon_url: text(&["icon", "iconUrl"]),
            id,
        })
    }

    /// Cast-style device description from `/setup/eureka_info`
    pub async fn get_device_info(&self, target: &TvTarget) -> Option<DeviceInfo> {
        let response = self
            .ctx
            .http
            .get(
                &target.host,
                target.port_or(PORTS[0]),
                "/setup/eureka_info",
                self.ctx.config.probe_timeout(),
            )
            .await;
        if !response.ok {
            return None;
        }
        Some(Self::parse_eureka_info(&response.json()?))
    }

    fn parse_eureka_info(json: &Value) -> DeviceInfo {
        let text = |pointer: &str| json.pointer(pointer).and_then(Value::as_str).map(str::to_string);
        DeviceInfo {
            model: text("/device_info/model_name").or_else(|| text("/model_name")),
            name: text("/name"),
            software_version: text("/build_version").or_else(|| text("/cast_build_revision")),
            mac: text("/mac_address"),
            power_mode: None,
        }
    }
}

#[async_trait]
impl TvAdapter for AndroidController {
    fn brand(&self) -> TvBrand {
        TvBrand::Android
    }

    async fn power(&self, target: &TvTarget, on: Option<bool>) -> CommandResult {
        if on != Some(false) {
            return CommandResult::unsupported(
                "Android TV can only be turned off over the network; use Wake-on-LAN to turn it on",
            );
        }
        match self
            .send_intent(target, "android.intent.action.ACTION_SHUTDOWN")
            .await
            .check("Android TV")
        {
            Ok(()) => CommandResult::ok("Power off"),
            Err(e) => e.into(),
        }
    }

    async fn set_volume(&self, target: &TvTarget, level: i32) -> CommandResult {
        let volume = clamp_volume(level);
        match self
            .request(
                target,
                Method::Post,
                "/volume",
                Some(&json!({ "level": f64::from(volume) / 100.0 })),
            )
            .await
            .check("Android TV")
        {
            Ok(()) => CommandResult::ok_with(format!("Volume {}", volume), json!({ "volume": volume })),
            Err(e) => e.into(),
        }
    }

    async fn volume_up(&self, target: &TvTarget) -> CommandResult {
        self.post(target, "/volume/up", json!({}), "Volume up").await
    }

    async fn volume_down(&self, target: &TvTarget) -> CommandResult {
        self.post(target, "/volume/down", json!({}), "Volume down").await
    }

    async fn mute(&self, target: &TvTarget, muted: Option<bool>) -> CommandResult {
        let mute = muted.unwrap_or(true);
        self.post(
            target,
            "/volume/mute",
            json!({ "mute": mute }),
            if mute { "Muted" } else { "Unmuted" },
        )
        .await
    }

    async fn set_channel(&self, _target: &TvTarget, _channel: &str) -> CommandResult {
        CommandResult::unsupported("Android TV does not support direct channel numbers")
    }

    async fn set_input(&self, target: &TvTarget, input: InputSource) -> CommandResult {
        let Some(port) = input.hdmi_port() else {
            return CommandResult::unsupported(format!("{} input is not available on Android TV", input));
        };
        self.post(
            target,
            "/input/hdmi",
            json!({ "port": port }),
            format!("Input {}", input),
        )
        .await
    }

    async fn launch_app(&self, target: &TvTarget, app: StreamingApp) -> CommandResult {
        let Some(package) = package_name(app) else {
            return CommandResult::unsupported(format!(
                "{} is not available on Android TV",
                app.display_name()
            ));
        };

        let intent = format!("android.intent.action.MAIN -n {}/.MainActivity", package);
        if self.send_intent(target, &intent).await.ok {
            return CommandResult::ok(format!("Launched {}", app.display_name()));
        }

        debug!(host = %target.host, %package, "intent launch failed, trying /launch");
        self.post(
            target,
            "/launch",
            json!({ "appId": package }),
            format!("Launched {}", app.display_name()),
        )
        .await
    }

    async fn navigate(&self, target: &TvTarget, direction: Direction) -> CommandResult {
        self.post(
            target,
            "/input/keyevent",
            json!({ "keyCode": key_code(direction) }),
            direction.to_string(),
        )
        .await
    }

    async fn get_status(&self, target: &TvTarget) -> TvStatus {
        let response = self.request(target, Method::Get, "/status", None).await;
        if response.ok {
            let json = response.json().unwrap_or(Value::Null);
            let on = json.get("isOn").and_then(Value::as_bool).unwrap_or(true);
            return TvStatus {
                online: true,
                power: if on { PowerState::On } else { PowerState::Standby },
                volume: json
                    .get("volume")
                    .and_then(Value::as_i64)
                    .map(reported_volume),
                current_app: json.get("app").and_then(Value::as_str).map(str::to_string),
            };
        }

        // Any HTTP answer on any candidate port means the box is up
        if response.responded() {
            return TvStatus::online(PowerState::On);
        }
        for port in Self::ports(target) {
            let probe = self
                .ctx
                .http
                .get(&target.host, port, "/", self.ctx.config.probe_timeout())
                .await;
            if probe.responded() {
                return TvStatus::online(PowerState::On);
            }
        }
        TvStatus::offline()
    }
}

#[async_trait]
impl TvProbe for AndroidController {
    fn probe_brand(&self) -> TvBrand {
        TvBrand::Android
    }

    async fn probe(&self, host: &str) -> Option<DiscoveredTv> {
        let info = self.get_device_info(&TvTarget::new(host)).await?;
        let mut tv = DiscoveredTv::new(
            host,
            TvBrand::Android,
            info.name.clone().unwrap_or_else(|| "Android TV".to_string()),
        );
        tv.friendly_name = info.name;
        tv.model = info.model;
        tv.mac = info.mac;
        tv.port = Some(PORTS[0]);
        Some(tv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::error::ErrorKind;
    use crate::test_utils::host_port;

    fn controller() -> AndroidController {
        AndroidController::new(AdapterContext::ephemeral(ControlConfig {
            command_timeout_ms: 500,
            probe_timeout_ms: 500,
            ..ControlConfig::default()
        }))
    }

    #[test]
    fn test_port_order() {
        assert_eq!(AndroidController::ports(&TvTarget::new("tv")), vec![8008, 8443, 8009]);
        assert_eq!(
            AndroidController::ports(&TvTarget::new("tv").with_port(8443)),
            vec![8443, 8008, 8009]
        );
        assert_eq!(
            AndroidController::ports(&TvTarget::new("tv").with_port(7000)),
            vec![7000, 8008, 8443, 8009]
        );
    }

    #[tokio::test]
    async fn test_set_volume_sends_fraction_and_clamps() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/volume")
            .match_body(mockito::Matcher::Json(json!({"level": 1.0})))
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let result = controller()
            .set_volume(&TvTarget::new(host).with_port(port), 150)
            .await;

        mock.assert_async().await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["volume"], 100);
    }

    #[tokio::test]
    async fn test_power_on_and_channel_unsupported() {
        let target = TvTarget::new("127.0.0.1").with_port(1);
        let power = controller().power(&target, Some(true)).await;
        assert_eq!(power.error_kind, Some(ErrorKind::Unsupported));
        let channel = controller().set_channel(&target, "5").await;
        assert_eq!(channel.error_kind, Some(ErrorKind::Unsupported));
    }

    #[tokio::test]
    async fn test_launch_falls_back_to_launch_endpoint() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/intent").with_status(404).create_async().await;
        let launch = server
            .mock("POST", "/launch")
            .match_body(mockito::Matcher::Json(json!({"appId": "com.netflix.ninja"})))
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let result = controller()
            .launch_app(&TvTarget::new(host).with_port(port), StreamingApp::Netflix)
            .await;

        launch.assert_async().await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_navigate_sends_key_code() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/input/keyevent")
            .match_body(mockito::Matcher::Json(json!({"keyCode": 4})))
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let result = controller()
            .navigate(&TvTarget::new(host).with_port(port), Direction::Back)
            .await;

        mock.assert_async().await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_status_online_when_any_port_answers() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/status").with_status(404).create_async().await;

        let (host, port) = host_port(&server);
        let status = controller()
            .get_status(&TvTarget::new(host).with_port(port))
            .await;
        assert!(status.online);
    }

    #[tokio::test]
    async fn test_play_and_pause_send_media_keys() {
        let mut server = mockito::Server::new_async().await;
        let play = server
            .mock("POST", "/input/keyevent")
            .match_body(mockito::Matcher::Json(json!({"keyCode": 126})))
            .with_status(200)
            .create_async()
            .await;
        let pause = server
            .mock("POST", "/input/keyevent")
            .match_body(mockito::Matcher::Json(json!({"keyCode": 127})))
            .with_status(200)
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let target = TvTarget::new(host).with_port(port);
        assert!(controller().play(&target).await.success);
        assert!(controller().pause(&target).await.success);

        play.assert_async().await;
        pause.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_apps_sorted_by_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apps")
            .with_status(200)
            .with_body(
                json!({"apps": [
                    {"packageName": "com.netflix.ninja", "name": "Netflix"},
                    {"packageName": "com.google.android.youtube.tv", "name": "YouTube"},
                    {"packageName": "com.android.tv.settings"},
                    {"name": "no package"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let apps = controller()
            .get_apps(&TvTarget::new(host).with_port(port))
            .await;

        let names: Vec<_> = apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["com.android.tv.settings", "Netflix", "YouTube"]);
        assert_eq!(apps[1].id, "com.netflix.ninja");
    }

    #[tokio::test]
    async fn test_status_volume_clamped_before_narrowing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body(r#"{"isOn": true, "volume": 4294967306}"#)
            .create_async()
            .await;

        let (host, port) = host_port(&server);
        let status = controller()
            .get_status(&TvTarget::new(host).with_port(port))
            .await;
        assert_eq!(status.volume, Some(100));
    }

    #[test]
    fn test_parse_eureka_info() {
        let info = AndroidController::parse_eureka_info(&json!({
            "name": "Living Room TV",
            "build_version": "1.56",
            "mac_address": "AA:BB:CC:00:11:22",
            "device_info": {"model_name": "Chromecast"}
        }));
        assert_eq!(info.name.as_deref(), Some("Living Room TV"));
        assert_eq!(info.model.as_deref(), Some("Chromecast"));
        assert_eq!(info.mac.as_deref(), Some("AA:BB:CC:00:11:22"));
    }
}
