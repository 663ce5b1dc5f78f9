use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::adapter::{AdapterContext, TvAdapter, TvBackend, TvProbe};
use super::android::AndroidController;
use super::lg::LgController;
use super::roku::RokuController;
use super::samsung::SamsungController;
use super::types::{
    CommandResult, Direction, InputSource, StreamingApp, TvBrand, TvDevice, TvStatus, TvTarget,
};
use crate::config::ControlConfig;
use crate::db::CredentialStore;
use crate::error::{ControlError, ErrorKind};
use crate::network::wake::{WakeReport, WakeService};

/// Main device controller that routes commands to the adapter for a
/// device's brand
pub struct TvController {
    config: Arc<ControlConfig>,
    adapters: HashMap<TvBrand, Arc<dyn TvAdapter>>,
    probes: Vec<Arc<dyn TvProbe>>,
    wake: WakeService,
}

impl TvController {
    /// Controller with every built-in brand registered
    pub fn new(config: Arc<ControlConfig>, credentials: Arc<dyn CredentialStore>) -> Self {
        let ctx = AdapterContext::new(config.clone(), credentials);
        let mut controller = Self::empty(config);
        // Probe order matters for discovery: first positive answer wins
        controller.register(SamsungController::new(ctx.clone()));
        controller.register(RokuController::new(ctx.clone()));
        controller.register(LgController::new(ctx.clone()));
        controller.register(AndroidController::new(ctx));
        controller
    }

    /// Controller with no brands registered
    pub fn empty(config: Arc<ControlConfig>) -> Self {
        Self {
            wake: WakeService::new(config.clone()),
            config,
            adapters: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// Register a brand as both command adapter and discovery probe
    pub fn register<B: TvBackend + 'static>(&mut self, backend: B) {
        let backend = Arc::new(backend);
        self.adapters.insert(TvAdapter::brand(&*backend), backend.clone());
        self.probes.push(backend);
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn TvAdapter>) {
        self.adapters.insert(adapter.brand(), adapter);
    }

    pub fn with_wake_service(mut self, wake: WakeService) -> Self {
        self.wake = wake;
        self
    }

    pub fn config(&self) -> &Arc<ControlConfig> {
        &self.config
    }

    pub fn adapter(&self, brand: TvBrand) -> Option<Arc<dyn TvAdapter>> {
        self.adapters.get(&brand).cloned()
    }

    pub fn probes(&self) -> Vec<Arc<dyn TvProbe>> {
        self.probes.clone()
    }

    pub fn supported_brands(&self) -> Vec<TvBrand> {
        TvBrand::ALL
            .into_iter()
            .filter(|b| self.adapters.contains_key(b))
            .collect()
    }

    fn resolve(&self, device: &TvDevice) -> Result<(Arc<dyn TvAdapter>, TvTarget), CommandResult> {
        match self.adapters.get(&device.brand) {
            Some(adapter) => Ok((adapter.clone(), device.target())),
            None => {
                debug!(ip = %device.ip, brand = %device.brand, "no adapter for brand");
                Err(ControlError::UnknownBrand(device.brand.to_string()).into())
            }
        }
    }

    pub async fn connect(&self, device: &TvDevice) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.connect(&target).await,
            Err(failure) => failure,
        }
    }

    pub async fn disconnect(&self, device: &TvDevice) {
        if let Ok((adapter, target)) = self.resolve(device) {
            adapter.disconnect(&target).await;
        }
    }

    pub fn requires_pairing(&self, device: &TvDevice) -> bool {
        self.adapters
            .get(&device.brand)
            .is_some_and(|a| a.requires_pairing())
    }

    pub async fn is_paired(&self, device: &TvDevice) -> bool {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.is_paired(&target).await,
            Err(_) => false,
        }
    }

    /// Turning on sends a wake packet first when the MAC is known
    pub async fn power(&self, device: &TvDevice, on: Option<bool>) -> CommandResult {
        let (adapter, target) = match self.resolve(device) {
            Ok(resolved) => resolved,
            Err(failure) => return failure,
        };

        let woke = if on == Some(true) && device.wake_mac().is_some() {
            self.wake_report(device).await.succeeded()
        } else {
            false
        };

        let result = adapter.power(&target, on).await;
        if !result.success && woke {
            info!(ip = %device.ip, "power on via wake-on-lan");
            return CommandResult::ok("Wake signal sent");
        }
        result
    }

    pub async fn set_volume(&self, device: &TvDevice, level: i32) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.set_volume(&target, level).await,
            Err(failure) => failure,
        }
    }

    pub async fn volume_up(&self, device: &TvDevice) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.volume_up(&target).await,
            Err(failure) => failure,
        }
    }

    pub async fn volume_down(&self, device: &TvDevice) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.volume_down(&target).await,
            Err(failure) => failure,
        }
    }

    pub async fn mute(&self, device: &TvDevice, muted: Option<bool>) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.mute(&target, muted).await,
            Err(failure) => failure,
        }
    }

    pub async fn set_channel(&self, device: &TvDevice, channel: &str) -> CommandResult {
        if channel.trim().is_empty() {
            return ControlError::InvalidInput("channel is empty".to_string()).into();
        }
        if !device.capabilities.can_channel {
            return CommandResult::unsupported(format!("{} cannot change channels", device.name));
        }
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.set_channel(&target, channel).await,
            Err(failure) => failure,
        }
    }

    pub async fn channel_up(&self, device: &TvDevice) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.channel_up(&target).await,
            Err(failure) => failure,
        }
    }

    pub async fn channel_down(&self, device: &TvDevice) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.channel_down(&target).await,
            Err(failure) => failure,
        }
    }

    pub async fn set_input(&self, device: &TvDevice, input: InputSource) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.set_input(&target, input).await,
            Err(failure) => failure,
        }
    }

    pub async fn launch_app(&self, device: &TvDevice, app: StreamingApp) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.launch_app(&target, app).await,
            Err(failure) => failure,
        }
    }

    pub async fn navigate(&self, device: &TvDevice, direction: Direction) -> CommandResult {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.navigate(&target, direction).await,
            Err(failure) => failure,
        }
    }

    pub async fn get_status(&self, device: &TvDevice) -> TvStatus {
        match self.resolve(device) {
            Ok((adapter, target)) => adapter.get_status(&target).await,
            Err(_) => TvStatus::offline(),
        }
    }

    async fn wake_report(&self, device: &TvDevice) -> WakeReport {
        // Touches go to the brand's default ports, not the control port
        let target = TvTarget::new(device.ip.clone());
        self.wake
            .wake(&target, device.wake_mac(), Some(device.brand))
            .await
    }

    pub async fn wake(&self, device: &TvDevice) -> CommandResult {
        let report = self.wake_report(device).await;
        let data = serde_json::to_value(&report).unwrap_or_default();
        if report.succeeded() {
            CommandResult::ok_with("Wake signal sent", data)
        } else {
            let mut failure =
                CommandResult::failure(ErrorKind::Unreachable, format!("Could not wake {}", device.name));
            failure.data = Some(data);
            failure
        }
    }
}
