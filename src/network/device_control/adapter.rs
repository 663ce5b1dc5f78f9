//! The uniform contract every brand speaks. Operations never return errors:
//! failures are folded into a `CommandResult` with an `ErrorKind`.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{
    CommandResult, DiscoveredTv, Direction, InputSource, StreamingApp, TvBrand, TvStatus, TvTarget,
};
use crate::config::ControlConfig;
use crate::db::{CredentialStore, MemoryStore};
use crate::network::transport::HttpTransport;

/// Everything an adapter needs from its surroundings
#[derive(Clone)]
pub struct AdapterContext {
    pub config: Arc<ControlConfig>,
    pub http: HttpTransport,
    pub credentials: Arc<dyn CredentialStore>,
}

impl AdapterContext {
    pub fn new(config: Arc<ControlConfig>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            config,
            http: HttpTransport::new(),
            credentials,
        }
    }

    /// Default config with a throwaway credential store
    pub fn ephemeral(config: ControlConfig) -> Self {
        Self::new(Arc::new(config), Arc::new(MemoryStore::new()))
    }
}

#[async_trait]
pub trait TvAdapter: Send + Sync {
    fn brand(&self) -> TvBrand;

    /// Whether first contact shows a pairing prompt on the TV
    fn requires_pairing(&self) -> bool {
        false
    }

    /// Establish whatever session the protocol needs. For HTTP-only brands
    /// this is a reachability check.
    async fn connect(&self, target: &TvTarget) -> CommandResult {
        let status = self.get_status(target).await;
        if status.online {
            CommandResult::ok("Connected")
        } else {
            CommandResult::failure(
                crate::error::ErrorKind::Unreachable,
                format!("{} is not responding", target),
            )
        }
    }

    async fn disconnect(&self, _target: &TvTarget) {}

    /// Whether a paired session with this TV is open right now
    async fn is_paired(&self, _target: &TvTarget) -> bool {
        false
    }

    /// `None` toggles, `Some(true)` turns on, `Some(false)` turns off
    async fn power(&self, target: &TvTarget, on: Option<bool>) -> CommandResult;

    /// Out-of-range levels are clamped to 0..=100
    async fn set_volume(&self, target: &TvTarget, level: i32) -> CommandResult;

    async fn volume_up(&self, _target: &TvTarget) -> CommandResult {
        CommandResult::unsupported(format!("{} TVs do not support volume up", self.brand()))
    }

    async fn volume_down(&self, _target: &TvTarget) -> CommandResult {
        CommandResult::unsupported(format!("{} TVs do not support volume down", self.brand()))
    }

    /// `None` toggles
    async fn mute(&self, target: &TvTarget, muted: Option<bool>) -> CommandResult;

    async fn set_channel(&self, target: &TvTarget, channel: &str) -> CommandResult;

    async fn channel_up(&self, _target: &TvTarget) -> CommandResult {
        CommandResult::unsupported(format!("{} TVs do not support channel up", self.brand()))
    }

    async fn channel_down(&self, _target: &TvTarget) -> CommandResult {
        CommandResult::unsupported(format!("{} TVs do not support channel down", self.brand()))
    }

    async fn set_input(&self, target: &TvTarget, input: InputSource) -> CommandResult;

    async fn launch_app(&self, target: &TvTarget, app: StreamingApp) -> CommandResult;

    async fn navigate(&self, target: &TvTarget, direction: Direction) -> CommandResult;

    /// Never fails; an unreachable TV reports `online: false`
    async fn get_status(&self, target: &TvTarget) -> TvStatus;
}

/// Brand detection used by discovery
#[async_trait]
pub trait TvProbe: Send + Sync {
    fn probe_brand(&self) -> TvBrand;

    /// `Some` only when the host positively answers as this brand
    async fn probe(&self, host: &str) -> Option<DiscoveredTv>;
}

/// Adapters that are also probes, so the controller can register both at once
pub trait TvBackend: TvAdapter + TvProbe {}

impl<T: TvAdapter + TvProbe> TvBackend for T {}
