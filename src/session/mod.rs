//! Per-device control session. Tracks link and device state for the selected
//! TV, applies commands optimistically with rollback on failure and polls
//! status in the background.
//!
//! Every mutable field carries a pending token while a command for it is in
//! flight. A completing command only rolls back its field if its token is
//! still the latest, and polls never overwrite a field that has one.

pub mod notify;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ControlConfig;
use crate::error::ErrorKind;
use crate::network::device_control::types::clamp_volume;
use crate::network::device_control::{
    CommandResult, Direction, InputSource, PowerState, StreamingApp, TvController, TvDevice,
    TvStatus,
};
pub use notify::{ChannelNotifier, Notification, NotificationLevel, Notifier, TracingNotifier};

const DEFAULT_VOLUME: u8 = 50;
const VOLUME_STEP: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected {
        paired: bool,
    },
}

/// Observable state of the selected TV
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub device_id: Option<String>,
    pub link: LinkState,
    /// Commands currently in flight
    pub pending_commands: usize,
    pub power: PowerState,
    pub volume: u8,
    pub muted: bool,
    pub channel: Option<String>,
    pub input: Option<InputSource>,
    pub app: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            device_id: None,
            link: LinkState::Disconnected,
            pending_commands: 0,
            power: PowerState::Unknown,
            volume: DEFAULT_VOLUME,
            muted: false,
            channel: None,
            input: None,
            app: None,
        }
    }
}

impl SessionState {
    pub fn command_pending(&self) -> bool {
        self.pending_commands > 0
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, LinkState::Connected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Power,
    Volume,
    Muted,
    Channel,
    Input,
    App,
}

/// A value for one optimistically updated field
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Power(PowerState),
    Volume(u8),
    Muted(bool),
    Channel(Option<String>),
    Input(Option<InputSource>),
    App(Option<String>),
}

impl FieldValue {
    fn field(&self) -> Field {
        match self {
            FieldValue::Power(_) => Field::Power,
            FieldValue::Volume(_) => Field::Volume,
            FieldValue::Muted(_) => Field::Muted,
            FieldValue::Channel(_) => Field::Channel,
            FieldValue::Input(_) => Field::Input,
            FieldValue::App(_) => Field::App,
        }
    }

    fn read(state: &SessionState, field: Field) -> Self {
        match field {
            Field::Power => FieldValue::Power(state.power),
            Field::Volume => FieldValue::Volume(state.volume),
            Field::Muted => FieldValue::Muted(state.muted),
            Field::Channel => FieldValue::Channel(state.channel.clone()),
            Field::Input => FieldValue::Input(state.input),
            Field::App => FieldValue::App(state.app.clone()),
        }
    }

    fn apply(self, state: &mut SessionState) {
        match self {
            FieldValue::Power(v) => state.power = v,
            FieldValue::Volume(v) => state.volume = v,
            FieldValue::Muted(v) => state.muted = v,
            FieldValue::Channel(v) => state.channel = v,
            FieldValue::Input(v) => state.input = v,
            FieldValue::App(v) => state.app = v,
        }
    }
}

/// Outcome of the last connect attempt for the selected device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Link {
    #[default]
    Pending,
    Established,
    /// Could not reach the TV; retried once a poll sees it online
    Failed,
    /// The TV refused pairing; only a new select retries
    Refused,
}

impl Link {
    fn after(result: &CommandResult) -> Self {
        match (result.success, result.error_kind) {
            (true, _) => Link::Established,
            (false, Some(ErrorKind::Rejected)) => Link::Refused,
            (false, _) => Link::Failed,
        }
    }
}

#[derive(Default)]
struct Inner {
    device: Option<TvDevice>,
    /// Bumped on every device switch; results from older generations are dropped
    generation: u64,
    link: Link,
    next_token: u64,
    pending: HashMap<Field, u64>,
    poller: Option<JoinHandle<()>>,
}

pub struct TvSession {
    controller: Arc<TvController>,
    notifier: Arc<dyn Notifier>,
    config: Arc<ControlConfig>,
    state: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
}

impl TvSession {
    pub fn new(controller: Arc<TvController>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        let config = controller.config().clone();
        let (state, _) = watch::channel(SessionState::default());
        Arc::new(Self {
            controller,
            notifier,
            config,
            state,
            inner: Mutex::new(Inner::default()),
        })
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn device(&self) -> Option<TvDevice> {
        self.inner().device.clone()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner().generation == generation
    }

    fn current(&self) -> Option<(TvDevice, u64)> {
        let inner = self.inner();
        inner.device.clone().map(|d| (d, inner.generation))
    }

    /// Make `device` the session's TV: connect, seed status once, then poll
    pub async fn select(self: &Arc<Self>, device: TvDevice) -> CommandResult {
        let generation = {
            let mut inner = self.inner();
            if let Some(poller) = inner.poller.take() {
                poller.abort();
            }
            inner.generation += 1;
            inner.pending.clear();
            inner.link = Link::Pending;
            inner.device = Some(device.clone());
            inner.generation
        };
        self.state.send_replace(SessionState {
            device_id: Some(device.id.clone()),
            link: LinkState::Connecting,
            ..SessionState::default()
        });
        info!(ip = %device.ip, brand = %device.brand, "session selecting device");

        let result = self.controller.connect(&device).await;
        if !self.record_connect(generation, &result).await {
            return result;
        }

        if result.success {
            self.refresh().await;
        } else {
            self.notifier.notify(Notification::failure(&result));
        }

        self.start_polling(generation);
        result
    }

    /// Store a connect outcome and move the link state to match. False when
    /// the session has moved on to another device.
    async fn record_connect(&self, generation: u64, result: &CommandResult) -> bool {
        let paired = match self.current() {
            Some((device, current)) if current == generation && result.success => {
                self.controller.is_paired(&device).await
            }
            _ => false,
        };

        let mut inner = self.inner();
        if inner.generation != generation {
            return false;
        }
        inner.link = Link::after(result);
        let link = if result.success {
            LinkState::Connected { paired }
        } else {
            LinkState::Disconnected
        };
        self.state.send_modify(|s| s.link = link);
        true
    }

    /// Drop the selected device and stop polling
    pub async fn close(&self) {
        let device = {
            let mut inner = self.inner();
            if let Some(poller) = inner.poller.take() {
                poller.abort();
            }
            inner.generation += 1;
            inner.pending.clear();
            inner.link = Link::Pending;
            inner.device.take()
        };
        if let Some(device) = device {
            self.controller.disconnect(&device).await;
        }
        self.state.send_replace(SessionState::default());
    }

    fn start_polling(self: &Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.poll_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if !session.is_current(generation) {
                    break;
                }
                session.refresh().await;
            }
        });

        let mut inner = self.inner();
        if inner.generation == generation {
            inner.poller = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Fetch status and merge it into fields with no command in flight. The
    /// link only follows the TV's reachability once a connect succeeded; a
    /// TV that was unreachable at select is connected when it comes online.
    pub async fn refresh(&self) -> Option<TvStatus> {
        let (device, generation) = self.current()?;
        let status = self.controller.get_status(&device).await;

        let link = self.inner().link;
        if status.online && link == Link::Failed {
            debug!(ip = %device.ip, "tv is back, reconnecting");
            let result = self.controller.connect(&device).await;
            if !self.record_connect(generation, &result).await {
                return None;
            }
            if Link::after(&result) == Link::Refused {
                self.notifier.notify(Notification::failure(&result));
            }
        }
        let paired = self.controller.is_paired(&device).await;

        let inner = self.inner();
        if inner.generation != generation {
            debug!(ip = %device.ip, "dropping status for previous device");
            return None;
        }
        let established = inner.link == Link::Established;
        self.state.send_modify(|s| {
            s.link = match (established, status.online) {
                (true, true) => LinkState::Connected { paired },
                _ => LinkState::Disconnected,
            };
            if !inner.pending.contains_key(&Field::Power) {
                s.power = if status.online { status.power } else { PowerState::Unknown };
            }
            if let Some(volume) = status.volume
                && !inner.pending.contains_key(&Field::Volume)
            {
                s.volume = volume;
            }
            if let Some(app) = &status.current_app
                && !inner.pending.contains_key(&Field::App)
            {
                s.app = Some(app.clone());
            }
        });
        Some(status)
    }

    fn begin_command(&self) {
        self.state.send_modify(|s| s.pending_commands += 1);
    }

    fn end_command(&self) {
        self.state
            .send_modify(|s| s.pending_commands = s.pending_commands.saturating_sub(1));
    }

    fn report(&self, result: &CommandResult, success: Option<String>) {
        if !result.success {
            self.notifier.notify(Notification::failure(result));
        } else if let Some(message) = success {
            self.notifier.notify(Notification::success(message));
        }
    }

    fn no_device() -> CommandResult {
        CommandResult::failure(ErrorKind::Rejected, "No TV selected")
    }

    /// Apply `value` now, run the command, and restore the prior value if the
    /// command fails while this is still the latest write to the field
    async fn optimistic<C, Fut>(
        &self,
        value: FieldValue,
        success: Option<String>,
        command: C,
    ) -> CommandResult
    where
        C: FnOnce(Arc<TvController>, TvDevice) -> Fut,
        Fut: Future<Output = CommandResult>,
    {
        let field = value.field();
        let (device, generation, token, prior) = {
            let mut inner = self.inner();
            let Some(device) = inner.device.clone() else {
                return Self::no_device();
            };
            inner.next_token += 1;
            let token = inner.next_token;
            inner.pending.insert(field, token);

            let prior = FieldValue::read(&self.state.borrow(), field);
            self.state.send_modify(|s| {
                value.apply(s);
                s.pending_commands += 1;
            });
            (device, inner.generation, token, prior)
        };

        let result = command(self.controller.clone(), device).await;

        {
            let mut inner = self.inner();
            if inner.generation != generation {
                return result;
            }
            let latest = inner.pending.get(&field) == Some(&token);
            if latest {
                inner.pending.remove(&field);
            }
            self.state.send_modify(|s| {
                s.pending_commands = s.pending_commands.saturating_sub(1);
                if latest && !result.success {
                    debug!(?field, "rolling back optimistic update");
                    prior.apply(s);
                }
            });
        }

        self.report(&result, success);
        result
    }

    /// Run a command with no optimistic state
    async fn execute<C, Fut>(&self, success: Option<String>, command: C) -> CommandResult
    where
        C: FnOnce(Arc<TvController>, TvDevice) -> Fut,
        Fut: Future<Output = CommandResult>,
    {
        let Some((device, generation)) = self.current() else {
            return Self::no_device();
        };
        self.begin_command();
        let result = command(self.controller.clone(), device).await;
        if !self.is_current(generation) {
            return result;
        }
        self.end_command();
        self.report(&result, success);
        result
    }

    /// `None` toggles based on the last known power state
    pub async fn power(&self, on: Option<bool>) -> CommandResult {
        let turn_on = on.unwrap_or(!self.snapshot().power.is_on());
        let (value, message) = if turn_on {
            (PowerState::On, "TV turned on")
        } else {
            (PowerState::Off, "TV turned off")
        };
        self.optimistic(
            FieldValue::Power(value),
            Some(message.to_string()),
            move |c, d| async move { c.power(&d, on).await },
        )
        .await
    }

    pub async fn set_volume(&self, level: i32) -> CommandResult {
        let volume = clamp_volume(level);
        self.optimistic(FieldValue::Volume(volume), None, move |c, d| async move {
            c.set_volume(&d, i32::from(volume)).await
        })
        .await
    }

    /// One volume step on the TV, shown as +5 until the next poll
    pub async fn volume_up(&self) -> CommandResult {
        let estimate = clamp_volume(self.snapshot().volume as i32 + VOLUME_STEP);
        self.optimistic(FieldValue::Volume(estimate), None, |c, d| async move {
            c.volume_up(&d).await
        })
        .await
    }

    pub async fn volume_down(&self) -> CommandResult {
        let estimate = clamp_volume(self.snapshot().volume as i32 - VOLUME_STEP);
        self.optimistic(FieldValue::Volume(estimate), None, |c, d| async move {
            c.volume_down(&d).await
        })
        .await
    }

    /// `None` toggles based on the last known mute state
    pub async fn mute(&self, muted: Option<bool>) -> CommandResult {
        let muted = muted.unwrap_or(!self.snapshot().muted);
        let message = if muted { "Muted" } else { "Unmuted" };
        self.optimistic(
            FieldValue::Muted(muted),
            Some(message.to_string()),
            move |c, d| async move { c.mute(&d, Some(muted)).await },
        )
        .await
    }

    pub async fn set_channel(&self, channel: &str) -> CommandResult {
        let channel = channel.trim().to_string();
        self.optimistic(
            FieldValue::Channel(Some(channel.clone())),
            Some(format!("Channel {}", channel)),
            move |c, d| async move { c.set_channel(&d, &channel).await },
        )
        .await
    }

    pub async fn set_input(&self, input: InputSource) -> CommandResult {
        self.optimistic(
            FieldValue::Input(Some(input)),
            Some(format!("Input {}", input)),
            move |c, d| async move { c.set_input(&d, input).await },
        )
        .await
    }

    pub async fn launch_app(&self, app: StreamingApp) -> CommandResult {
        self.optimistic(
            FieldValue::App(Some(app.id().to_string())),
            Some(format!("{} launched", app.display_name())),
            move |c, d| async move { c.launch_app(&d, app).await },
        )
        .await
    }

    pub async fn navigate(&self, direction: Direction) -> CommandResult {
        self.execute(None, move |c, d| async move {
            c.navigate(&d, direction).await
        })
        .await
    }

    pub async fn channel_up(&self) -> CommandResult {
        self.execute(None, |c, d| async move { c.channel_up(&d).await })
            .await
    }

    pub async fn channel_down(&self) -> CommandResult {
        self.execute(None, |c, d| async move { c.channel_down(&d).await })
            .await
    }

    /// Wake the TV, then refresh status once it has had time to boot
    pub async fn wake(self: &Arc<Self>) -> CommandResult {
        let Some((device, generation)) = self.current() else {
            return Self::no_device();
        };
        self.notifier.notify(Notification::info(
            "Waking TV",
            Some(format!("Sending wake signal to {}", device.name)),
        ));

        let result = self.controller.wake(&device).await;
        if result.success {
            self.notifier.notify(Notification::success("Wake signal sent"));
            let weak = Arc::downgrade(self);
            let settle = self.config.wake_settle();
            tokio::spawn(async move {
                tokio::time::sleep(settle).await;
                if let Some(session) = weak.upgrade()
                    && session.is_current(generation)
                {
                    session.refresh().await;
                }
            });
        } else {
            self.notifier.notify(Notification::failure(&result));
        }
        result
    }
}

impl Drop for TvSession {
    fn drop(&mut self) {
        if let Some(poller) = self.inner().poller.take() {
            poller.abort();
        }
    }
}
