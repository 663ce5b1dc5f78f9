use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use lan_tv_control::config::ControlConfig;
use lan_tv_control::db::{DeviceStore, SqliteStore};
use lan_tv_control::devices::refresh_statuses;
use lan_tv_control::error::{ControlError, ErrorKind, Result};
use lan_tv_control::logging::{LogFormat, init_logging};
use lan_tv_control::network::device_control::{
    AdapterContext, AndroidController, CommandResult, Direction, DiscoveredTv, InputSource,
    LgController, RokuController, SamsungController, StreamingApp, TvBrand, TvController,
    TvDevice,
};
use lan_tv_control::scanner::{DiscoveryProgress, TvDiscovery};

#[derive(Parser)]
#[command(name = "tvctl")]
#[command(about = "Discover and control smart TVs on the local network")]
struct Cli {
    /// TOML file overriding the default timeouts and discovery settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database with saved devices and pairing keys
    #[arg(long, default_value = "tv_control.db")]
    db: PathBuf,

    /// Log as JSON lines instead of compact text
    #[arg(long)]
    json_logs: bool,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// A saved device id, or an address plus optional details for ad-hoc use
#[derive(Args)]
struct TargetArgs {
    /// Saved device id or IP address
    device: String,

    /// Brand for an unsaved address; detected when omitted
    #[arg(long)]
    brand: Option<TvBrand>,

    #[arg(long)]
    mac: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the network for TVs
    Discover {
        /// Probe only these addresses instead of the configured subnets
        #[arg(long = "host")]
        hosts: Vec<String>,

        /// Save every TV found
        #[arg(long)]
        save: bool,
    },
    Status(TargetArgs),
    Power {
        #[command(flatten)]
        target: TargetArgs,
        /// on, off or toggle
        #[arg(default_value = "toggle")]
        state: String,
    },
    Volume {
        #[command(flatten)]
        target: TargetArgs,
        /// 0-100, up or down
        level: String,
    },
    Mute {
        #[command(flatten)]
        target: TargetArgs,
        /// on, off or toggle
        #[arg(default_value = "toggle")]
        state: String,
    },
    Channel {
        #[command(flatten)]
        target: TargetArgs,
        /// Channel number, up or down
        channel: String,
    },
    Input {
        #[command(flatten)]
        target: TargetArgs,
        input: InputSource,
    },
    App {
        #[command(flatten)]
        target: TargetArgs,
        app: StreamingApp,
    },
    Nav {
        #[command(flatten)]
        target: TargetArgs,
        direction: Direction,
    },
    /// Type text into the focused field (Roku, Android)
    Text {
        #[command(flatten)]
        target: TargetArgs,
        text: String,
    },
    /// Show a toast on the screen (LG)
    Toast {
        #[command(flatten)]
        target: TargetArgs,
        message: String,
    },
    /// Model, name and firmware details
    Info(TargetArgs),
    /// Playback keys (Roku, Android)
    Media {
        #[command(flatten)]
        target: TargetArgs,
        action: MediaAction,
    },
    /// Installed apps (Roku, LG, Android)
    Apps(TargetArgs),
    /// Tuner channel lineup (LG)
    Channels(TargetArgs),
    Wake(TargetArgs),
    /// Connect and accept the pairing prompt on the TV
    Pair(TargetArgs),
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MediaAction {
    Play,
    Pause,
    Rewind,
    Forward,
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List saved devices with their current status
    List,
    Save {
        #[arg(long)]
        name: String,
        #[arg(long)]
        brand: TvBrand,
        #[arg(long)]
        ip: String,
        #[arg(long)]
        mac: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        room: Option<i64>,
    },
    Delete {
        id: String,
    },
}

fn toggle(state: &str) -> Result<Option<bool>> {
    match state.to_lowercase().as_str() {
        "on" | "true" => Ok(Some(true)),
        "off" | "false" => Ok(Some(false)),
        "toggle" => Ok(None),
        other => Err(ControlError::InvalidInput(format!(
            "expected on, off or toggle, got '{}'",
            other
        ))),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(result: CommandResult) -> Result<ExitCode> {
    print_json(&result)?;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

struct App {
    config: Arc<ControlConfig>,
    store: Arc<SqliteStore>,
    controller: Arc<TvController>,
}

impl App {
    fn context(&self) -> AdapterContext {
        AdapterContext::new(self.config.clone(), self.store.clone())
    }

    fn discovery(&self) -> TvDiscovery {
        TvDiscovery::from_controller(&self.controller)
    }

    async fn resolve(&self, target: &TargetArgs) -> Result<TvDevice> {
        let saved = self.store.list_saved_devices()?;
        if let Some(device) = saved
            .into_iter()
            .find(|d| d.id == target.device || d.ip == target.device)
        {
            return Ok(device);
        }

        let brand = match target.brand {
            Some(brand) => brand,
            None => self.discovery().detect_brand(&target.device).await,
        };
        if brand == TvBrand::Unknown {
            return Err(ControlError::UnknownBrand(format!(
                "no TV answered at {}; pass --brand",
                target.device
            )));
        }

        let mut device = TvDevice::new(
            format!("adhoc_{}", target.device),
            format!("{} TV", brand),
            brand,
            target.device.clone(),
        );
        if let Some(mac) = &target.mac {
            device = device.with_mac(mac.clone());
        }
        if let Some(port) = target.port {
            device = device.with_port(port);
        }
        Ok(device)
    }

    async fn discover(&self, hosts: Vec<String>, save: bool) -> Result<ExitCode> {
        let discovery = self.discovery();
        let on_progress = |p: DiscoveryProgress| info!("{}", p);
        let on_found = |tv: &DiscoveredTv| info!(ip = %tv.ip, brand = %tv.brand, "{}", tv.name);

        let found = if hosts.is_empty() {
            discovery.discover(on_progress, on_found).await
        } else {
            discovery.discover_hosts(hosts, on_progress, on_found).await
        };

        if save {
            let known = self.store.list_saved_devices()?;
            for tv in &found {
                if known.iter().any(|d| d.ip == tv.ip) {
                    continue;
                }
                self.store.save_device(&TvDevice::from_discovered(tv, None))?;
            }
        }
        print_json(&found)?;
        Ok(ExitCode::SUCCESS)
    }

    async fn devices(&self, action: DevicesAction) -> Result<ExitCode> {
        match action {
            DevicesAction::List => {
                let mut devices = self.store.list_saved_devices()?;
                refresh_statuses(&self.controller, &mut devices).await;
                let listed: Vec<_> = devices
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "device": d,
                            "online": d.connection_status,
                            "power": d.power_state,
                            "volume": d.volume,
                        })
                    })
                    .collect();
                print_json(&listed)?;
                Ok(ExitCode::SUCCESS)
            }
            DevicesAction::Save {
                name,
                brand,
                ip,
                mac,
                port,
                room,
            } => {
                let id = format!(
                    "tv_{}_{}",
                    ip.replace(['.', ':'], "_"),
                    uuid::Uuid::new_v4().simple()
                );
                let mut device = TvDevice::new(id, name, brand, ip);
                if let Some(mac) = mac {
                    device = device.with_mac(mac);
                }
                if let Some(port) = port {
                    device = device.with_port(port);
                }
                device.room_id = room;
                self.store.save_device(&device)?;
                print_json(&device)?;
                Ok(ExitCode::SUCCESS)
            }
            DevicesAction::Delete { id } => {
                if self.store.delete_device(&id)? {
                    finish(CommandResult::ok(format!("Deleted {}", id)))
                } else {
                    finish(CommandResult::failure(
                        ErrorKind::Rejected,
                        format!("No saved device {}", id),
                    ))
                }
            }
        }
    }

    async fn run(&self, command: Command) -> Result<ExitCode> {
        let c = &self.controller;
        match command {
            Command::Discover { hosts, save } => self.discover(hosts, save).await,
            Command::Devices { action } => self.devices(action).await,
            Command::Status(target) => {
                let device = self.resolve(&target).await?;
                print_json(&c.get_status(&device).await)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Power { target, state } => {
                let device = self.resolve(&target).await?;
                finish(c.power(&device, toggle(&state)?).await)
            }
            Command::Volume { target, level } => {
                let device = self.resolve(&target).await?;
                let result = match level.as_str() {
                    "up" => c.volume_up(&device).await,
                    "down" => c.volume_down(&device).await,
                    n => {
                        let level = n.parse::<i32>().map_err(|_| {
                            ControlError::InvalidInput(format!("volume '{}' is not a number", n))
                        })?;
                        c.set_volume(&device, level).await
                    }
                };
                finish(result)
            }
            Command::Mute { target, state } => {
                let device = self.resolve(&target).await?;
                finish(c.mute(&device, toggle(&state)?).await)
            }
            Command::Channel { target, channel } => {
                let device = self.resolve(&target).await?;
                let result = match channel.as_str() {
                    "up" => c.channel_up(&device).await,
                    "down" => c.channel_down(&device).await,
                    ch => c.set_channel(&device, ch).await,
                };
                finish(result)
            }
            Command::Input { target, input } => {
                let device = self.resolve(&target).await?;
                finish(c.set_input(&device, input).await)
            }
            Command::App { target, app } => {
                let device = self.resolve(&target).await?;
                finish(c.launch_app(&device, app).await)
            }
            Command::Nav { target, direction } => {
                let device = self.resolve(&target).await?;
                finish(c.navigate(&device, direction).await)
            }
            Command::Text { target, text } => {
                let device = self.resolve(&target).await?;
                let result = match device.brand {
                    TvBrand::Roku => {
                        RokuController::new(self.context())
                            .send_text(&device.target(), &text)
                            .await
                    }
                    TvBrand::Android => {
                        AndroidController::new(self.context())
                            .send_text(&device.target(), &text)
                            .await
                    }
                    other => CommandResult::unsupported(format!("Text entry is not available on {} TVs", other)),
                };
                finish(result)
            }
            Command::Toast { target, message } => {
                let device = self.resolve(&target).await?;
                let result = match device.brand {
                    TvBrand::Lg => {
                        LgController::new(self.context())
                            .show_toast(&device.target(), &message)
                            .await
                    }
                    other => CommandResult::unsupported(format!("Toasts are not available on {} TVs", other)),
                };
                finish(result)
            }
            Command::Info(target) => {
                let device = self.resolve(&target).await?;
                let info = match device.brand {
                    TvBrand::Samsung => {
                        SamsungController::new(self.context())
                            .get_device_info(&device.target())
                            .await
                    }
                    TvBrand::Roku => {
                        RokuController::new(self.context())
                            .get_device_info(&device.target())
                            .await
                    }
                    TvBrand::Android => {
                        AndroidController::new(self.context())
                            .get_device_info(&device.target())
                            .await
                    }
                    _ => None,
                };
                match info {
                    Some(info) => finish(CommandResult::ok_with(
                        "Device info",
                        serde_json::to_value(info)?,
                    )),
                    None => finish(CommandResult::failure(
                        ErrorKind::Unreachable,
                        format!("No device info from {}", device.ip),
                    )),
                }
            }
            Command::Apps(target) => {
                let device = self.resolve(&target).await?;
                let apps = match device.brand {
                    TvBrand::Roku => RokuController::new(self.context()).get_apps(&device.target()).await,
                    TvBrand::Lg => LgController::new(self.context()).get_apps(&device.target()).await,
                    TvBrand::Android => {
                        AndroidController::new(self.context())
                            .get_apps(&device.target())
                            .await
                    }
                    other => {
                        return finish(CommandResult::unsupported(format!(
                            "App listing is not available on {} TVs",
                            other
                        )));
                    }
                };
                print_json(&apps)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Media { target, action } => {
                let device = self.resolve(&target).await?;
                let t = device.target();
                let result = match device.brand {
                    TvBrand::Roku => {
                        let roku = RokuController::new(self.context());
                        match action {
                            MediaAction::Play => roku.play(&t).await,
                            MediaAction::Pause => roku.pause(&t).await,
                            MediaAction::Rewind => roku.rewind(&t).await,
                            MediaAction::Forward => roku.fast_forward(&t).await,
                        }
                    }
                    TvBrand::Android => {
                        let android = AndroidController::new(self.context());
                        match action {
                            MediaAction::Play => android.play(&t).await,
                            MediaAction::Pause => android.pause(&t).await,
                            MediaAction::Rewind | MediaAction::Forward => CommandResult::unsupported(
                                "Android TV only supports play and pause",
                            ),
                        }
                    }
                    other => CommandResult::unsupported(format!("Playback keys are not available on {} TVs", other)),
                };
                finish(result)
            }
            Command::Channels(target) => {
                let device = self.resolve(&target).await?;
                if device.brand != TvBrand::Lg {
                    return finish(CommandResult::unsupported(format!(
                        "Channel listing is not available on {} TVs",
                        device.brand
                    )));
                }
                let channels = LgController::new(self.context())
                    .get_channels(&device.target())
                    .await;
                print_json(&channels)?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Wake(target) => {
                let device = self.resolve(&target).await?;
                finish(c.wake(&device).await)
            }
            Command::Pair(target) => {
                let device = self.resolve(&target).await?;
                if c.requires_pairing(&device) {
                    info!(ip = %device.ip, "accept the prompt on the TV");
                }
                let result = c.connect(&device).await;
                c.disconnect(&device).await;
                finish(result)
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    if let Err(e) = init_logging(format, cli.verbose) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let setup = || -> Result<App> {
        let config = match &cli.config {
            Some(path) => ControlConfig::load(path)?,
            None => ControlConfig::default(),
        };
        let config = Arc::new(config);
        let store = Arc::new(SqliteStore::open(&cli.db)?);
        let controller = Arc::new(TvController::new(config.clone(), store.clone()));
        Ok(App {
            config,
            store,
            controller,
        })
    };

    let app = match setup() {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match app.run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
