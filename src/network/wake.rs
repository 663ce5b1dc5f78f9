//! Waking TVs: a Wake-on-LAN magic packet when the MAC is known, followed by
//! brand-specific HTTP "touches" that nudge sets sitting in network standby.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use pnet::util::MacAddr;
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::network::device_control::types::{TvBrand, TvTarget};
use crate::network::transport::{HttpTransport, Method};

pub const MAGIC_PACKET_LEN: usize = 102;

/// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`
pub fn parse_mac(mac: &str) -> Result<MacAddr> {
    let hex: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.') && !c.is_whitespace())
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ControlError::InvalidInput(format!("invalid MAC address '{}'", mac)));
    }

    let mut octets = [0u8; 6];
    for (i, octet) in octets.iter_mut().enumerate() {
        *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| ControlError::InvalidInput(format!("invalid MAC address '{}'", mac)))?;
    }
    Ok(MacAddr::new(
        octets[0], octets[1], octets[2], octets[3], octets[4], octets[5],
    ))
}

/// Six 0xFF bytes followed by the MAC repeated sixteen times
pub fn magic_packet(mac: MacAddr) -> [u8; MAGIC_PACKET_LEN] {
    let octets = mac.octets();
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&octets);
    }
    packet
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum PacketOutcome {
    /// No MAC known, nothing built
    Skipped,
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct WakeReport {
    pub packet: PacketOutcome,
    /// Brand touched and whether it answered
    pub touches: Vec<(TvBrand, bool)>,
}

impl WakeReport {
    /// True if any mechanism plausibly reached the TV
    pub fn succeeded(&self) -> bool {
        self.packet == PacketOutcome::Sent || self.touches.iter().any(|(_, ok)| *ok)
    }
}

pub struct WakeService {
    config: Arc<ControlConfig>,
    http: HttpTransport,
    broadcast: SocketAddr,
}

impl WakeService {
    pub fn new(config: Arc<ControlConfig>) -> Self {
        Self {
            config,
            http: HttpTransport::new(),
            broadcast: SocketAddr::from(([255, 255, 255, 255], 9)),
        }
    }

    /// Send magic packets somewhere other than the limited broadcast address
    pub fn with_broadcast(mut self, addr: SocketAddr) -> Self {
        self.broadcast = addr;
        self
    }

    async fn send_magic_packet(&self, mac: MacAddr) -> std::io::Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let packet = magic_packet(mac);
        let sent = socket.send_to(&packet, self.broadcast).await?;
        if sent != packet.len() {
            return Err(std::io::Error::other("short magic packet write"));
        }
        Ok(())
    }

    /// Brand-specific request that wakes a set in network standby. Any HTTP
    /// answer counts.
    async fn touch(&self, target: &TvTarget, brand: TvBrand) -> bool {
        let (method, port, path) = match brand {
            TvBrand::Samsung => (Method::Get, 8001, "/api/v2/"),
            TvBrand::Lg => (Method::Get, 3000, "/"),
            TvBrand::Roku => (Method::Post, 8060, "/keypress/PowerOn"),
            TvBrand::Android => (Method::Get, 8008, "/"),
            TvBrand::Vestel | TvBrand::Unknown => return false,
        };
        let response = self
            .http
            .request_text(
                &target.host,
                target.port_or(port),
                method,
                path,
                None,
                self.config.probe_timeout(),
            )
            .await;
        debug!(host = %target.host, %brand, answered = response.responded(), "wake touch");
        response.responded()
    }

    pub async fn wake(&self, target: &TvTarget, mac: Option<&str>, brand: Option<TvBrand>) -> WakeReport {
        let packet = match mac.filter(|m| !m.trim().is_empty()) {
            None => PacketOutcome::Skipped,
            Some(mac) => match parse_mac(mac) {
                Err(e) => PacketOutcome::Failed(e.to_string()),
                Ok(mac) => match self.send_magic_packet(mac).await {
                    Ok(()) => {
                        info!(host = %target.host, %mac, "sent wake-on-lan packet");
                        PacketOutcome::Sent
                    }
                    Err(e) => {
                        warn!(host = %target.host, %mac, error = %e, "wake-on-lan packet failed");
                        PacketOutcome::Failed(e.to_string())
                    }
                },
            },
        };

        if packet == PacketOutcome::Sent {
            tokio::time::sleep(self.config.wake_settle()).await;
        }

        let brands: Vec<TvBrand> = match brand {
            Some(b) if !matches!(b, TvBrand::Unknown | TvBrand::Vestel) => vec![b],
            _ => vec![TvBrand::Samsung, TvBrand::Lg, TvBrand::Roku, TvBrand::Android],
        };
        let answers = join_all(brands.iter().map(|b| self.touch(target, *b))).await;

        WakeReport {
            packet,
            touches: brands.into_iter().zip(answers).collect(),
        }
    }
}
