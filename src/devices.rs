//! Saved device list: local records merged with an optional cloud inventory.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::DeviceStore;
use crate::error::Result;
use crate::network::device_control::{
    ConnectionStatus, PowerState, TvBrand, TvCapabilities, TvController, TvDevice,
};

/// Device record as the account service returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDevice {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub room_id: Option<i64>,
    pub local_id: Option<String>,
}

fn default_kind() -> String {
    "tv".to_string()
}

/// Remote inventory of devices. Failures never block local control.
#[async_trait]
pub trait CloudDeviceSource: Send + Sync {
    async fn fetch_devices(&self) -> Result<Vec<CloudDevice>>;
}

impl From<&CloudDevice> for TvDevice {
    fn from(cloud: &CloudDevice) -> Self {
        let brand = TvBrand::from_loose(cloud.brand.as_deref());
        let mut device = TvDevice::new(
            format!("cloud_{}", cloud.id),
            cloud.name.clone(),
            brand,
            cloud.ip_address.clone(),
        );
        device.model = cloud.model.clone();
        device.mac = cloud.mac_address.clone();
        device.room_id = cloud.room_id;
        device.cloud_id = Some(cloud.id);
        device.capabilities = TvCapabilities::for_brand(brand, cloud.mac_address.as_deref());
        device
    }
}

/// Local records win. A cloud record matching a local one by address or
/// cloud id only links the two; unmatched cloud records are appended.
pub fn merge_cloud_devices(local: Vec<TvDevice>, cloud: &[CloudDevice]) -> Vec<TvDevice> {
    let mut merged = local;
    for remote in cloud {
        let existing = merged
            .iter_mut()
            .find(|d| d.ip == remote.ip_address || d.cloud_id == Some(remote.id));
        match existing {
            Some(device) => device.cloud_id = Some(remote.id),
            None => merged.push(TvDevice::from(remote)),
        }
    }
    merged
}

/// Saved devices plus whatever the cloud source returns within `cloud_timeout`
pub async fn load_all_devices(
    store: &dyn DeviceStore,
    cloud: Option<&dyn CloudDeviceSource>,
    cloud_timeout: Duration,
) -> Result<Vec<TvDevice>> {
    let local = store.list_saved_devices()?;
    let Some(cloud) = cloud else {
        return Ok(local);
    };

    match tokio::time::timeout(cloud_timeout, cloud.fetch_devices()).await {
        Ok(Ok(remote)) => {
            debug!(local = local.len(), remote = remote.len(), "merging cloud devices");
            Ok(merge_cloud_devices(local, &remote))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "cloud device list unavailable");
            Ok(local)
        }
        Err(_) => {
            warn!("cloud device list timed out");
            Ok(local)
        }
    }
}

/// Fill the session-derived fields of every device from a status query
pub async fn refresh_statuses(controller: &TvController, devices: &mut [TvDevice]) {
    let statuses = join_all(devices.iter().map(|d| controller.get_status(d))).await;
    for (device, status) in devices.iter_mut().zip(statuses) {
        device.connection_status = if status.online {
            ConnectionStatus::Online
        } else {
            ConnectionStatus::Offline
        };
        device.power_state = if status.online { status.power } else { PowerState::Unknown };
        device.volume = status.volume;
        device.current_app = status.current_app;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::error::ControlError;

    fn cloud(id: i64, ip: &str) -> CloudDevice {
        CloudDevice {
            id,
            name: format!("Cloud {}", id),
            kind: "tv".to_string(),
            brand: Some("LG".to_string()),
            model: None,
            ip_address: ip.to_string(),
            mac_address: None,
            room_id: Some(3),
            local_id: None,
        }
    }

    struct FixedSource(Vec<CloudDevice>);

    #[async_trait]
    impl CloudDeviceSource for FixedSource {
        async fn fetch_devices(&self) -> Result<Vec<CloudDevice>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl CloudDeviceSource for BrokenSource {
        async fn fetch_devices(&self) -> Result<Vec<CloudDevice>> {
            Err(ControlError::Unreachable("cloud".to_string()))
        }
    }

    struct HangingSource;

    #[async_trait]
    impl CloudDeviceSource for HangingSource {
        async fn fetch_devices(&self) -> Result<Vec<CloudDevice>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_merge_by_address_links_cloud_id() {
        let local = vec![TvDevice::new("tv_1", "Den", TvBrand::Samsung, "192.168.1.10")];
        let merged = merge_cloud_devices(local, &[cloud(7, "192.168.1.10")]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "tv_1");
        assert_eq!(merged[0].brand, TvBrand::Samsung);
        assert_eq!(merged[0].cloud_id, Some(7));
    }

    #[test]
    fn test_merge_by_cloud_id_after_address_change() {
        let mut moved = TvDevice::new("tv_1", "Den", TvBrand::Lg, "192.168.1.99");
        moved.cloud_id = Some(7);
        let merged = merge_cloud_devices(vec![moved], &[cloud(7, "192.168.1.10")]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip, "192.168.1.99");
    }

    #[test]
    fn test_cloud_only_device_appended() {
        let merged = merge_cloud_devices(Vec::new(), &[cloud(9, "10.0.0.4")]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "cloud_9");
        assert_eq!(merged[0].brand, TvBrand::Lg);
        assert_eq!(merged[0].room_id, Some(3));
        assert!(!merged[0].capabilities.can_wake_on_lan);
    }

    #[tokio::test]
    async fn test_load_all_devices_merges_source() {
        let store = MemoryStore::new();
        store
            .save_device(&TvDevice::new("tv_1", "Den", TvBrand::Roku, "10.0.0.2"))
            .unwrap();
        let source = FixedSource(vec![cloud(1, "10.0.0.2"), cloud(2, "10.0.0.3")]);

        let devices = load_all_devices(&store, Some(&source), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_cloud_failure_falls_back_to_local() {
        let store = MemoryStore::new();
        store
            .save_device(&TvDevice::new("tv_1", "Den", TvBrand::Roku, "10.0.0.2"))
            .unwrap();

        let broken = load_all_devices(&store, Some(&BrokenSource), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(broken.len(), 1);

        let hanging = load_all_devices(&store, Some(&HangingSource), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(hanging.len(), 1);
    }
}
