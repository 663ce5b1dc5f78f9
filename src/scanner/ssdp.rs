//! SSDP pass for discovery. Sends M-SEARCH requests for the search targets TVs
//! advertise and infers the brand from what answers.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use ssdp_client::{SearchTarget, URN};
use tracing::{debug, warn};

use crate::network::device_control::TvBrand;

/// One SSDP answer, deduplicated by address
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpHit {
    pub ip: String,
    pub location: String,
    pub server: Option<String>,
    pub search_target: String,
    pub brand: TvBrand,
}

const TV_URNS: &[&str] = &[
    "urn:samsung.com:device:RemoteControlReceiver:1",
    "urn:dial-multiscreen-org:service:dial:1",
];

fn search_targets() -> Vec<SearchTarget> {
    let mut targets = vec![SearchTarget::Custom("roku".to_string(), "ecp".to_string())];
    for urn in TV_URNS {
        match urn.parse::<URN>() {
            Ok(urn) => targets.push(SearchTarget::URN(urn)),
            Err(e) => warn!(urn, error = %e, "bad search target"),
        }
    }
    targets
}

/// Guess a brand from the search target and SERVER header of an answer
pub fn infer_brand(search_target: &str, server: Option<&str>) -> TvBrand {
    let target = search_target.to_lowercase();
    let server = server.unwrap_or_default().to_lowercase();

    if target.starts_with("roku:") || server.contains("roku") {
        TvBrand::Roku
    } else if target.contains("samsung.com") || server.contains("samsung") || server.contains("tizen")
    {
        TvBrand::Samsung
    } else if server.contains("webos") || server.contains("lge") {
        TvBrand::Lg
    } else if server.contains("android") || server.contains("cast") {
        TvBrand::Android
    } else {
        TvBrand::Unknown
    }
}

/// SSDP/UPnP discovery of TVs
pub struct SsdpScanner {
    timeout: Duration,
}

impl SsdpScanner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn search(&self, target: &SearchTarget) -> Vec<SsdpHit> {
        let responses = match ssdp_client::search(target, self.timeout, 2, None).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(target = %target, error = %e, "ssdp search failed");
                return Vec::new();
            }
        };
        futures::pin_mut!(responses);

        let mut hits = Vec::new();
        while let Some(response) = responses.next().await {
            if let Ok(response) = response
                && let Ok(url) = url::Url::parse(response.location())
                && let Some(host) = url.host_str()
                && host.parse::<IpAddr>().is_ok()
            {
                let server = Some(response.server().to_string()).filter(|s| !s.is_empty());
                let search_target = response.search_target().to_string();
                let brand = infer_brand(&search_target, server.as_deref());
                debug!(ip = %host, %brand, st = %search_target, "ssdp answer");
                hits.push(SsdpHit {
                    ip: host.to_string(),
                    location: response.location().to_string(),
                    server,
                    search_target,
                    brand,
                });
            }
        }
        hits
    }

    /// Search every target at once; one hit per address, earlier targets first
    pub async fn discover(&self) -> Vec<SsdpHit> {
        let targets = search_targets();
        let answers = join_all(targets.iter().map(|target| self.search(target))).await;

        let mut seen = HashSet::new();
        answers
            .into_iter()
            .flatten()
            .filter(|hit| seen.insert(hit.ip.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_brand_from_target() {
        assert_eq!(infer_brand("roku:ecp", None), TvBrand::Roku);
        assert_eq!(
            infer_brand("urn:samsung.com:device:RemoteControlReceiver:1", None),
            TvBrand::Samsung
        );
    }

    #[test]
    fn test_infer_brand_from_server_header() {
        let dial = "urn:dial-multiscreen-org:service:dial:1";
        assert_eq!(infer_brand(dial, Some("WebOS/4.1.0 UPnP/1.0")), TvBrand::Lg);
        assert_eq!(infer_brand(dial, Some("Linux/3.10 UPnP/1.0 Android/9")), TvBrand::Android);
        assert_eq!(infer_brand(dial, Some("Linux UPnP/1.0 Sonos/63.2")), TvBrand::Unknown);
    }

    #[test]
    fn test_search_targets_render() {
        let rendered: Vec<String> = search_targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0], "roku:ecp");
        assert!(rendered[1].contains("RemoteControlReceiver"));
    }
}
