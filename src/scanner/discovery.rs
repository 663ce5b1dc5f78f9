//! Discovery orchestration. Sweeps candidate addresses in batches, asks every
//! brand probe about each host at once, and streams deduplicated hits to the
//! caller under one wall-clock budget. The SSDP search runs alongside the sweep.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use ipnetwork::Ipv4Network;
use pnet::datalink;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

use super::port::{PortScanner, TV_PORTS};
use super::ssdp::{SsdpHit, SsdpScanner};
use crate::config::ControlConfig;
use crate::network::device_control::{DiscoveredTv, TvBrand, TvController, TvProbe};

/// Host suffixes in the order they are scanned within each /24
pub fn prioritized_suffixes() -> impl Iterator<Item = u8> {
    (1..=50u8).chain(100..=149).chain(200..=253)
}

/// /24 prefixes of every up, non-loopback IPv4 interface
fn interface_prefixes() -> Vec<String> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| {
            iface.ips.into_iter().filter_map(|ip| match ip.ip() {
                IpAddr::V4(ipv4) => Ipv4Network::new(ipv4, 24).ok().map(|net| {
                    let [a, b, c, _] = net.network().octets();
                    format!("{}.{}.{}", a, b, c)
                }),
                IpAddr::V6(_) => None,
            })
        })
        .collect()
}

/// Progress report emitted after every batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryProgress {
    pub processed: usize,
    pub total: usize,
    pub found: usize,
}

impl fmt::Display for DiscoveryProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scanning... {}/{}", self.processed, self.total)
    }
}

/// Finds TVs on the local network
pub struct TvDiscovery {
    config: Arc<ControlConfig>,
    probes: Vec<Arc<dyn TvProbe>>,
    ports: PortScanner,
    ssdp_enabled: bool,
    run_id: Arc<AtomicU64>,
}

impl TvDiscovery {
    /// Probes run together per host; the earliest registered probe that
    /// answers wins
    pub fn new(config: Arc<ControlConfig>, probes: Vec<Arc<dyn TvProbe>>) -> Self {
        Self {
            ports: PortScanner::new().with_timeout(config.probe_timeout()),
            ssdp_enabled: config.ssdp_enabled,
            config,
            probes,
            run_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_controller(controller: &TvController) -> Self {
        Self::new(controller.config().clone(), controller.probes())
    }

    pub fn without_ssdp(mut self) -> Self {
        self.ssdp_enabled = false;
        self
    }

    /// Every address a full sweep visits, prefix by prefix
    pub fn candidate_hosts(&self) -> Vec<String> {
        let mut prefixes = self.config.subnet_prefixes.clone();
        if self.config.use_interface_subnets {
            prefixes.extend(interface_prefixes());
        }

        let mut seen = HashSet::new();
        prefixes.retain(|p| seen.insert(p.clone()));

        prefixes
            .iter()
            .flat_map(|prefix| prioritized_suffixes().map(move |s| format!("{}.{}", prefix, s)))
            .collect()
    }

    async fn probe_host(probes: &[Arc<dyn TvProbe>], host: String) -> Option<DiscoveredTv> {
        let answers = join_all(probes.iter().map(|probe| probe.probe(&host))).await;
        answers.into_iter().flatten().next()
    }

    /// Full discovery: sweep the candidate hosts while SSDP searches, then
    /// merge the SSDP answers the sweep missed
    pub async fn discover<P, F>(&self, on_progress: P, mut on_found: F) -> Vec<DiscoveredTv>
    where
        P: FnMut(DiscoveryProgress),
        F: FnMut(&DiscoveredTv),
    {
        let deadline = Instant::now() + self.config.discovery_budget();
        let run = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;

        let ssdp = async {
            if !self.ssdp_enabled {
                return Vec::new();
            }
            let scanner = SsdpScanner::new(self.config.probe_timeout());
            timeout_at(deadline, scanner.discover()).await.unwrap_or_default()
        };
        let sweep = self.sweep(run, deadline, self.candidate_hosts(), on_progress, &mut on_found);
        let (mut found, hits) = tokio::join!(sweep, ssdp);

        if self.is_current(run) {
            self.merge_ssdp(run, deadline, hits, &mut found, &mut on_found)
                .await;
        }

        info!(found = found.len(), "discovery finished");
        found
    }

    /// Sweep an explicit host list with the same batching and dedup rules
    pub async fn discover_hosts<P, F>(
        &self,
        hosts: Vec<String>,
        on_progress: P,
        mut on_found: F,
    ) -> Vec<DiscoveredTv>
    where
        P: FnMut(DiscoveryProgress),
        F: FnMut(&DiscoveredTv),
    {
        let deadline = Instant::now() + self.config.discovery_budget();
        let run = self.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sweep(run, deadline, hosts, on_progress, &mut on_found)
            .await
    }

    fn is_current(&self, run: u64) -> bool {
        self.run_id.load(Ordering::SeqCst) == run
    }

    async fn sweep<P, F>(
        &self,
        run: u64,
        deadline: Instant,
        hosts: Vec<String>,
        mut on_progress: P,
        on_found: &mut F,
    ) -> Vec<DiscoveredTv>
    where
        P: FnMut(DiscoveryProgress),
        F: FnMut(&DiscoveredTv),
    {
        let total = hosts.len();
        let batch_size = self.config.discovery_batch_size.max(1);
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut processed = 0;

        debug!(run, total, batch_size, "discovery sweep started");

        'batches: for batch in hosts.chunks(batch_size) {
            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .map(|host| Self::probe_host(&self.probes, host.clone()))
                .collect();

            loop {
                match timeout_at(deadline, pending.next()).await {
                    Ok(Some(hit)) => {
                        if !self.is_current(run) {
                            debug!(run, "discovery superseded");
                            break 'batches;
                        }
                        if let Some(tv) = hit
                            && seen.insert(tv.ip.clone())
                        {
                            info!(ip = %tv.ip, brand = %tv.brand, name = %tv.name, "found tv");
                            on_found(&tv);
                            found.push(tv);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        info!(run, processed, total, "discovery budget exhausted");
                        break 'batches;
                    }
                }
            }

            if !self.is_current(run) {
                break;
            }
            processed += batch.len();
            on_progress(DiscoveryProgress {
                processed,
                total,
                found: found.len(),
            });
        }

        found
    }

    /// Add SSDP answers for addresses the sweep did not find. Answers from
    /// non-TV devices are dropped. Hits are enriched through their brand's
    /// probe while budget remains.
    async fn merge_ssdp<F>(
        &self,
        run: u64,
        deadline: Instant,
        hits: Vec<SsdpHit>,
        found: &mut Vec<DiscoveredTv>,
        on_found: &mut F,
    ) where
        F: FnMut(&DiscoveredTv),
    {
        for hit in hits {
            if !self.is_current(run) {
                return;
            }
            if hit.brand == TvBrand::Unknown {
                debug!(ip = %hit.ip, server = ?hit.server, "ignoring non-tv ssdp answer");
                continue;
            }
            if found.iter().any(|tv| tv.ip == hit.ip) {
                continue;
            }

            let probe = self.probes.iter().find(|p| p.probe_brand() == hit.brand);
            let enriched = match probe {
                Some(probe) if Instant::now() < deadline => {
                    timeout_at(deadline, probe.probe(&hit.ip)).await.ok().flatten()
                }
                _ => None,
            };
            let tv = enriched.unwrap_or_else(|| {
                let mut tv = DiscoveredTv::new(hit.ip.clone(), hit.brand, format!("{} TV", hit.brand));
                tv.manufacturer = hit.server.clone();
                tv
            });

            info!(ip = %tv.ip, brand = %tv.brand, "found tv via ssdp");
            on_found(&tv);
            found.push(tv);
        }
    }

    /// First brand whose probe answers for `host`
    pub async fn detect_brand(&self, host: &str) -> TvBrand {
        Self::probe_host(&self.probes, host.to_string())
            .await
            .map(|tv| tv.brand)
            .unwrap_or(TvBrand::Unknown)
    }

    /// Whether a TV still answers at `host`. Brands without a probe fall back
    /// to a TCP check of the usual control ports.
    pub async fn check_online(&self, host: &str, brand: TvBrand) -> bool {
        if let Some(probe) = self.probes.iter().find(|p| p.probe_brand() == brand) {
            return probe.probe(host).await.is_some();
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => self.ports.any_open(ip, TV_PORTS).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers for a fixed set of hosts after an optional delay
    struct FakeProbe {
        brand: TvBrand,
        hosts: Vec<&'static str>,
        delay: Duration,
        asked: Mutex<Vec<String>>,
    }

    impl FakeProbe {
        fn new(brand: TvBrand, hosts: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                brand,
                hosts,
                delay: Duration::ZERO,
                asked: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TvProbe for FakeProbe {
        fn probe_brand(&self) -> TvBrand {
            self.brand
        }

        async fn probe(&self, host: &str) -> Option<DiscoveredTv> {
            self.asked.lock().unwrap().push(host.to_string());
            tokio::time::sleep(self.delay).await;
            self.hosts
                .iter()
                .any(|h| *h == host)
                .then(|| DiscoveredTv::new(host, self.brand, format!("{} set", self.brand)))
        }
    }

    fn config(batch: usize) -> Arc<ControlConfig> {
        Arc::new(ControlConfig {
            discovery_batch_size: batch,
            subnet_prefixes: vec!["10.1.2".to_string()],
            ssdp_enabled: false,
            ..ControlConfig::default()
        })
    }

    fn hosts(n: u8) -> Vec<String> {
        (1..=n).map(|i| format!("10.1.2.{}", i)).collect()
    }

    #[test]
    fn test_candidate_hosts_order() {
        let discovery = TvDiscovery::new(config(20), Vec::new());
        let hosts = discovery.candidate_hosts();
        assert_eq!(hosts.len(), 50 + 50 + 54);
        assert_eq!(hosts[0], "10.1.2.1");
        assert_eq!(hosts[49], "10.1.2.50");
        assert_eq!(hosts[50], "10.1.2.100");
        assert_eq!(hosts.last().map(String::as_str), Some("10.1.2.253"));
    }

    #[tokio::test]
    async fn test_two_brands_on_one_address_dedup() {
        let samsung = FakeProbe::new(TvBrand::Samsung, vec!["10.1.2.7"]);
        let roku = FakeProbe::new(TvBrand::Roku, vec!["10.1.2.7", "10.1.2.9"]);
        let discovery = TvDiscovery::new(config(4), vec![samsung, roku]);

        let mut streamed = Vec::new();
        let found = discovery
            .discover_hosts(hosts(10), |_| {}, |tv| streamed.push(tv.ip.clone()))
            .await;

        assert_eq!(found.len(), 2);
        let at_seven: Vec<_> = found.iter().filter(|tv| tv.ip == "10.1.2.7").collect();
        assert_eq!(at_seven.len(), 1);
        assert_eq!(at_seven[0].brand, TvBrand::Samsung);
        assert_eq!(streamed.len(), 2);
    }

    #[tokio::test]
    async fn test_progress_after_each_batch() {
        let probe = FakeProbe::new(TvBrand::Roku, vec!["10.1.2.3"]);
        let discovery = TvDiscovery::new(config(4), vec![probe]);

        let mut reports = Vec::new();
        discovery
            .discover_hosts(hosts(10), |p| reports.push(p.to_string()), |_| {})
            .await;

        assert_eq!(
            reports,
            ["Scanning... 4/10", "Scanning... 8/10", "Scanning... 10/10"]
        );
    }

    #[tokio::test]
    async fn test_budget_bounds_discovery() {
        let slow = Arc::new(FakeProbe {
            brand: TvBrand::Lg,
            hosts: vec!["10.1.2.1"],
            delay: Duration::from_millis(300),
            asked: Mutex::new(Vec::new()),
        });
        let mut cfg = (*config(2)).clone();
        cfg.discovery_budget_secs = 1;
        let discovery = TvDiscovery::new(Arc::new(cfg), vec![slow]);

        let started = std::time::Instant::now();
        let found = discovery.discover_hosts(hosts(20), |_| {}, |_| {}).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_new_run_supersedes_previous() {
        let slow = Arc::new(FakeProbe {
            brand: TvBrand::Samsung,
            hosts: vec!["10.1.2.1", "10.1.2.2", "10.1.2.3", "10.1.2.4", "10.1.2.5", "10.1.2.6"],
            delay: Duration::from_millis(100),
            asked: Mutex::new(Vec::new()),
        });
        let discovery = TvDiscovery::new(config(2), vec![slow]);

        let (first, second) = tokio::join!(
            discovery.discover_hosts(hosts(6), |_| {}, |_| {}),
            async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                discovery.discover_hosts(hosts(2), |_| {}, |_| {}).await
            }
        );

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_brands_still_reach_later_prefix() {
        let slow = |brand: TvBrand, hosts: Vec<&'static str>| {
            Arc::new(FakeProbe {
                brand,
                hosts,
                delay: Duration::from_millis(200),
                asked: Mutex::new(Vec::new()),
            }) as Arc<dyn TvProbe>
        };
        let probes = vec![
            slow(TvBrand::Samsung, vec![]),
            slow(TvBrand::Roku, vec![]),
            slow(TvBrand::Lg, vec![]),
            slow(TvBrand::Android, vec!["10.1.4.5"]),
        ];
        let mut cfg = (*config(10)).clone();
        cfg.discovery_budget_secs = 1;
        let discovery = TvDiscovery::new(Arc::new(cfg), probes);

        let mut targets = hosts(10);
        targets.extend((1..=10).map(|i| format!("10.1.3.{}", i)));
        targets.extend((1..=10).map(|i| format!("10.1.4.{}", i)));

        let mut reports = Vec::new();
        let found = discovery
            .discover_hosts(targets, |p| reports.push(p.processed), |_| {})
            .await;

        assert_eq!(reports, [10, 20, 30]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ip, "10.1.4.5");
        assert_eq!(found[0].brand, TvBrand::Android);
    }

    #[tokio::test]
    async fn test_concurrent_brand_checks_keep_registration_precedence() {
        let slow_samsung = Arc::new(FakeProbe {
            brand: TvBrand::Samsung,
            hosts: vec!["10.1.2.7"],
            delay: Duration::from_millis(100),
            asked: Mutex::new(Vec::new()),
        });
        let quick_roku = FakeProbe::new(TvBrand::Roku, vec!["10.1.2.7"]);
        let discovery = TvDiscovery::new(config(4), vec![slow_samsung, quick_roku]);

        assert_eq!(discovery.detect_brand("10.1.2.7").await, TvBrand::Samsung);
    }

    fn ssdp_hit(ip: &str, brand: TvBrand, server: &str) -> SsdpHit {
        SsdpHit {
            ip: ip.to_string(),
            location: format!("http://{}:8060/", ip),
            server: Some(server.to_string()),
            search_target: "urn:dial-multiscreen-org:service:dial:1".to_string(),
            brand,
        }
    }

    #[tokio::test]
    async fn test_ssdp_merge_skips_non_tv_and_known_hosts() {
        let discovery = TvDiscovery::new(config(4), Vec::new());
        let run = discovery.run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = Instant::now() + Duration::from_secs(1);

        let mut found = vec![DiscoveredTv::new("10.1.2.3", TvBrand::Samsung, "Samsung TV")];
        let hits = vec![
            ssdp_hit("10.1.2.3", TvBrand::Samsung, "Tizen"),
            ssdp_hit("10.1.2.4", TvBrand::Unknown, "Linux UPnP/1.0 Sonos/63.2"),
            ssdp_hit("10.1.2.5", TvBrand::Lg, "WebOS/4.1.0 UPnP/1.0"),
        ];

        let mut streamed = Vec::new();
        discovery
            .merge_ssdp(run, deadline, hits, &mut found, &mut |tv: &DiscoveredTv| {
                streamed.push(tv.ip.clone())
            })
            .await;

        assert_eq!(streamed, ["10.1.2.5"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].brand, TvBrand::Lg);
        assert_eq!(found[1].manufacturer.as_deref(), Some("WebOS/4.1.0 UPnP/1.0"));
    }

    #[tokio::test]
    async fn test_detect_brand_uses_probe_order() {
        let samsung = FakeProbe::new(TvBrand::Samsung, vec![]);
        let lg = FakeProbe::new(TvBrand::Lg, vec!["10.1.2.5"]);
        let discovery = TvDiscovery::new(config(4), vec![samsung.clone(), lg]);

        assert_eq!(discovery.detect_brand("10.1.2.5").await, TvBrand::Lg);
        assert_eq!(discovery.detect_brand("10.1.2.6").await, TvBrand::Unknown);
        assert_eq!(samsung.asked.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_check_online_by_brand() {
        let roku = FakeProbe::new(TvBrand::Roku, vec!["10.1.2.8"]);
        let discovery = TvDiscovery::new(config(4), vec![roku]);

        assert!(discovery.check_online("10.1.2.8", TvBrand::Roku).await);
        assert!(!discovery.check_online("10.1.2.9", TvBrand::Roku).await);
        assert!(!discovery.check_online("not-an-ip", TvBrand::Vestel).await);
    }
}
