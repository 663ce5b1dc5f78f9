//! TCP port probe. Connect-based reachability checks against the control ports
//! TVs listen on, with semaphore-limited concurrency.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::trace;

/// Map TV control ports to the service behind them
pub fn port_to_service_name(port: u16) -> Option<&'static str> {
    match port {
        8001 => Some("Samsung remote"),
        8002 => Some("Samsung remote (TLS)"),
        3000 => Some("webOS SSAP"),
        3001 => Some("webOS SSAP (TLS)"),
        8060 => Some("Roku ECP"),
        8008 => Some("Cast"),
        8443 => Some("Cast (TLS)"),
        8009 => Some("Cast control"),
        _ => None,
    }
}

/// Ports checked when the brand of a host is not known
pub const TV_PORTS: &[u16] = &[8001, 8002, 3000, 3001, 8060, 8008, 8443];

#[derive(Debug, Clone)]
pub struct PortResult {
    pub ip: IpAddr,
    pub port: u16,
    pub open: bool,
    pub service_name: Option<&'static str>,
}

/// TCP port scanner using async connect
#[derive(Clone)]
pub struct PortScanner {
    timeout: Duration,
    max_concurrent: usize,
}

impl PortScanner {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_concurrent: 32,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn scan_port(&self, ip: IpAddr, port: u16) -> PortResult {
        let addr = SocketAddr::new(ip, port);

        let open = matches!(timeout(self.timeout, TcpStream::connect(addr)).await, Ok(Ok(_)));
        trace!(%ip, port, open, "port probe");

        PortResult {
            ip,
            port,
            open,
            service_name: if open { port_to_service_name(port) } else { None },
        }
    }

    /// Open ports among `ports` on one host
    pub async fn open_ports(&self, ip: IpAddr, ports: &[u16]) -> Vec<PortResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for &port in ports {
            let sem = semaphore.clone();
            let scanner = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                Some(scanner.scan_port(ip, port).await)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            if let Ok(Some(result)) = handle.await
                && result.open
            {
                results.push(result);
            }
        }
        results
    }

    /// True if any of `ports` accepts a connection
    pub async fn any_open(&self, ip: IpAddr, ports: &[u16]) -> bool {
        !self.open_ports(ip, ports).await.is_empty()
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_port_to_service_name() {
        assert_eq!(port_to_service_name(8060), Some("Roku ECP"));
        assert_eq!(port_to_service_name(3000), Some("webOS SSAP"));
        assert_eq!(port_to_service_name(22), None);
    }

    #[test]
    fn test_scanner_with_timeout() {
        let scanner = PortScanner::new().with_timeout(Duration::from_secs(5));
        assert_eq!(scanner.timeout, Duration::from_secs(5));
        assert_eq!(PortScanner::default().max_concurrent, 32);
    }

    #[tokio::test]
    async fn test_open_ports_finds_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let scanner = PortScanner::new().with_timeout(Duration::from_millis(500));
        let results = scanner.open_ports(ip, &[open_port, 1]).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].port, open_port);
        assert!(scanner.any_open(ip, &[open_port]).await);
        assert!(!scanner.any_open(ip, &[1]).await);
    }
}
