//! Reachability probing.
//!
//! Checks every candidate address for open management ports with a bounded
//! pool of concurrent TCP connects, managed by the tokio runtime. Only the
//! addresses with at least one open port move on to collection.

pub mod banner;
pub mod rate_limiter;
pub mod tcp;

use crate::config::ProbeSettings;
use crate::types::{Port, PortList};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};

pub use rate_limiter::RateLimiter;
pub use tcp::{PortProbe, TcpProbe};

/// An address with at least one open management port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachableHost {
    pub address: IpAddr,
    /// Open ports, ascending.
    pub open_ports: Vec<Port>,
    /// Fastest handshake among the open ports.
    pub latency_ms: u64,
    /// SSH identification line, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

impl ReachableHost {
    pub fn has_port(&self, port: Port) -> bool {
        self.open_ports.contains(&port)
    }

    /// A host assumed reachable on the given ports, for runs that skip probing.
    pub fn assumed(address: IpAddr, ports: &PortList) -> Self {
        Self {
            address,
            open_ports: ports.ports().to_vec(),
            latency_ms: 0,
            banner: None,
        }
    }
}

/// Configuration for a probe sweep.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub ports: PortList,
    pub timeout: Duration,
    pub workers: usize,
    pub rate_limit: Option<RateLimiter>,
    pub grab_banner: bool,
    pub show_progress: bool,
}

impl ProbeConfig {
    pub fn from_settings(settings: &ProbeSettings) -> Self {
        Self {
            ports: settings.ports.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            workers: settings.workers,
            rate_limit: RateLimiter::per_second(settings.rate_limit),
            grab_banner: settings.grab_banner,
            show_progress: false,
        }
    }
}

/// Bounded-concurrency TCP prober.
pub struct ReachabilityProber {
    config: ProbeConfig,
}

impl ReachabilityProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Probe every address and return the reachable ones, sorted by address.
    ///
    /// Never fails: a silent or refusing address is simply absent.
    pub async fn probe(&self, hosts: Vec<IpAddr>) -> Vec<ReachableHost> {
        let start = Instant::now();
        let total = hosts.len();
        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let probe = TcpProbe::new(self.config.timeout);
        let progress = self.config.show_progress.then(|| progress_bar(total as u64));

        info!(
            hosts = total,
            ports = %self.config.ports,
            workers,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Probing management ports"
        );

        let mut reachable: Vec<ReachableHost> = stream::iter(hosts)
            .map(|ip| {
                let semaphore = Arc::clone(&semaphore);
                let progress = progress.clone();
                async move {
                    let result = self.probe_host(&probe, &semaphore, ip).await;
                    if let Some(pb) = &progress {
                        pb.inc(1);
                        if let Some(host) = &result {
                            pb.set_message(format!("{} reachable", host.address));
                        }
                    }
                    result
                }
            })
            // The semaphore bounds live sockets; the buffer only bounds queued hosts.
            .buffer_unordered(workers * 2)
            .filter_map(|host| async move { host })
            .collect()
            .await;

        reachable.sort_by_key(|h| h.address);

        if let Some(pb) = progress {
            pb.finish_with_message(format!("{} reachable", reachable.len()));
        }

        info!(
            reachable = reachable.len(),
            probed = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "Probe complete"
        );
        reachable
    }

    async fn probe_host(
        &self,
        probe: &TcpProbe,
        semaphore: &Semaphore,
        ip: IpAddr,
    ) -> Option<ReachableHost> {
        let attempts = self.config.ports.ports().iter().map(|&port| async move {
            let _permit = semaphore.acquire().await.ok()?;
            if let Some(limiter) = &self.config.rate_limit {
                limiter.wait().await;
            }
            let want_banner = self.config.grab_banner && port == Port::SSH;
            Some(probe.check(ip, port, want_banner).await)
        });
        let results: Vec<PortProbe> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .filter(|r| r.open)
            .collect();

        if results.is_empty() {
            return None;
        }

        let latency = results
            .iter()
            .filter_map(|r| r.latency)
            .min()
            .unwrap_or_default();
        let banner = results.iter().find_map(|r| r.banner.clone());
        let mut open_ports: Vec<Port> = results.iter().map(|r| r.port).collect();
        open_ports.sort_unstable();

        debug!(%ip, ports = ?open_ports, "Host reachable");
        Some(ReachableHost {
            address: ip,
            open_ports,
            latency_ms: latency.as_millis() as u64,
            banner,
        })
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} probed {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}
