//! Bounded-concurrency session collection.
//!
//! Every reachable host gets one session under a wall-clock deadline. The
//! session's progress is recorded step by step in a [`HostProgress`], so a
//! host that times out, fails or is cancelled still yields an accurate
//! [`RawCapture`], which is handed to the [`CaptureSink`] before the worker
//! moves on.

use super::capture::{HostProgress, RawCapture};
use super::prompt::CliChannel;
use super::ssh::SshConnector;
use super::telnet::TelnetConnector;
use super::transport::{Connector, Credentials, Protocol};
use crate::config::{ProfileManager, ResolvedProfile, Settings, GENERIC_PROFILE};
use crate::error::{ConfigError, ConfigResult, ProfileResult, SessionError, StorageResult};
use crate::probe::banner::ssh_software;
use crate::probe::ReachableHost;
use crate::types::RunId;
use crate::vendor::{guess_vendor, hostname_from_output, hostname_from_prompt, VendorSource};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Grace period for a polite logout.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Destination for finished captures.
///
/// Called once per host, from the worker that ran the session.
pub trait CaptureSink: Send + Sync {
    /// Persist a capture. `Ok(false)` means it was withheld on purpose.
    fn persist(&self, capture: &RawCapture) -> StorageResult<bool>;
}

/// Aggregate counters shared by all workers.
#[derive(Debug, Default)]
pub struct CollectStats {
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl CollectStats {
    /// `(attempted, succeeded, failed)`
    pub fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.attempted.load(Ordering::Relaxed),
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Everything a collection pass needs besides the host list.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub run_id: RunId,
    pub credentials: Credentials,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub command_timeout: Duration,
    pub host_deadline: Duration,
    pub workers: usize,
    pub heartbeat: Option<Duration>,
    pub primary: Protocol,
    pub fallback: Option<Protocol>,
    pub prefer_vendor: Option<String>,
    pub vendor_hints: Vec<(IpNetwork, String)>,
    pub show_progress: bool,
}

impl CollectConfig {
    pub fn from_settings(
        settings: &Settings,
        run_id: RunId,
        credentials: Credentials,
    ) -> ConfigResult<Self> {
        let vendor_hints = settings
            .vendor_hints
            .iter()
            .map(|hint| {
                hint.cidr
                    .trim()
                    .parse::<IpNetwork>()
                    .map(|net| (net, hint.vendor.clone()))
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "vendor_hints".to_string(),
                        reason: format!("{}: {}", hint.cidr, e),
                    })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let collect = &settings.collect;
        Ok(Self {
            run_id,
            credentials,
            connect_timeout: collect.connect_timeout(),
            auth_timeout: collect.auth_timeout(),
            command_timeout: collect.command_timeout(),
            host_deadline: collect.host_deadline(),
            workers: collect.workers,
            heartbeat: collect.heartbeat(),
            primary: collect.primary,
            fallback: collect.fallback.filter(|&p| p != collect.primary),
            prefer_vendor: settings.prefer_vendor.clone(),
            vendor_hints,
            show_progress: false,
        })
    }
}

/// Runs CLI sessions against reachable hosts.
pub struct SessionCollector {
    config: CollectConfig,
    connectors: BTreeMap<Protocol, Arc<dyn Connector>>,
    profiles: ProfileManager,
    generic: ResolvedProfile,
    sink: Arc<dyn CaptureSink>,
    stats: Arc<CollectStats>,
}

impl SessionCollector {
    /// A collector with the SSH and Telnet connectors installed.
    pub fn new(
        config: CollectConfig,
        profiles: ProfileManager,
        sink: Arc<dyn CaptureSink>,
    ) -> ProfileResult<Self> {
        let generic = profiles.resolve(GENERIC_PROFILE)?;
        let collector = Self {
            config,
            connectors: BTreeMap::new(),
            profiles,
            generic,
            sink,
            stats: Arc::new(CollectStats::default()),
        };
        Ok(collector
            .with_connector(Arc::new(SshConnector::new()))
            .with_connector(Arc::new(TelnetConnector)))
    }

    /// Install or replace the connector for its protocol.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.insert(connector.protocol(), connector);
        self
    }

    pub fn stats(&self) -> Arc<CollectStats> {
        Arc::clone(&self.stats)
    }

    /// Collect every host and return the persisted captures, sorted by
    /// address.
    ///
    /// Once `cancel` turns true no new session starts; sessions in flight are
    /// stopped and recorded as cancelled at their current step.
    pub async fn collect(
        &self,
        hosts: Vec<ReachableHost>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<RawCapture> {
        let start = Instant::now();
        let total = hosts.len();
        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let progress = self.config.show_progress.then(|| progress_bar(total as u64));
        let heartbeat = self
            .config
            .heartbeat
            .map(|every| spawn_heartbeat(every, Arc::clone(&self.stats), start));

        info!(
            hosts = total,
            workers,
            deadline_ms = self.config.host_deadline.as_millis() as u64,
            primary = %self.config.primary,
            "Collecting from reachable hosts"
        );

        let mut captures: Vec<RawCapture> = stream::iter(hosts)
            .map(|host| {
                let semaphore = Arc::clone(&semaphore);
                let progress = progress.clone();
                let cancel = cancel.clone();
                async move {
                    let _permit = semaphore.acquire().await.ok()?;
                    let capture = if *cancel.borrow() {
                        self.skip_cancelled(&host)
                    } else {
                        self.collect_host(&host, cancel).await
                    };
                    if let Some(pb) = &progress {
                        pb.inc(1);
                        pb.set_message(format!("{} {}", capture.address, outcome_label(&capture)));
                    }
                    self.persist(capture)
                }
            })
            .buffer_unordered(workers * 2)
            .filter_map(|capture| async move { capture })
            .collect()
            .await;

        if let Some(handle) = heartbeat {
            handle.abort();
        }

        captures.sort_by_key(|c| c.address);

        let (attempted, succeeded, failed) = self.stats.snapshot();
        if let Some(pb) = progress {
            pb.finish_with_message(format!("{} succeeded, {} failed", succeeded, failed));
        }
        info!(
            attempted,
            succeeded,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Collection complete"
        );
        captures
    }

    /// A host that never got a session still counts as attempted and failed.
    fn skip_cancelled(&self, host: &ReachableHost) -> RawCapture {
        self.stats.attempted.fetch_add(1, Ordering::Relaxed);
        let mut progress = HostProgress::new(host.address, self.config.run_id);
        progress.fail(SessionError::Cancelled);
        self.tally(&progress);
        progress.finish()
    }

    fn tally(&self, progress: &HostProgress) {
        let counter = if progress.is_failed() {
            &self.stats.failed
        } else {
            &self.stats.succeeded
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn persist(&self, capture: RawCapture) -> Option<RawCapture> {
        match self.sink.persist(&capture) {
            Ok(true) => Some(capture),
            Ok(false) => {
                debug!(address = %capture.address, "Capture withheld by sink");
                None
            }
            Err(e) => {
                error!(address = %capture.address, error = %e, "Failed to persist capture");
                Some(capture)
            }
        }
    }

    /// One host, start to finish. Never fails: the outcome is on the capture.
    async fn collect_host(
        &self,
        host: &ReachableHost,
        mut cancel: watch::Receiver<bool>,
    ) -> RawCapture {
        self.stats.attempted.fetch_add(1, Ordering::Relaxed);
        let mut progress = HostProgress::new(host.address, self.config.run_id);

        let outcome = {
            let session = timeout(self.config.host_deadline, self.drive(host, &mut progress));
            tokio::select! {
                result = session => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(SessionError::DeadlineExceeded),
                },
                _ = cancelled(&mut cancel) => Err(SessionError::Cancelled),
            }
        };

        match outcome {
            Ok(()) => progress.done(),
            Err(e) => {
                debug!(address = %host.address, phase = ?progress.phase(), error = %e, "Session failed");
                progress.fail(e);
            }
        }
        self.tally(&progress);

        let capture = progress.finish();
        debug!(
            address = %capture.address,
            commands = capture.commands.len(),
            duration_ms = capture.duration_ms,
            "Session finished"
        );
        capture
    }

    async fn drive(
        &self,
        host: &ReachableHost,
        progress: &mut HostProgress,
    ) -> Result<(), SessionError> {
        let mut channel = self.open(host, progress).await?;
        let result = self.run_session(host, &mut channel, progress).await;
        let _ = timeout(CLOSE_TIMEOUT, channel.close()).await;
        result
    }

    /// Protocols to try, in order. A protocol is only tried when the prober
    /// saw its port open.
    fn protocol_order(&self, host: &ReachableHost) -> Vec<Protocol> {
        std::iter::once(self.config.primary)
            .chain(self.config.fallback)
            .filter(|p| host.has_port(p.default_port()))
            .filter(|p| self.connectors.contains_key(p))
            .collect()
    }

    /// Dial and log in, falling back only when the transport itself fails.
    async fn open(
        &self,
        host: &ReachableHost,
        progress: &mut HostProgress,
    ) -> Result<CliChannel, SessionError> {
        let mut last_error = SessionError::ConnectFailed("no open port for a configured protocol".to_string());

        for protocol in self.protocol_order(host) {
            let Some(connector) = self.connectors.get(&protocol) else {
                continue;
            };
            progress.dialing(protocol);
            let addr = SocketAddr::new(host.address, protocol.default_port().as_u16());

            match connector.dial(addr, self.config.connect_timeout).await {
                Ok(pending) => {
                    progress.authenticating();
                    let transport = pending
                        .login(&self.config.credentials, self.config.auth_timeout)
                        .await?;
                    progress.authenticated();
                    debug!(address = %host.address, %protocol, "Logged in");
                    return Ok(CliChannel::new(transport));
                }
                Err(e) if e.is_transport_failure() => {
                    debug!(address = %host.address, %protocol, error = %e, "Transport failed");
                    progress.note(format!("{} unavailable: {}", protocol, e));
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn run_session(
        &self,
        host: &ReachableHost,
        channel: &mut CliChannel,
        progress: &mut HostProgress,
    ) -> Result<(), SessionError> {
        let prompt = channel.sync_prompt(self.config.auth_timeout).await?;
        progress.offer_hostname(hostname_from_prompt(&prompt));

        if let Some((vendor, source)) = self.vendor_hint(host) {
            progress.set_vendor(&vendor, source);
        }

        let outputs = match progress.vendor().map(str::to_string) {
            Some(vendor) => {
                let profile = self.profile_for(&vendor);
                self.run_profile(channel, &profile, progress).await?
            }
            None => {
                let mut outputs = self.run_profile(channel, &self.generic, progress).await?;
                match guess_vendor(&outputs.join("\n")) {
                    Some(vendor) => {
                        progress.set_vendor(vendor, VendorSource::Detected);
                        let profile = self.profile_for(vendor);
                        if profile.name != self.generic.name {
                            outputs.extend(self.run_profile(channel, &profile, progress).await?);
                        }
                    }
                    None => progress.note("vendor not detected"),
                }
                outputs
            }
        };

        if let Some(hostname) = outputs.iter().find_map(|o| hostname_from_output(o)) {
            progress.offer_hostname(Some(hostname));
        }
        Ok(())
    }

    /// Vendor known before the session: preferred, then range hint, then
    /// the SSH banner.
    fn vendor_hint(&self, host: &ReachableHost) -> Option<(String, VendorSource)> {
        if let Some(vendor) = &self.config.prefer_vendor {
            return Some((vendor.clone(), VendorSource::Preferred));
        }
        if let Some((_, vendor)) = self
            .config
            .vendor_hints
            .iter()
            .find(|(net, _)| net.contains(host.address))
        {
            return Some((vendor.clone(), VendorSource::RangeHint));
        }
        host.banner
            .as_deref()
            .and_then(ssh_software)
            .and_then(guess_vendor)
            .map(|vendor| (vendor.to_string(), VendorSource::Banner))
    }

    fn profile_for(&self, vendor: &str) -> ResolvedProfile {
        self.profiles.for_vendor(Some(vendor)).unwrap_or_else(|e| {
            warn!(%vendor, error = %e, "Profile unusable, running generic commands");
            self.generic.clone()
        })
    }

    /// Run a profile's commands that have not run yet in this session.
    async fn run_profile(
        &self,
        channel: &mut CliChannel,
        profile: &ResolvedProfile,
        progress: &mut HostProgress,
    ) -> Result<Vec<String>, SessionError> {
        progress.set_profile(&profile.name);
        progress.plan(&profile.commands);

        if profile.pre_enable {
            if let Some(secret) = self.config.credentials.enable_secret() {
                match channel.enable(secret, self.config.command_timeout).await {
                    Ok(true) => debug!("Privileged mode entered"),
                    Ok(false) => progress.note("enable refused"),
                    Err(SessionError::CommandTimeout(_)) => progress.note("enable timed out"),
                    Err(e) => return Err(e),
                }
            }
        }

        let mut outputs = Vec::with_capacity(profile.commands.len());
        for command in &profile.commands {
            if progress.has_run(command) {
                continue;
            }
            progress.begin_command(command);
            match channel.run(command, self.config.command_timeout).await {
                Ok(output) => {
                    outputs.push(output.clone());
                    progress.command_completed(command, output);
                }
                Err(e) => {
                    progress.command_failed(command, channel.take_partial(), e.clone());
                    return Err(e);
                }
            }
        }
        Ok(outputs)
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|&c| c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn spawn_heartbeat(
    every: Duration,
    stats: Arc<CollectStats>,
    start: Instant,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let (attempted, succeeded, failed) = stats.snapshot();
            info!(
                attempted,
                succeeded,
                failed,
                elapsed_secs = start.elapsed().as_secs(),
                "Collection heartbeat"
            );
        }
    })
}

fn outcome_label(capture: &RawCapture) -> String {
    match &capture.failure {
        None => "ok".to_string(),
        Some(e) => e.to_string(),
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} sessions {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}
