//! End-to-end runs against scripted in-memory devices.

use async_trait::async_trait;
use netdocs::config::{ProfileManager, Settings};
use netdocs::error::SessionError;
use netdocs::parser::TemplateSet;
use netdocs::pipeline::{Pipeline, RunOptions};
use netdocs::safety::ExclusionList;
use netdocs::session::{CliTransport, Connector, Credentials, PendingLogin, Protocol};
use netdocs::storage::{ArtifactStore, Stage};
use netdocs::topology::Inventory;
use netdocs::types::{PortList, TargetSpec};
use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A shell that answers known commands and stalls on the rest.
struct ScriptedShell {
    hostname: String,
    replies: BTreeMap<String, String>,
    pending: VecDeque<Vec<u8>>,
}

#[async_trait]
impl CliTransport for ScriptedShell {
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let line = String::from_utf8_lossy(data).trim().to_string();
        if line.is_empty() {
            self.pending.push_back(format!("\r\n{}#", self.hostname).into_bytes());
        } else if let Some(reply) = self.replies.get(&line) {
            self.pending
                .push_back(format!("{}\r\n{}\r\n{}#", line, reply, self.hostname).into_bytes());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        match self.pending.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

#[derive(Clone)]
enum Device {
    RejectLogin,
    Shell {
        hostname: &'static str,
        replies: Vec<(&'static str, String)>,
    },
}

struct ScriptedLogin(Device);

#[async_trait]
impl PendingLogin for ScriptedLogin {
    async fn login(
        self: Box<Self>,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Box<dyn CliTransport>, SessionError> {
        match self.0 {
            Device::RejectLogin => Err(SessionError::AuthRejected),
            Device::Shell { hostname, replies } => Ok(Box::new(ScriptedShell {
                hostname: hostname.to_string(),
                replies: replies
                    .into_iter()
                    .map(|(c, r)| (c.to_string(), r))
                    .collect(),
                pending: VecDeque::from([format!("{}#", hostname).into_bytes()]),
            })),
        }
    }
}

/// SSH stand-in that knows a fixed set of devices and refuses the rest.
struct Lab {
    devices: BTreeMap<IpAddr, Device>,
}

#[async_trait]
impl Connector for Lab {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    async fn dial(
        &self,
        addr: SocketAddr,
        _timeout: Duration,
    ) -> Result<Box<dyn PendingLogin>, SessionError> {
        match self.devices.get(&addr.ip()) {
            Some(device) => Ok(Box::new(ScriptedLogin(device.clone()))),
            None => Err(SessionError::ConnectRefused),
        }
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn cisco(hostname: &'static str, neighbors: &[(&str, &str, &str, &str)]) -> Device {
    let version = format!(
        "Cisco IOS Software, C2960X Software (C2960X-UNIVERSALK9-M), Version 15.2(7)E2, RELEASE SOFTWARE\n{} uptime is 3 weeks",
        hostname
    );
    let lldp = if neighbors.is_empty() {
        "Total entries displayed: 0".to_string()
    } else {
        let blocks: Vec<String> = neighbors
            .iter()
            .map(|(local, name, mgmt, remote)| {
                format!(
                    "------------------------------------------------\nLocal Intf: {}\nChassis id: 0011.2233.4455\nPort id: {}\nSystem Name: {}\nManagement Addresses:\n    IP: {}\n",
                    local, remote, name, mgmt
                )
            })
            .collect();
        format!("{}\nTotal entries displayed: {}", blocks.join(""), neighbors.len())
    };
    Device::Shell {
        hostname,
        replies: vec![
            ("show version", version),
            ("terminal length 0", String::new()),
            ("show lldp neighbors detail", lldp),
        ],
    }
}

fn settings(exclude: &[&str]) -> Settings {
    let mut settings = Settings {
        exclude: exclude.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    settings.collect.command_timeout_ms = 500;
    settings.collect.auth_timeout_ms = 500;
    settings.collect.host_deadline_ms = 10_000;
    settings.collect.heartbeat_secs = 0;
    settings.collect.fallback = None;
    settings
}

fn pipeline(dir: &Path, settings: Settings, devices: Vec<(&str, Device)>) -> Pipeline {
    let store = ArtifactStore::open(dir, ExclusionList::parse(&settings.exclude).unwrap()).unwrap();
    let lab = Lab {
        devices: devices.into_iter().map(|(a, d)| (ip(a), d)).collect(),
    };
    Pipeline::new(
        settings,
        store,
        ProfileManager::builtin(),
        TemplateSet::builtin().unwrap(),
        Inventory::empty(),
    )
    .unwrap()
    .with_connector(Arc::new(lab))
}

fn targets(specs: &[&str]) -> Vec<TargetSpec> {
    specs.iter().map(|s| TargetSpec::parse(s).unwrap()).collect()
}

fn skip_probe() -> RunOptions {
    RunOptions {
        skip_probe: true,
        show_progress: false,
    }
}

fn credentials() -> Credentials {
    Credentials::new("netops", "pw")
}

/// Every file under `dir`, with its contents.
fn persisted(dir: &Path) -> Vec<(String, String)> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(path) = stack.pop() {
        for entry in std::fs::read_dir(&path).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let text = std::fs::read_to_string(&path).unwrap_or_default();
                files.push((path.display().to_string(), text));
            }
        }
    }
    files
}

#[tokio::test]
async fn test_no_reachable_hosts_is_empty_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(&[]);
    settings.probe.ports = "1".parse::<PortList>().unwrap();
    settings.probe.timeout_ms = 300;
    let pipeline = pipeline(dir.path(), settings, Vec::new());
    let (_tx, cancel) = watch::channel(false);

    let report = pipeline
        .run(&targets(&["127.0.0.1"]), credentials(), RunOptions::default(), cancel)
        .await
        .unwrap();

    assert_eq!(report.manifest.counts.reachable, 0);
    assert_eq!(report.manifest.stage, Stage::Rendered);
    assert!(report.graph.is_empty());
    assert!(report.diagram.starts_with("%%{init:"));
    assert!(!report.diagram.contains("subgraph"));
    assert!(report.diagram_path.exists());
}

#[tokio::test]
async fn test_auth_failure_yields_minimal_node() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        settings(&[]),
        vec![("10.0.0.1", Device::RejectLogin)],
    );
    let (_tx, cancel) = watch::channel(false);

    let report = pipeline
        .run(&targets(&["10.0.0.1"]), credentials(), skip_probe(), cancel)
        .await
        .unwrap();

    assert_eq!(report.manifest.counts.sessions_failed, 1);
    assert_eq!(report.graph.nodes.len(), 1);
    assert!(report.graph.edges.is_empty());
    let node = &report.graph.nodes[0];
    assert_eq!(node.id, "10.0.0.1");
    assert_eq!(node.session_failure, Some(SessionError::AuthRejected));

    let datasets = pipeline.store().load_datasets().unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0].last_failure, Some(SessionError::AuthRejected));
    assert!(report.diagram.contains("not collected"));
}

#[tokio::test]
async fn test_mutual_neighbors_make_one_edge() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        settings(&[]),
        vec![
            ("10.0.0.1", cisco("sw-a", &[("Gi1/0/1", "sw-b", "10.0.0.2", "Gi1/0/2")])),
            ("10.0.0.2", cisco("sw-b", &[("Gi1/0/2", "sw-a", "10.0.0.1", "Gi1/0/1")])),
        ],
    );
    let (_tx, cancel) = watch::channel(false);

    let report = pipeline
        .run(&targets(&["10.0.0.0/30"]), credentials(), skip_probe(), cancel)
        .await
        .unwrap();

    assert_eq!(report.manifest.counts.sessions_failed, 0);
    let ids: Vec<&str> = report.graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["sw-a", "sw-b"]);
    assert_eq!(report.graph.edges.len(), 1);
    let edge = &report.graph.edges[0];
    assert_eq!(edge.a, "sw-a");
    assert_eq!(edge.a_interface.as_deref(), Some("Gi1/0/1"));
    assert_eq!(edge.b, "sw-b");
    assert_eq!(edge.b_interface.as_deref(), Some("Gi1/0/2"));
    assert!(report.diagram.contains("Gi1/0/1 | Gi1/0/2"));

    let stored = pipeline.store().load_graph(&report.manifest.id).unwrap();
    assert_eq!(stored, report.graph);
}

#[tokio::test]
async fn test_excluded_host_is_never_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        settings(&["10.0.0.2"]),
        vec![
            ("10.0.0.1", cisco("sw-a", &[("Gi1/0/1", "sw-b", "10.0.0.2", "Gi1/0/2")])),
            ("10.0.0.2", cisco("sw-b", &[("Gi1/0/2", "sw-a", "10.0.0.1", "Gi1/0/1")])),
        ],
    );
    let (_tx, cancel) = watch::channel(false);

    let report = pipeline
        .run(&targets(&["10.0.0.0/30"]), credentials(), skip_probe(), cancel)
        .await
        .unwrap();

    assert_eq!(report.manifest.counts.reachable, 1);
    assert_eq!(report.graph.nodes.len(), 1);
    assert!(report.graph.edges.is_empty());
    assert!(!report.diagram.contains("sw-b"));

    let files = persisted(dir.path());
    assert!(files.iter().any(|(path, _)| path.contains("captures")));
    assert!(files.iter().any(|(path, _)| path.contains("parsed")));
    for (path, text) in files {
        assert!(!path.contains("10.0.0.2"), "file for excluded host: {}", path);
        assert!(!text.contains("10.0.0.2"), "{} mentions excluded host", path);
        assert!(!text.contains("sw-b"), "{} mentions excluded host", path);
    }
}

#[tokio::test]
async fn test_stages_resume_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        settings(&[]),
        vec![("10.0.0.1", cisco("sw-a", &[]))],
    );
    let (_tx, cancel) = watch::channel(false);

    let (mut manifest, candidates) = pipeline.start(&targets(&["10.0.0.1"])).unwrap();
    pipeline.probe(&mut manifest, candidates, skip_probe()).await.unwrap();

    let store = pipeline.store();
    let hosts = store.load_reachable(&manifest.id).unwrap();
    pipeline
        .collect(&mut manifest, hosts, credentials(), skip_probe(), cancel)
        .await
        .unwrap();
    let captures = store.load_captures(&manifest.id).unwrap();
    assert_eq!(captures.len(), 1);

    pipeline.parse(&mut manifest, &captures).unwrap();
    let parsed = store.load_parsed(&manifest.id).unwrap();
    pipeline.merge(&mut manifest, &parsed).unwrap();
    let datasets = pipeline.datasets_for(&parsed).unwrap();
    let graph = pipeline.normalize(&mut manifest, &datasets).unwrap();
    let (diagram, _) = pipeline.render(&mut manifest, &graph).unwrap();

    let reloaded = store.find_by_prefix(&manifest.id.short()).unwrap();
    assert_eq!(reloaded.stage, Stage::Rendered);
    assert_eq!(graph.nodes[0].os_version.as_deref(), Some("15.2(7)E2"));
    assert!(diagram.contains("sw-a"));
}
