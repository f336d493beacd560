//! JSON artifact store.
//!
//! Every stage output is one JSON (or Mermaid) file under the data
//! directory, written atomically through a temp file and rename:
//!
//! ```text
//! runs/<run-id>/run.json
//! runs/<run-id>/reachable.json
//! runs/<run-id>/captures/<addr>.json
//! runs/<run-id>/parsed/<addr>.json
//! runs/<run-id>/graph.json
//! runs/<run-id>/network.mmd
//! datasets/<identity>.json
//! ```
//!
//! The store holds the exclusion list and refuses to write anything that
//! names an excluded address: files for excluded hosts are skipped, and
//! captures and parsed rows are scrubbed of references to them.

use super::manifest::RunManifest;
use crate::error::{StorageError, StorageResult};
use crate::merge::DeviceDataset;
use crate::parser::ParsedCapture;
use crate::probe::ReachableHost;
use crate::safety::ExclusionList;
use crate::session::{CaptureSink, RawCapture};
use crate::topology::TopologyGraph;
use crate::types::RunId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "run.json";
const REACHABLE_FILE: &str = "reachable.json";
const GRAPH_FILE: &str = "graph.json";
const DIAGRAM_FILE: &str = "network.mmd";

/// File-backed store for every pipeline artifact.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    exclusions: ExclusionList,
}

impl ArtifactStore {
    /// Open (and create) a store rooted at the data directory.
    pub fn open(root: &Path, exclusions: ExclusionList) -> StorageResult<Self> {
        for dir in [root.join("runs"), root.join("datasets")] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::DirectoryError(e.to_string()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            exclusions,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, id: &RunId) -> PathBuf {
        self.root.join("runs").join(id.to_string())
    }

    fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    /// Create a run's directories and write its first manifest.
    pub fn begin_run(&self, manifest: &RunManifest) -> StorageResult<()> {
        let dir = self.run_dir(&manifest.id);
        for sub in [dir.join("captures"), dir.join("parsed")] {
            fs::create_dir_all(&sub).map_err(|e| StorageError::DirectoryError(e.to_string()))?;
        }
        self.save_manifest(manifest)
    }

    pub fn save_manifest(&self, manifest: &RunManifest) -> StorageResult<()> {
        write_json(&self.run_dir(&manifest.id).join(MANIFEST_FILE), manifest)
    }

    pub fn load_manifest(&self, id: &RunId) -> StorageResult<RunManifest> {
        let path = self.run_dir(id).join(MANIFEST_FILE);
        if !path.exists() {
            return Err(StorageError::RunNotFound(id.to_string()));
        }
        read_json(&path)
    }

    /// Find a run by full id or unique prefix.
    pub fn find_by_prefix(&self, prefix: &str) -> StorageResult<RunManifest> {
        let matches: Vec<RunId> = self
            .list_ids()?
            .into_iter()
            .filter(|id| id.to_string().starts_with(prefix))
            .collect();

        match matches.as_slice() {
            [] => Err(StorageError::RunNotFound(prefix.to_string())),
            [id] => self.load_manifest(id),
            _ => Err(StorageError::LoadFailed {
                path: self.root.join("runs"),
                reason: format!("ambiguous prefix '{}': {} matches", prefix, matches.len()),
            }),
        }
    }

    pub fn list_ids(&self) -> StorageResult<Vec<RunId>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(self.root.join("runs"))
            .map_err(|e| StorageError::DirectoryError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::DirectoryError(e.to_string()))?;
            if let Ok(id) = entry.file_name().to_string_lossy().parse::<RunId>() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// All runs, most recent first. Runs with unreadable manifests are
    /// skipped.
    pub fn history(&self) -> StorageResult<Vec<RunManifest>> {
        let mut runs: Vec<RunManifest> = self
            .list_ids()?
            .iter()
            .filter_map(|id| match self.load_manifest(id) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!(run = %id, error = %e, "Skipping unreadable run");
                    None
                }
            })
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    pub fn save_reachable(&self, run: &RunId, hosts: &[ReachableHost]) -> StorageResult<()> {
        let kept: Vec<&ReachableHost> = hosts
            .iter()
            .filter(|h| !self.exclusions.is_excluded(h.address))
            .collect();
        write_json(&self.run_dir(run).join(REACHABLE_FILE), &kept)
    }

    pub fn load_reachable(&self, run: &RunId) -> StorageResult<Vec<ReachableHost>> {
        let mut hosts: Vec<ReachableHost> = read_json(&self.run_dir(run).join(REACHABLE_FILE))?;
        self.exclusions.retain(&mut hosts, |h| h.address);
        Ok(hosts)
    }

    /// Write one capture with excluded hosts redacted from its text.
    /// Returns `false` when the address itself is excluded.
    pub fn save_capture(&self, capture: &RawCapture) -> StorageResult<bool> {
        if self.exclusions.is_excluded(capture.address) {
            return Ok(false);
        }
        let mut capture = capture.clone();
        let redacted = capture.redact(&self.exclusions);
        if redacted > 0 {
            debug!(address = %capture.address, redacted, "Excluded hosts redacted from capture");
        }
        let path = self
            .run_dir(&capture.run_id)
            .join("captures")
            .join(address_file(capture.address));
        write_json(&path, &capture)?;
        Ok(true)
    }

    pub fn load_captures(&self, run: &RunId) -> StorageResult<Vec<RawCapture>> {
        let mut captures: Vec<RawCapture> = self.load_dir(&self.run_dir(run).join("captures"))?;
        self.exclusions.retain(&mut captures, |c| c.address);
        captures.sort_by_key(|c| c.address);
        Ok(captures)
    }

    pub fn save_parsed(&self, parsed: &ParsedCapture) -> StorageResult<bool> {
        if self.exclusions.is_excluded(parsed.address) {
            return Ok(false);
        }
        let mut parsed = parsed.clone();
        parsed.drop_excluded_rows(&self.exclusions);
        let path = self
            .run_dir(&parsed.run_id)
            .join("parsed")
            .join(address_file(parsed.address));
        write_json(&path, &parsed)?;
        Ok(true)
    }

    pub fn load_parsed(&self, run: &RunId) -> StorageResult<Vec<ParsedCapture>> {
        let mut parsed: Vec<ParsedCapture> = self.load_dir(&self.run_dir(run).join("parsed"))?;
        self.exclusions.retain(&mut parsed, |p| p.address);
        parsed.sort_by_key(|p| p.address);
        Ok(parsed)
    }

    pub fn save_dataset(&self, dataset: &DeviceDataset) -> StorageResult<bool> {
        if self.exclusions.excludes_identity(&dataset.identity)
            || dataset.addresses.iter().any(|ip| self.exclusions.is_excluded(*ip))
        {
            return Ok(false);
        }
        let path = self
            .datasets_dir()
            .join(format!("{}.json", file_stem(&dataset.identity)));
        write_json(&path, dataset)?;
        Ok(true)
    }

    /// Every stored dataset, sorted by identity.
    pub fn load_datasets(&self) -> StorageResult<Vec<DeviceDataset>> {
        let mut datasets: Vec<DeviceDataset> = self.load_dir(&self.datasets_dir())?;
        datasets.retain(|d| !self.exclusions.excludes_identity(&d.identity));
        datasets.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(datasets)
    }

    pub fn save_graph(&self, run: &RunId, graph: &TopologyGraph) -> StorageResult<()> {
        write_json(&self.run_dir(run).join(GRAPH_FILE), graph)
    }

    pub fn load_graph(&self, run: &RunId) -> StorageResult<TopologyGraph> {
        read_json(&self.run_dir(run).join(GRAPH_FILE))
    }

    pub fn diagram_path(&self, run: &RunId) -> PathBuf {
        self.run_dir(run).join(DIAGRAM_FILE)
    }

    pub fn save_diagram(&self, run: &RunId, text: &str) -> StorageResult<PathBuf> {
        let path = self.diagram_path(run);
        write_atomic(&path, text.as_bytes())?;
        Ok(path)
    }

    fn load_dir<T: DeserializeOwned>(&self, dir: &Path) -> StorageResult<Vec<T>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StorageError::DirectoryError(e.to_string()))? {
            let path = entry
                .map_err(|e| StorageError::DirectoryError(e.to_string()))?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        paths.iter().map(|p| read_json(p)).collect()
    }
}

impl CaptureSink for ArtifactStore {
    fn persist(&self, capture: &RawCapture) -> StorageResult<bool> {
        let written = self.save_capture(capture)?;
        if written {
            debug!(address = %capture.address, "Capture persisted");
        }
        Ok(written)
    }
}

fn address_file(ip: IpAddr) -> String {
    format!("{}.json", file_stem(&ip.to_string()))
}

/// Filesystem-safe stem; IPv6 colons become underscores.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &content)
}

fn write_atomic(path: &Path, content: &[u8]) -> StorageResult<()> {
    let save_failed = |e: std::io::Error| StorageError::SaveFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(save_failed)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).map_err(save_failed)?;
    fs::rename(&tmp, path).map_err(save_failed)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<T> {
    if !path.exists() {
        return Err(StorageError::ArtifactNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|e| StorageError::LoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| StorageError::LoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{HostProgress, Protocol};

    fn store(dir: &Path, exclude: &[&str]) -> ArtifactStore {
        ArtifactStore::open(dir, ExclusionList::parse(exclude).unwrap()).unwrap()
    }

    fn capture(run: RunId, ip: &str) -> RawCapture {
        let mut progress = HostProgress::new(ip.parse().unwrap(), run);
        progress.dialing(Protocol::Ssh);
        progress.authenticated();
        progress.begin_command("show version");
        progress.command_completed("show version", "sw1 uptime is 2 days".to_string());
        progress.done();
        progress.finish()
    }

    #[test]
    fn test_run_lifecycle_and_prefix_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &[]);
        let manifest = RunManifest::new(vec!["10.0.0.0/30".to_string()]);
        store.begin_run(&manifest).unwrap();

        let found = store.find_by_prefix(&manifest.id.short()).unwrap();
        assert_eq!(found.id, manifest.id);
        assert!(matches!(
            store.find_by_prefix("zzzz"),
            Err(StorageError::RunNotFound(_))
        ));
        assert_eq!(store.history().unwrap().len(), 1);
    }

    #[test]
    fn test_capture_roundtrip_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &[]);
        let manifest = RunManifest::new(Vec::new());
        store.begin_run(&manifest).unwrap();

        assert!(store.persist(&capture(manifest.id, "10.0.0.9")).unwrap());
        assert!(store.persist(&capture(manifest.id, "10.0.0.2")).unwrap());
        let loaded = store.load_captures(&manifest.id).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].address.to_string(), "10.0.0.2");
        assert_eq!(loaded[1].commands[0].output, "sw1 uptime is 2 days");
    }

    #[test]
    fn test_excluded_capture_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &["10.0.0.9"]);
        let manifest = RunManifest::new(Vec::new());
        store.begin_run(&manifest).unwrap();

        assert!(!store.persist(&capture(manifest.id, "10.0.0.9")).unwrap());
        let files: Vec<_> = fs::read_dir(store.run_dir(&manifest.id).join("captures"))
            .unwrap()
            .collect();
        assert!(files.is_empty());
    }

    #[test]
    fn test_capture_text_redacted_for_excluded_neighbor() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &["10.0.0.2"]);
        let manifest = RunManifest::new(Vec::new());
        store.begin_run(&manifest).unwrap();

        let mut raw = capture(manifest.id, "10.0.0.1");
        raw.commands[0].command = "show lldp neighbors detail".to_string();
        raw.commands[0].output =
            "--------\nSystem Name: sw-b\n    IP: 10.0.0.2\n--------\nSystem Name: sw-c\n    IP: 10.0.0.3"
                .to_string();
        raw.diagnostics.push("enable refused by 10.0.0.2".to_string());
        assert!(store.persist(&raw).unwrap());

        let path = store
            .run_dir(&manifest.id)
            .join("captures")
            .join("10.0.0.1.json");
        let text = fs::read_to_string(path).unwrap();
        assert!(!text.contains("10.0.0.2"));
        assert!(!text.contains("sw-b"));
        assert!(text.contains("sw-c"));
    }

    #[test]
    fn test_ipv6_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &[]);
        let manifest = RunManifest::new(Vec::new());
        store.begin_run(&manifest).unwrap();
        assert!(store.persist(&capture(manifest.id, "2001:db8::1")).unwrap());
        assert!(store
            .run_dir(&manifest.id)
            .join("captures")
            .join("2001_db8__1.json")
            .exists());
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &[]);
        assert!(matches!(
            store.load_graph(&RunId::new()),
            Err(StorageError::ArtifactNotFound(_))
        ));
        assert!(store.load_datasets().unwrap().is_empty());
    }

    #[test]
    fn test_no_temp_files_left() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), &[]);
        let run = RunId::new();
        store.save_diagram(&run, "flowchart LR\n").unwrap();
        let names: Vec<String> = fs::read_dir(store.run_dir(&run))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["network.mmd".to_string()]);
    }
}
