//! Stage orchestration.
//!
//! Each stage reads the previous stage's output, writes its own artifact and
//! advances the run manifest, so a run interrupted anywhere can be resumed
//! stage by stage from what is on disk.

use crate::config::{ProfileManager, Settings};
use crate::error::{PipelineError, PipelineResult};
use crate::merge::{DeviceDataset, Merger};
use crate::parser::{ParsedCapture, RecordParser, TemplateSet};
use crate::probe::{ProbeConfig, ReachabilityProber, ReachableHost};
use crate::render::DiagramRenderer;
use crate::safety::ExclusionList;
use crate::session::{CollectConfig, Connector, Credentials, RawCapture, SessionCollector};
use crate::storage::{ArtifactStore, RunManifest, Stage};
use crate::topology::{Inventory, TopologyGraph, TopologyNormalizer};
use crate::types::{expand_targets, TargetSpec};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-invocation switches that are not settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Treat every candidate as reachable on all management ports.
    pub skip_probe: bool,
    /// Draw progress bars.
    pub show_progress: bool,
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub manifest: RunManifest,
    pub graph: TopologyGraph,
    pub diagram: String,
    pub diagram_path: PathBuf,
}

/// Everything the stages share.
pub struct Pipeline {
    settings: Settings,
    exclusions: ExclusionList,
    store: ArtifactStore,
    profiles: ProfileManager,
    parser: RecordParser,
    inventory: Inventory,
    connectors: Vec<Arc<dyn Connector>>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        store: ArtifactStore,
        profiles: ProfileManager,
        templates: TemplateSet,
        inventory: Inventory,
    ) -> PipelineResult<Self> {
        let exclusions = ExclusionList::parse(&settings.exclude)?;
        Ok(Self {
            settings,
            exclusions,
            store,
            profiles,
            parser: RecordParser::new(templates),
            inventory,
            connectors: Vec::new(),
        })
    }

    /// Replace the transport for one protocol.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// All stages, start to finish.
    pub async fn run(
        &self,
        targets: &[TargetSpec],
        credentials: Credentials,
        options: RunOptions,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<RunReport> {
        let (mut manifest, candidates) = self.start(targets)?;
        let reachable = self.probe(&mut manifest, candidates, options).await?;
        let captures = self
            .collect(&mut manifest, reachable, credentials, options, cancel)
            .await?;
        let parsed = self.parse(&mut manifest, &captures)?;
        let datasets = self.merge(&mut manifest, &parsed)?;
        let graph = self.normalize(&mut manifest, &datasets)?;
        let (diagram, diagram_path) = self.render(&mut manifest, &graph)?;

        info!(
            run = %manifest.id.short(),
            nodes = manifest.counts.nodes,
            edges = manifest.counts.edges,
            "Run complete"
        );
        Ok(RunReport {
            manifest,
            graph,
            diagram,
            diagram_path,
        })
    }

    /// Create a run for the targets and expand them into candidate
    /// addresses, exclusions applied.
    pub fn start(&self, targets: &[TargetSpec]) -> PipelineResult<(RunManifest, Vec<IpAddr>)> {
        let mut candidates = expand_targets(targets);
        let dropped = self.exclusions.retain(&mut candidates, |ip| *ip);
        if candidates.is_empty() {
            return Err(PipelineError::NoTargets);
        }

        let recorded: Vec<String> = targets
            .iter()
            .map(TargetSpec::to_string)
            .filter(|t| !self.exclusions.excludes_identity(t))
            .collect();
        let mut manifest = RunManifest::new(recorded);
        manifest.counts.candidates = candidates.len();
        self.store.begin_run(&manifest)?;

        info!(
            run = %manifest.id.short(),
            candidates = candidates.len(),
            excluded = dropped,
            "Run started"
        );
        Ok((manifest, candidates))
    }

    pub async fn probe(
        &self,
        manifest: &mut RunManifest,
        candidates: Vec<IpAddr>,
        options: RunOptions,
    ) -> PipelineResult<Vec<ReachableHost>> {
        let mut reachable = if options.skip_probe {
            candidates
                .into_iter()
                .map(|ip| ReachableHost::assumed(ip, &self.settings.probe.ports))
                .collect()
        } else {
            let mut config = ProbeConfig::from_settings(&self.settings.probe);
            config.show_progress = options.show_progress;
            ReachabilityProber::new(config).probe(candidates).await
        };
        self.exclusions.retain(&mut reachable, |h| h.address);

        self.store.save_reachable(&manifest.id, &reachable)?;
        manifest.counts.reachable = reachable.len();
        manifest.advance(Stage::Probed);
        self.store.save_manifest(manifest)?;
        Ok(reachable)
    }

    pub async fn collect(
        &self,
        manifest: &mut RunManifest,
        mut hosts: Vec<ReachableHost>,
        credentials: Credentials,
        options: RunOptions,
        cancel: watch::Receiver<bool>,
    ) -> PipelineResult<Vec<RawCapture>> {
        self.exclusions.retain(&mut hosts, |h| h.address);

        let mut config = CollectConfig::from_settings(&self.settings, manifest.id, credentials)?;
        config.show_progress = options.show_progress;
        let sink = Arc::new(self.store.clone());
        let collector = self
            .connectors
            .iter()
            .fold(
                SessionCollector::new(config, self.profiles.clone(), sink)?,
                |collector, connector| collector.with_connector(Arc::clone(connector)),
            );

        let captures = collector.collect(hosts, cancel.clone()).await;

        manifest.counts.collected = captures.len();
        manifest.counts.sessions_failed = captures.iter().filter(|c| !c.succeeded()).count();
        manifest.cancelled = *cancel.borrow();
        if manifest.cancelled {
            warn!(run = %manifest.id.short(), "Collection cancelled");
        }
        manifest.advance(Stage::Collected);
        self.store.save_manifest(manifest)?;
        Ok(captures)
    }

    pub fn parse(
        &self,
        manifest: &mut RunManifest,
        captures: &[RawCapture],
    ) -> PipelineResult<Vec<ParsedCapture>> {
        let workers = self.settings.parse.effective_workers();
        let mut parsed = self.parser.parse_all(captures, workers)?;
        let scrubbed: usize = parsed
            .iter_mut()
            .map(|p| p.drop_excluded_rows(&self.exclusions))
            .sum();
        if scrubbed > 0 {
            debug!(scrubbed, "Rows naming excluded hosts dropped");
        }
        for capture in &parsed {
            self.store.save_parsed(capture)?;
        }

        manifest.counts.parsed_rows = parsed.iter().map(ParsedCapture::row_count).sum();
        manifest.counts.parse_diagnostics = parsed.iter().map(|p| p.diagnostics().count()).sum();
        manifest.advance(Stage::Parsed);
        self.store.save_manifest(manifest)?;
        Ok(parsed)
    }

    /// Fold this run's parsed captures into the stored datasets of the same
    /// devices and persist the result.
    pub fn merge(
        &self,
        manifest: &mut RunManifest,
        parsed: &[ParsedCapture],
    ) -> PipelineResult<Vec<DeviceDataset>> {
        let stored = self.datasets_for(parsed)?;
        let outcome = Merger::new(self.exclusions.clone()).merge(stored, parsed);
        for dataset in &outcome.datasets {
            self.store.save_dataset(dataset)?;
        }

        manifest.counts.datasets = outcome.datasets.len();
        manifest.counts.merge_ties = outcome.ties;
        manifest.advance(Stage::Merged);
        self.store.save_manifest(manifest)?;
        Ok(outcome.datasets)
    }

    /// Datasets of the devices a run touched, as currently stored.
    pub fn datasets_for(&self, parsed: &[ParsedCapture]) -> PipelineResult<Vec<DeviceDataset>> {
        let touched: BTreeSet<String> = parsed.iter().map(|p| p.address.to_string()).collect();
        Ok(self
            .store
            .load_datasets()?
            .into_iter()
            .filter(|d| touched.contains(&d.identity))
            .collect())
    }

    pub fn normalize(
        &self,
        manifest: &mut RunManifest,
        datasets: &[DeviceDataset],
    ) -> PipelineResult<TopologyGraph> {
        let normalizer = TopologyNormalizer::new(self.inventory.clone(), self.exclusions.clone());
        let graph = match normalizer.normalize(datasets) {
            Ok(graph) => graph,
            Err(e) => {
                manifest.error = Some(e.to_string());
                self.store.save_manifest(manifest)?;
                return Err(e.into());
            }
        };
        for warning in &graph.warnings {
            warn!(run = %manifest.id.short(), "{}", warning);
        }
        self.store.save_graph(&manifest.id, &graph)?;

        manifest.counts.nodes = graph.nodes.len();
        manifest.counts.edges = graph.edges.len();
        manifest.counts.warnings = graph.warnings.len();
        manifest.advance(Stage::Normalized);
        self.store.save_manifest(manifest)?;
        Ok(graph)
    }

    pub fn render(
        &self,
        manifest: &mut RunManifest,
        graph: &TopologyGraph,
    ) -> PipelineResult<(String, PathBuf)> {
        let renderer = DiagramRenderer::new(self.settings.render.clone());
        let diagram = match renderer.render(graph) {
            Ok(text) => text,
            Err(e) => {
                manifest.error = Some(e.to_string());
                self.store.save_manifest(manifest)?;
                return Err(e.into());
            }
        };
        let path = self.store.save_diagram(&manifest.id, &diagram)?;

        manifest.advance(Stage::Rendered);
        self.store.save_manifest(manifest)?;
        Ok((diagram, path))
    }
}
