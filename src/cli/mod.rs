//! CLI subcommand definitions and handlers.
//!
//! Implements a git-like subcommand architecture:
//! - `netdocs run <targets>` - All stages, probe to diagram
//! - `netdocs probe|collect|parse|merge|normalize|render` - One stage
//! - `netdocs profiles list|show` - Inspect command profiles
//! - `netdocs templates list` - Inspect parse templates
//! - `netdocs history` - View past runs

mod args;
mod history;
mod profiles;
mod stages;
mod templates;

pub use args::{CredentialArgs, RenderArgs, TuningArgs};
pub use history::HistoryCommand;
pub use profiles::ProfilesCommand;
pub use stages::{
    CollectCommand, MergeCommand, NormalizeCommand, ParseCommand, ProbeCommand, RenderCommand,
    RunCommand,
};
pub use templates::TemplatesCommand;

use crate::config::{Paths, ProfileManager, Settings};
use crate::error::{CliError, CliResult};
use crate::parser::TemplateSet;
use crate::pipeline::Pipeline;
use crate::safety::ExclusionList;
use crate::storage::ArtifactStore;
use crate::topology::Inventory;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;

/// netdocs - network discovery and topology documentation.
///
/// Finds reachable devices, reads their state over SSH or Telnet, parses
/// the output with data-driven templates and renders the topology as a
/// Mermaid flowchart. Every stage saves its output so it can be re-run on
/// its own.
#[derive(Parser, Debug)]
#[command(name = "netdocs")]
#[command(author = "HueCodes <huecodes@proton.me>")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Network discovery and topology diagrams", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for run artifacts and datasets
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every stage against the given targets
    #[command(alias = "r")]
    Run(RunCommand),

    /// Probe targets for open management ports (starts a new run)
    Probe(ProbeCommand),

    /// Collect CLI output from a run's reachable hosts
    Collect(CollectCommand),

    /// Parse a run's captures
    Parse(ParseCommand),

    /// Merge a run's parsed records into the device datasets
    Merge(MergeCommand),

    /// Build the topology graph for a run
    Normalize(NormalizeCommand),

    /// Render a run's topology graph as Mermaid
    Render(RenderCommand),

    /// Inspect command profiles
    #[command(alias = "p")]
    Profiles(ProfilesCommand),

    /// Inspect parse templates
    Templates(TemplatesCommand),

    /// View run history
    #[command(alias = "h")]
    History(HistoryCommand),
}

impl Cli {
    /// Dispatch the selected subcommand.
    pub async fn execute(&self) -> CliResult<()> {
        let ctx = Context::load(self)?;
        match &self.command {
            Commands::Run(cmd) => cmd.execute(&ctx).await,
            Commands::Probe(cmd) => cmd.execute(&ctx).await,
            Commands::Collect(cmd) => cmd.execute(&ctx).await,
            Commands::Parse(cmd) => cmd.execute(&ctx),
            Commands::Merge(cmd) => cmd.execute(&ctx),
            Commands::Normalize(cmd) => cmd.execute(&ctx),
            Commands::Render(cmd) => cmd.execute(&ctx),
            Commands::Profiles(cmd) => cmd.execute(&ctx),
            Commands::Templates(cmd) => cmd.execute(&ctx),
            Commands::History(cmd) => cmd.execute(&ctx),
        }
    }
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable plain text
    #[default]
    Plain,
    /// JSON structured output
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Resolved paths and settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: Paths,
    pub settings: Settings,
    pub verbose: bool,
    pub quiet: bool,
}

impl Context {
    pub fn load(cli: &Cli) -> CliResult<Self> {
        let mut paths = Paths::discover()?;
        if let Some(dir) = &cli.data_dir {
            paths = paths.with_data_dir(dir)?;
        }
        let settings = match &cli.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::load(&paths)?,
        };
        Ok(Self {
            paths,
            settings,
            verbose: cli.verbose,
            quiet: cli.quiet,
        })
    }

    /// Whether progress bars should be drawn.
    pub fn show_progress(&self) -> bool {
        !self.quiet && console::Term::stderr().is_term()
    }

    pub fn store(&self, settings: &Settings) -> CliResult<ArtifactStore> {
        let exclusions = ExclusionList::parse(&settings.exclude)?;
        Ok(ArtifactStore::open(&self.paths.data_dir, exclusions)?)
    }

    pub fn templates(&self, settings: &Settings) -> CliResult<TemplateSet> {
        Ok(TemplateSet::load(settings.templates_dir.as_deref())?)
    }

    /// A pipeline over the given (possibly flag-adjusted) settings.
    pub fn pipeline(&self, settings: Settings) -> CliResult<Pipeline> {
        settings.validate()?;
        let store = self.store(&settings)?;
        let profiles = ProfileManager::load(&self.paths)?;
        let templates = self.templates(&settings)?;
        let inventory = Inventory::load(&settings.inventory_path(&self.paths))?;
        Ok(Pipeline::new(settings, store, profiles, templates, inventory)?)
    }
}

/// Cancellation flag flipped by Ctrl-C. Dropping the guard stops listening.
pub(crate) struct CtrlC {
    pub receiver: watch::Receiver<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl CtrlC {
    pub fn install() -> Self {
        let (tx, receiver) = watch::channel(false);
        let task = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                crate::output::print_warning(
                    "Cancellation requested (Ctrl+C). Finishing in-flight hosts as cancelled...",
                );
                let _ = tx.send(true);
            }
        });
        Self { receiver, task }
    }
}

impl Drop for CtrlC {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Look up a run by id prefix.
pub(crate) fn find_run(
    store: &ArtifactStore,
    prefix: &str,
) -> CliResult<crate::storage::RunManifest> {
    store.find_by_prefix(prefix.trim()).map_err(CliError::from)
}
