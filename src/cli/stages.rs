//! Stage subcommands.
//!
//! `run` drives every stage in one go. The single-stage commands pick up an
//! existing run by id prefix and re-run one stage from what the previous
//! stage left on disk.

use super::{find_run, Context, CredentialArgs, CtrlC, OutputFormat, RenderArgs, TuningArgs};
use crate::config::Settings;
use crate::error::{CliError, CliResult};
use crate::output;
use crate::pipeline::{Pipeline, RunOptions};
use crate::storage::RunManifest;
use crate::topology::TopologyGraph;
use crate::types::TargetSpec;
use clap::Parser;
use std::path::Path;

/// Run every stage against the given targets.
#[derive(Parser, Debug)]
pub struct RunCommand {
    /// Targets: single addresses or CIDR blocks (e.g. 10.0.0.0/24)
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<String>,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(flatten)]
    pub render: RenderArgs,

    /// Output format for the run summary
    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,

    /// Also print the diagram to stdout
    #[arg(long)]
    pub stdout: bool,
}

impl RunCommand {
    pub async fn execute(&self, ctx: &Context) -> CliResult<()> {
        let settings = self.render.apply(self.tuning.apply(ctx.settings.clone())?);
        let targets = parse_targets(&self.targets)?;
        let credentials = self.credentials.credentials()?;
        let pipeline = ctx.pipeline(settings)?;

        let options = RunOptions {
            skip_probe: self.tuning.no_probe,
            show_progress: ctx.show_progress(),
        };
        let ctrl_c = CtrlC::install();
        let report = pipeline
            .run(&targets, credentials, options, ctrl_c.receiver.clone())
            .await?;

        if self.stdout {
            print!("{}", report.diagram);
        }
        output::format_run(&report.manifest, Some(&report.graph), self.output)?;
        if !ctx.quiet && self.output == OutputFormat::Plain {
            saved(&report.manifest, Some(&report.diagram_path));
        }
        Ok(())
    }
}

/// Probe targets and start a new run.
#[derive(Parser, Debug)]
pub struct ProbeCommand {
    /// Targets: single addresses or CIDR blocks
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<String>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl ProbeCommand {
    pub async fn execute(&self, ctx: &Context) -> CliResult<()> {
        let settings = self.tuning.apply(ctx.settings.clone())?;
        let targets = parse_targets(&self.targets)?;
        let pipeline = ctx.pipeline(settings)?;

        let options = RunOptions {
            skip_probe: self.tuning.no_probe,
            show_progress: ctx.show_progress(),
        };
        let (mut manifest, candidates) = pipeline.start(&targets)?;
        pipeline.probe(&mut manifest, candidates, options).await?;

        finish(ctx, &manifest, None, self.output)
    }
}

/// Collect CLI output from the reachable hosts of a run.
#[derive(Parser, Debug)]
pub struct CollectCommand {
    /// Run ID or unique prefix
    #[arg(value_name = "RUN")]
    pub run: String,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl CollectCommand {
    pub async fn execute(&self, ctx: &Context) -> CliResult<()> {
        let settings = self.tuning.apply(ctx.settings.clone())?;
        let credentials = self.credentials.credentials()?;
        let pipeline = ctx.pipeline(settings)?;
        let mut manifest = find_run(pipeline.store(), &self.run)?;

        let hosts = pipeline.store().load_reachable(&manifest.id)?;
        let options = RunOptions {
            skip_probe: false,
            show_progress: ctx.show_progress(),
        };
        let ctrl_c = CtrlC::install();
        pipeline
            .collect(&mut manifest, hosts, credentials, options, ctrl_c.receiver.clone())
            .await?;

        finish(ctx, &manifest, None, self.output)
    }
}

/// Parse the captures of a run.
#[derive(Parser, Debug)]
pub struct ParseCommand {
    /// Run ID or unique prefix
    #[arg(value_name = "RUN")]
    pub run: String,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl ParseCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let (pipeline, mut manifest) = open_run(ctx, self.tuning.apply(ctx.settings.clone())?, &self.run)?;
        let captures = pipeline.store().load_captures(&manifest.id)?;
        pipeline.parse(&mut manifest, &captures)?;
        finish(ctx, &manifest, None, self.output)
    }
}

/// Merge the parsed records of a run into the device datasets.
#[derive(Parser, Debug)]
pub struct MergeCommand {
    /// Run ID or unique prefix
    #[arg(value_name = "RUN")]
    pub run: String,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl MergeCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let (pipeline, mut manifest) = open_run(ctx, self.tuning.apply(ctx.settings.clone())?, &self.run)?;
        let parsed = pipeline.store().load_parsed(&manifest.id)?;
        pipeline.merge(&mut manifest, &parsed)?;
        finish(ctx, &manifest, None, self.output)
    }
}

/// Build the topology graph of a run from the stored datasets.
#[derive(Parser, Debug)]
pub struct NormalizeCommand {
    /// Run ID or unique prefix
    #[arg(value_name = "RUN")]
    pub run: String,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl NormalizeCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let (pipeline, mut manifest) = open_run(ctx, self.tuning.apply(ctx.settings.clone())?, &self.run)?;
        let parsed = pipeline.store().load_parsed(&manifest.id)?;
        let datasets = pipeline.datasets_for(&parsed)?;
        let graph = pipeline.normalize(&mut manifest, &datasets)?;
        finish(ctx, &manifest, Some(&graph), self.output)
    }
}

/// Render the topology graph of a run as Mermaid.
#[derive(Parser, Debug)]
pub struct RenderCommand {
    /// Run ID or unique prefix
    #[arg(value_name = "RUN")]
    pub run: String,

    #[command(flatten)]
    pub render: RenderArgs,

    /// Print the diagram to stdout instead of the summary
    #[arg(long)]
    pub stdout: bool,
}

impl RenderCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let (pipeline, mut manifest) = open_run(ctx, self.render.apply(ctx.settings.clone()), &self.run)?;
        let graph = pipeline.store().load_graph(&manifest.id)?;
        let (diagram, path) = pipeline.render(&mut manifest, &graph)?;

        if self.stdout {
            print!("{}", diagram);
            return Ok(());
        }
        if !ctx.quiet {
            saved(&manifest, Some(&path));
        }
        Ok(())
    }
}

fn parse_targets(raw: &[String]) -> CliResult<Vec<TargetSpec>> {
    raw.iter()
        .map(|t| TargetSpec::parse(t).map_err(CliError::from))
        .collect()
}

fn open_run(ctx: &Context, settings: Settings, prefix: &str) -> CliResult<(Pipeline, RunManifest)> {
    let pipeline = ctx.pipeline(settings)?;
    let manifest = find_run(pipeline.store(), prefix)?;
    Ok((pipeline, manifest))
}

fn finish(
    ctx: &Context,
    manifest: &RunManifest,
    graph: Option<&TopologyGraph>,
    format: OutputFormat,
) -> CliResult<()> {
    output::format_run(manifest, graph, format)?;
    if !ctx.quiet && format == OutputFormat::Plain {
        saved(manifest, None);
    }
    Ok(())
}

fn saved(manifest: &RunManifest, diagram: Option<&Path>) {
    output::print_info(&format!(
        "Run {} saved at stage {}",
        manifest.id.short(),
        manifest.stage
    ));
    if let Some(path) = diagram {
        output::print_success(&format!("Diagram written to {}", path.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};

    #[test]
    fn test_parse_targets() {
        let targets = parse_targets(&["10.0.0.0/30".to_string(), "192.0.2.7".to_string()]).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(parse_targets(&["10.0.0.0/33".to_string()]).is_err());
    }

    #[test]
    fn test_run_command_flags() {
        let cli = Cli::try_parse_from([
            "netdocs", "run", "10.0.0.0/24", "-u", "netops", "--password", "pw", "-w", "8",
            "-x", "10.0.0.9", "--direction", "td", "--stdout",
        ])
        .unwrap();
        let Commands::Run(cmd) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(cmd.targets, vec!["10.0.0.0/24"]);
        assert_eq!(cmd.tuning.workers, Some(8));
        assert_eq!(cmd.tuning.exclude, vec!["10.0.0.9"]);
        assert!(cmd.stdout);
    }

    #[test]
    fn test_stage_commands_take_run_prefix() {
        let cli = Cli::try_parse_from(["netdocs", "render", "a1b2", "--labels", "brief"]).unwrap();
        let Commands::Render(cmd) = cli.command else {
            panic!("expected render");
        };
        assert_eq!(cmd.run, "a1b2");
        assert!(Cli::try_parse_from(["netdocs", "run"]).is_err());
    }
}
