//! History subcommand implementation.
//!
//! Handles `netdocs history` for listing past runs and showing one in full.

use super::{find_run, Context, OutputFormat};
use crate::error::CliResult;
use crate::output;
use clap::Parser;

/// View run history.
#[derive(Parser, Debug)]
pub struct HistoryCommand {
    /// Show this run (ID or unique prefix) instead of the list
    #[arg(value_name = "RUN")]
    pub run: Option<String>,

    /// Number of runs to list
    #[arg(short = 'n', long, default_value = "20")]
    pub count: usize,

    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,
}

impl HistoryCommand {
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let store = ctx.store(&ctx.settings)?;

        if let Some(prefix) = &self.run {
            let manifest = find_run(&store, prefix)?;
            let graph = store.load_graph(&manifest.id).ok();
            output::format_run(&manifest, graph.as_ref(), self.output)?;
            return Ok(());
        }

        let mut runs = store.history()?;
        runs.truncate(self.count);
        match self.output {
            OutputFormat::Plain => output::print_history(&runs)?,
            OutputFormat::Json => output::print_json(&runs)?,
        }
        Ok(())
    }
}
