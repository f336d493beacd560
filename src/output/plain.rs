//! Plain text output formatting.
//!
//! Produces human-readable output with colors and formatting.

use crate::storage::{RunManifest, Stage};
use crate::topology::TopologyGraph;
use console::{style, Style};
use std::io::{self, Write};

const RULE: &str = "═══════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────";

/// Print the summary of one run.
pub fn print_run_summary(manifest: &RunManifest, graph: Option<&TopologyGraph>) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let counts = &manifest.counts;

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out, "                    {} Run Summary", style("netdocs").cyan().bold())?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;

    writeln!(out, "  {} {}", style("Run ID:").bold(), style(manifest.id.short()).dim())?;
    writeln!(out, "  {} {}", style("Targets:").bold(), manifest.targets.join(", "))?;
    writeln!(out, "  {} {}", style("Stage:").bold(), stage_style(manifest.stage).apply_to(manifest.stage))?;
    if manifest.cancelled {
        writeln!(out, "  {}", style("Collection was cancelled").yellow())?;
    }
    if let Some(error) = &manifest.error {
        writeln!(out, "  {} {}", style("Error:").red().bold(), error)?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "  {} {} candidates, {} reachable",
        style("Probe:").bold(),
        counts.candidates,
        style(counts.reachable).green().bold()
    )?;
    writeln!(
        out,
        "  {} {} sessions, {} failed",
        style("Collect:").bold(),
        counts.collected,
        failed_style(counts.sessions_failed).apply_to(counts.sessions_failed)
    )?;
    writeln!(
        out,
        "  {} {} rows, {} diagnostics",
        style("Parse:").bold(),
        counts.parsed_rows,
        style(counts.parse_diagnostics).dim()
    )?;
    writeln!(
        out,
        "  {} {} devices, {} merge ties",
        style("Merge:").bold(),
        counts.datasets,
        counts.merge_ties
    )?;
    writeln!(
        out,
        "  {} {} nodes, {} edges, {} warnings",
        style("Topology:").bold(),
        style(counts.nodes).green().bold(),
        style(counts.edges).green().bold(),
        counts.warnings
    )?;

    if let Some(graph) = graph.filter(|g| !g.nodes.is_empty()) {
        writeln!(out)?;
        writeln!(out, "  {}", style(THIN_RULE).dim())?;
        writeln!(
            out,
            "  {:<24}  {:<16}  {:<8}  {}",
            style("DEVICE").bold(),
            style("ADDRESS").bold(),
            style("ROLE").bold(),
            style("STATUS").bold()
        )?;
        writeln!(out, "  {}", style(THIN_RULE).dim())?;
        for node in &graph.nodes {
            let address = node.mgmt_address.map(|a| a.to_string()).unwrap_or_default();
            let status = match (&node.session_failure, node.confirmed) {
                (Some(failure), _) => style(truncate_string(&failure.to_string(), 30)).red(),
                (None, false) => style("unconfirmed".to_string()).yellow(),
                (None, true) => style("ok".to_string()).green(),
            };
            writeln!(
                out,
                "  {:<24}  {:<16}  {:<8}  {}",
                truncate_string(&node.id, 24),
                address,
                node.role,
                status
            )?;
        }
        writeln!(out, "  {}", style(THIN_RULE).dim())?;
        for warning in &graph.warnings {
            writeln!(out, "  {} {}", style("!").yellow().bold(), warning)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;
    Ok(())
}

/// Print past runs, newest first.
pub fn print_history(runs: &[RunManifest]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if runs.is_empty() {
        writeln!(out, "{}", style("No runs recorded.").dim())?;
        return Ok(());
    }

    writeln!(
        out,
        "\n{:<10} {:<20} {:<11} {}",
        style("RUN").bold(),
        style("STARTED").bold(),
        style("STAGE").bold(),
        style("SUMMARY").bold()
    )?;
    writeln!(out, "{}", "-".repeat(80))?;
    for run in runs {
        writeln!(
            out,
            "{:<10} {:<20} {:<11} {}",
            run.id.short(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            stage_style(run.stage).apply_to(run.stage),
            run.summary()
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Rendered => Style::new().green().bold(),
        Stage::Created | Stage::Probed => Style::new().yellow(),
        _ => Style::new().cyan(),
    }
}

fn failed_style(failed: usize) -> Style {
    if failed == 0 {
        Style::new().dim()
    } else {
        Style::new().red().bold()
    }
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an info message.
pub fn print_info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Truncate a string to a maximum number of characters, adding an ellipsis
/// if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("коммутатор-ядра", 8), "комму...");
    }
}
