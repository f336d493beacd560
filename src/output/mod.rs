//! Output formatting module.
//!
//! Provides formatters for plain text and JSON output of run results.

mod json_format;
mod plain;

pub use json_format::print_json;
pub use plain::{
    print_error, print_history, print_info, print_run_summary, print_success, print_warning,
    truncate_string,
};

use crate::cli::OutputFormat;
use crate::storage::RunManifest;
use crate::topology::TopologyGraph;
use serde::Serialize;
use std::io;

/// Format and print a run according to the specified format.
pub fn format_run(
    manifest: &RunManifest,
    graph: Option<&TopologyGraph>,
    format: OutputFormat,
) -> io::Result<()> {
    #[derive(Serialize)]
    struct RunView<'a> {
        run: &'a RunManifest,
        #[serde(skip_serializing_if = "Option::is_none")]
        graph: Option<&'a TopologyGraph>,
    }

    match format {
        OutputFormat::Plain => plain::print_run_summary(manifest, graph),
        OutputFormat::Json => print_json(&RunView {
            run: manifest,
            graph,
        }),
    }
}
