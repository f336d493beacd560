//! Template-driven parsing of raw captures.
//!
//! Parse misses are never errors: a command without a template, or whose
//! template matched nothing, yields zero rows and a diagnostic on its
//! record. Captures are parsed in parallel on a dedicated rayon pool; the
//! output order is fixed by address.

pub mod engine;
pub mod template;

use crate::error::{PipelineError, PipelineResult, SessionError};
use crate::safety::ExclusionList;
use crate::session::{CommandStatus, RawCapture};
use crate::types::RunId;
use crate::vendor::guess_vendor;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;
use tracing::{debug, info};

pub use engine::{ParsedRow, FACTS_KEY};
pub use template::{RecordKind, RuleAction, RuleSpec, Template, TemplateSet, TemplateSpec};

/// Rows parsed from one command's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub command: String,
    /// Template used, `None` when no template handles the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub kind: RecordKind,
    pub rows: Vec<ParsedRow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

/// Everything parsed from one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCapture {
    pub address: IpAddr,
    pub run_id: RunId,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Why the session stopped short, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_failure: Option<SessionError>,
    pub records: Vec<ParsedRecord>,
}

impl ParsedCapture {
    pub fn row_count(&self) -> usize {
        self.records.iter().map(|r| r.rows.len()).sum()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .flat_map(|r| r.diagnostics.iter().map(String::as_str))
    }

    /// Drop every row and diagnostic that names an excluded address.
    /// Returns how many rows went.
    pub fn drop_excluded_rows(&mut self, exclusions: &ExclusionList) -> usize {
        if exclusions.is_empty() {
            return 0;
        }
        let mut removed = 0;
        for record in &mut self.records {
            let before = record.rows.len();
            record
                .rows
                .retain(|row| !row.fields.values().any(|v| exclusions.mentions(v)));
            removed += before - record.rows.len();
            record.diagnostics.retain(|d| !exclusions.mentions(d));
        }
        removed
    }

    /// First row of the given kind carrying `field`.
    pub fn first_value(&self, kind: RecordKind, field: &str) -> Option<&str> {
        self.records
            .iter()
            .filter(|r| r.kind == kind)
            .flat_map(|r| r.rows.iter())
            .find_map(|row| row.get(field))
    }
}

/// Applies a template set to raw captures.
#[derive(Debug, Clone)]
pub struct RecordParser {
    templates: TemplateSet,
}

impl RecordParser {
    pub fn new(templates: TemplateSet) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Parse one capture. Deterministic for a given text and template set.
    pub fn parse(&self, capture: &RawCapture) -> ParsedCapture {
        let vendor = capture.vendor.clone().or_else(|| {
            let sample: String = capture
                .usable_commands()
                .map(|c| c.output.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            guess_vendor(&sample).map(str::to_string)
        });

        let records: Vec<ParsedRecord> = capture
            .usable_commands()
            .map(|output| {
                let mut record = self.parse_command(&output.command, &output.output, vendor.as_deref());
                if output.status == CommandStatus::Partial {
                    record
                        .diagnostics
                        .push(format!("{}: output incomplete", output.command));
                }
                record
            })
            .collect();

        let mut parsed = ParsedCapture {
            address: capture.address,
            run_id: capture.run_id,
            captured_at: capture.captured_at,
            hostname: capture.hostname.clone(),
            vendor,
            session_failure: capture.failure.clone(),
            records,
        };
        if parsed.hostname.is_none() {
            parsed.hostname = parsed
                .first_value(RecordKind::Facts, "hostname")
                .map(str::to_string);
        }
        parsed
    }

    fn parse_command(&self, command: &str, text: &str, vendor: Option<&str>) -> ParsedRecord {
        let Some(template) = self.templates.select(command, vendor) else {
            return ParsedRecord {
                command: command.to_string(),
                template: None,
                kind: RecordKind::Other,
                rows: Vec::new(),
                diagnostics: vec![format!("{}: no template", command)],
            };
        };

        let rows = engine::apply(template, text);
        let diagnostics = if rows.is_empty() {
            vec![format!("{}: no match ({})", command, template.name())]
        } else {
            Vec::new()
        };
        ParsedRecord {
            command: command.to_string(),
            template: Some(template.name().to_string()),
            kind: template.kind(),
            rows,
            diagnostics,
        }
    }

    /// Parse captures on a pool of `workers` threads, sorted by address.
    pub fn parse_all(
        &self,
        captures: &[RawCapture],
        workers: usize,
    ) -> PipelineResult<Vec<ParsedCapture>> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("netdocs-parse-{}", i))
            .build()
            .map_err(|e| PipelineError::WorkerPool(e.to_string()))?;

        let mut parsed: Vec<ParsedCapture> =
            pool.install(|| captures.par_iter().map(|c| self.parse(c)).collect());
        parsed.sort_by_key(|p| p.address);

        for capture in &parsed {
            debug!(
                address = %capture.address,
                rows = capture.row_count(),
                diagnostics = capture.diagnostics().count(),
                "Parsed capture"
            );
        }
        info!(
            captures = parsed.len(),
            rows = parsed.iter().map(ParsedCapture::row_count).sum::<usize>(),
            workers,
            duration_ms = start.elapsed().as_millis() as u64,
            "Parse complete"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CommandOutput, HostProgress, Protocol};
    use std::net::Ipv4Addr;

    fn capture(last: u8, vendor: Option<&str>, commands: &[(&str, &str)]) -> RawCapture {
        let mut progress = HostProgress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), RunId::new());
        progress.dialing(Protocol::Ssh);
        progress.authenticated();
        for (command, output) in commands {
            progress.begin_command(command);
            progress.command_completed(command, output.to_string());
        }
        progress.done();
        let mut capture = progress.finish();
        capture.vendor = vendor.map(str::to_string);
        capture
    }

    fn parser() -> RecordParser {
        RecordParser::new(TemplateSet::builtin().unwrap())
    }

    #[test]
    fn test_missing_template_is_diagnostic() {
        let parsed = parser().parse(&capture(1, Some("cisco_ios"), &[("show clock", "12:00:00 UTC")]));
        assert_eq!(parsed.records.len(), 1);
        assert!(parsed.records[0].rows.is_empty());
        assert_eq!(parsed.records[0].diagnostics, vec!["show clock: no template".to_string()]);
    }

    #[test]
    fn test_no_match_is_diagnostic() {
        let parsed = parser().parse(&capture(
            1,
            Some("cisco_ios"),
            &[("show lldp neighbors detail", "% LLDP is not enabled")],
        ));
        assert!(parsed.records[0].diagnostics[0].contains("no match"));
    }

    #[test]
    fn test_vendor_guessed_from_text() {
        let version = "Cisco IOS Software, C2960X Software (X), Version 15.2(7)E2, RELEASE\nacc-7 uptime is 1 day";
        let parsed = parser().parse(&capture(1, None, &[("show version", version)]));
        assert_eq!(parsed.vendor.as_deref(), Some("cisco_ios"));
        assert_eq!(parsed.hostname.as_deref(), Some("acc-7"));
        assert_eq!(parsed.records[0].kind, RecordKind::Facts);
    }

    #[test]
    fn test_skips_empty_and_unrun_output() {
        let mut raw = capture(1, Some("cisco_ios"), &[("terminal length 0", "")]);
        raw.commands.push(CommandOutput {
            command: "show version".to_string(),
            status: CommandStatus::NotRun,
            output: String::new(),
            duration_ms: 0,
            error: Some(SessionError::DeadlineExceeded),
        });
        raw.failure = Some(SessionError::DeadlineExceeded);
        let parsed = parser().parse(&raw);
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.session_failure, Some(SessionError::DeadlineExceeded));
    }

    #[test]
    fn test_rows_naming_excluded_hosts_dropped() {
        let lldp = "------------------------------------------------\nLocal Intf: Gi1/0/1\nChassis id: 0011.2233.4455\nPort id: Gi1/0/2\nSystem Name: sw-b\nManagement Addresses:\n    IP: 10.0.0.2\n------------------------------------------------\nLocal Intf: Gi1/0/3\nChassis id: 0011.2233.4466\nPort id: Gi1/0/4\nSystem Name: sw-c\nManagement Addresses:\n    IP: 10.0.0.3\n\nTotal entries displayed: 2";
        let mut parsed = parser().parse(&capture(1, Some("cisco_ios"), &[("show lldp neighbors detail", lldp)]));
        assert_eq!(parsed.row_count(), 2);

        let exclusions = ExclusionList::parse(&["10.0.0.2"]).unwrap();
        assert_eq!(parsed.drop_excluded_rows(&exclusions), 1);
        let rows = &parsed.records[0].rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("remote_system_name"), Some("sw-c"));
        assert_eq!(parsed.drop_excluded_rows(&ExclusionList::empty()), 0);
    }

    #[test]
    fn test_parse_all_sorted_and_deterministic() {
        let captures = vec![
            capture(9, Some("cisco_ios"), &[("show version", "sw9 uptime is 1 day")]),
            capture(2, Some("cisco_ios"), &[("show version", "sw2 uptime is 1 day")]),
        ];
        let first = parser().parse_all(&captures, 2).unwrap();
        let second = parser().parse_all(&captures, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }
}
