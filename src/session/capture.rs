//! Raw capture artifacts.
//!
//! A [`RawCapture`] is everything one CLI session produced for one host,
//! including how far the session got. It is written once, as soon as the
//! session ends, and never modified afterwards.

use super::transport::Protocol;
use crate::error::SessionError;
use crate::safety::ExclusionList;
use crate::types::RunId;
use crate::vendor::VendorSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Instant;

/// Last step a session reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", content = "index", rename_all = "kebab-case")]
pub enum SessionPhase {
    Dialing,
    Authenticating,
    /// Running the command at this index.
    Executing(usize),
    Done,
}

/// Result of offering credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthOutcome {
    NotAttempted,
    Accepted,
    Rejected,
    TimedOut,
}

/// Per-command execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Completed,
    /// Interrupted; `output` holds what arrived before the failure.
    Partial,
    /// Never started because the session ended first.
    NotRun,
}

/// One command and its raw output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub status: CommandStatus,
    pub output: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
}

/// Everything captured from one host in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCapture {
    pub address: IpAddr,
    pub run_id: RunId,
    /// When the session ended; merge precedence is decided by this.
    pub captured_at: DateTime<Utc>,
    /// Transport of the session that reached login, if any.
    pub protocol: Option<Protocol>,
    pub auth: AuthOutcome,
    pub phase: SessionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<SessionError>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_source: Option<VendorSource>,
    /// Command profile that was run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub commands: Vec<CommandOutput>,
    /// Non-fatal notes: protocol fallbacks, enable refusals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

impl RawCapture {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.phase == SessionPhase::Done
    }

    /// Strip excluded addresses from every command output and note.
    /// Returns how many outputs changed.
    pub fn redact(&mut self, exclusions: &ExclusionList) -> usize {
        let mut changed = 0;
        for command in &mut self.commands {
            if let Some(output) = exclusions.redact_output(&command.output) {
                command.output = output;
                changed += 1;
            }
        }
        self.diagnostics.retain(|d| !exclusions.mentions(d));
        changed
    }

    /// Commands that produced usable text, in execution order.
    pub fn usable_commands(&self) -> impl Iterator<Item = &CommandOutput> {
        self.commands
            .iter()
            .filter(|c| c.status != CommandStatus::NotRun && !c.output.trim().is_empty())
    }
}

/// Mutable record of a session in flight.
///
/// The collector updates it at every step, so whatever interrupts the
/// session (deadline, cancellation, a failure) still leaves an accurate
/// capture behind.
#[derive(Debug)]
pub struct HostProgress {
    capture: RawCapture,
    planned: Vec<String>,
    started: Instant,
    in_flight: Option<(String, Instant)>,
}

impl HostProgress {
    pub fn new(address: IpAddr, run_id: RunId) -> Self {
        Self {
            capture: RawCapture {
                address,
                run_id,
                captured_at: Utc::now(),
                protocol: None,
                auth: AuthOutcome::NotAttempted,
                phase: SessionPhase::Dialing,
                failure: None,
                duration_ms: 0,
                hostname: None,
                vendor: None,
                vendor_source: None,
                profile: None,
                commands: Vec::new(),
                diagnostics: Vec::new(),
            },
            planned: Vec::new(),
            started: Instant::now(),
            in_flight: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.capture.phase
    }

    pub fn is_failed(&self) -> bool {
        self.capture.failure.is_some()
    }

    pub fn dialing(&mut self, protocol: Protocol) {
        self.capture.protocol = Some(protocol);
        self.capture.phase = SessionPhase::Dialing;
    }

    pub fn authenticating(&mut self) {
        self.capture.phase = SessionPhase::Authenticating;
    }

    pub fn authenticated(&mut self) {
        self.capture.auth = AuthOutcome::Accepted;
    }

    pub fn set_vendor(&mut self, vendor: &str, source: VendorSource) {
        self.capture.vendor = Some(vendor.to_string());
        self.capture.vendor_source = Some(source);
    }

    pub fn vendor(&self) -> Option<&str> {
        self.capture.vendor.as_deref()
    }

    pub fn set_profile(&mut self, profile: &str) {
        self.capture.profile = Some(profile.to_string());
    }

    /// Record the hostname unless a better one is already known.
    pub fn offer_hostname(&mut self, hostname: Option<String>) {
        if self.capture.hostname.is_none() {
            self.capture.hostname = hostname;
        }
    }

    pub fn note(&mut self, diagnostic: impl Into<String>) {
        self.capture.diagnostics.push(diagnostic.into());
    }

    /// Commands still expected to run, used to mark them on failure.
    pub fn plan(&mut self, commands: &[String]) {
        for command in commands {
            if !self.planned.contains(command) && !self.has_run(command) {
                self.planned.push(command.clone());
            }
        }
    }

    pub fn has_run(&self, command: &str) -> bool {
        self.capture.commands.iter().any(|c| c.command == command)
    }

    /// Mark the start of a command; its index follows those already run.
    pub fn begin_command(&mut self, command: &str) {
        self.planned.retain(|c| c != command);
        self.capture.phase = SessionPhase::Executing(self.capture.commands.len());
        self.in_flight = Some((command.to_string(), Instant::now()));
    }

    pub fn command_completed(&mut self, command: &str, output: String) {
        self.push_command(command, CommandStatus::Completed, output, None);
    }

    pub fn command_failed(&mut self, command: &str, partial: String, error: SessionError) {
        self.push_command(command, CommandStatus::Partial, partial, Some(error));
    }

    fn push_command(
        &mut self,
        command: &str,
        status: CommandStatus,
        output: String,
        error: Option<SessionError>,
    ) {
        let duration_ms = self
            .in_flight
            .take()
            .map(|(_, t)| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.capture.commands.push(CommandOutput {
            command: command.to_string(),
            status,
            output,
            duration_ms,
            error,
        });
    }

    /// Record the session failure. The first recorded reason wins.
    pub fn fail(&mut self, error: SessionError) {
        match &error {
            SessionError::AuthRejected => self.capture.auth = AuthOutcome::Rejected,
            SessionError::AuthTimeout => self.capture.auth = AuthOutcome::TimedOut,
            _ => {}
        }
        if self.capture.failure.is_none() {
            self.capture.failure = Some(error);
        }
    }

    pub fn done(&mut self) {
        if self.capture.failure.is_none() {
            self.capture.phase = SessionPhase::Done;
        }
    }

    /// Seal the capture. A command interrupted mid-flight and every command
    /// still planned are recorded as not completed.
    pub fn finish(mut self) -> RawCapture {
        let failure = self.capture.failure.clone();
        if let (Some((command, _)), Some(error)) = (self.in_flight.clone(), &failure) {
            self.push_command(&command, CommandStatus::Partial, String::new(), Some(error.clone()));
        }
        for command in std::mem::take(&mut self.planned) {
            self.capture.commands.push(CommandOutput {
                command,
                status: CommandStatus::NotRun,
                output: String::new(),
                duration_ms: 0,
                error: failure.clone(),
            });
        }
        self.capture.duration_ms = self.started.elapsed().as_millis() as u64;
        self.capture.captured_at = Utc::now();
        self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn progress() -> HostProgress {
        HostProgress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), RunId::new())
    }

    #[test]
    fn test_successful_session() {
        let mut p = progress();
        p.dialing(Protocol::Ssh);
        p.authenticating();
        p.authenticated();
        p.plan(&["show version".to_string()]);
        p.begin_command("show version");
        p.command_completed("show version", "Cisco IOS".into());
        p.done();
        let capture = p.finish();
        assert!(capture.succeeded());
        assert_eq!(capture.commands.len(), 1);
        assert_eq!(capture.auth, AuthOutcome::Accepted);
    }

    #[test]
    fn test_deadline_keeps_completed_and_marks_rest() {
        let mut p = progress();
        p.dialing(Protocol::Ssh);
        p.authenticated();
        let plan: Vec<String> = ["show version", "show lldp neighbors detail", "show vlan"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        p.plan(&plan);
        p.begin_command("show version");
        p.command_completed("show version", "ok".into());
        p.begin_command("show lldp neighbors detail");
        p.fail(SessionError::DeadlineExceeded);
        let capture = p.finish();

        assert!(!capture.succeeded());
        assert_eq!(capture.phase, SessionPhase::Executing(1));
        assert_eq!(capture.commands.len(), 3);
        assert_eq!(capture.commands[0].status, CommandStatus::Completed);
        assert_eq!(capture.commands[0].output, "ok");
        assert_eq!(capture.commands[1].status, CommandStatus::Partial);
        assert_eq!(capture.commands[2].status, CommandStatus::NotRun);
        assert_eq!(capture.commands[2].error, Some(SessionError::DeadlineExceeded));
    }

    #[test]
    fn test_auth_failure_recorded() {
        let mut p = progress();
        p.dialing(Protocol::Telnet);
        p.authenticating();
        p.fail(SessionError::AuthRejected);
        p.fail(SessionError::Cancelled);
        let capture = p.finish();
        assert_eq!(capture.auth, AuthOutcome::Rejected);
        assert_eq!(capture.phase, SessionPhase::Authenticating);
        assert_eq!(capture.failure, Some(SessionError::AuthRejected));
        assert!(capture.commands.is_empty());
    }

    #[test]
    fn test_capture_json_shape() {
        let mut p = progress();
        p.dialing(Protocol::Ssh);
        p.fail(SessionError::ConnectTimeout);
        let json = serde_json::to_value(p.finish()).unwrap();
        assert_eq!(json["failure"]["reason"], "connect-timeout");
        assert_eq!(json["phase"]["step"], "dialing");
        assert_eq!(json["protocol"], "ssh");
    }
}
