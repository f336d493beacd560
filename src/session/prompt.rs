//! Prompt-framed command execution over a [`CliTransport`].
//!
//! Output of a command is everything the device prints between the echoed
//! command line and the next prompt. Pagers (`--More--` and friends) are
//! answered with a space and stripped from the text.

use super::transport::CliTransport;
use crate::error::SessionError;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

/// Regex matching a full prompt line.
fn prompt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:<[\w.\-@:/]+>|\[[\w.\-@:/ ]+\]\s?[>#]|[\w.\-@:/()~]+\s?[#>$%])\s*$",
        )
        .expect("valid prompt pattern")
    })
}

fn pager_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:<?-+\s*more\s*-+>?|press any key to continue|space\s+n\s+next page[^\n]*)\s*$",
        )
        .expect("valid pager pattern")
    })
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid escape pattern"))
}

/// Whether a line looks like a device prompt.
pub fn is_prompt(line: &str) -> bool {
    !line.trim().is_empty() && prompt_re().is_match(line)
}

/// Strip terminal noise: escape sequences, carriage returns, backspaces.
pub fn clean(text: &str) -> String {
    let text = ansi_re().replace_all(text, "");
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' | '\0' => {}
            '\u{8}' => {
                out.pop();
            }
            _ => out.push(c),
        }
    }
    out
}

/// Prompt text without its mode suffix: `sw1(config)#` gives `sw1`.
fn prompt_base(prompt: &str) -> Option<String> {
    let mut base = prompt
        .trim()
        .trim_end_matches(|c: char| matches!(c, '#' | '>' | '$' | '%'))
        .trim_end();
    if base.ends_with(')') {
        if let Some(open) = base.rfind('(') {
            base = &base[..open];
        }
    }
    (!base.is_empty()).then(|| base.to_string())
}

/// Whether a line is the learned prompt in any mode.
fn is_learned_prompt(line: &str, base: &str) -> bool {
    let Some(rest) = line.trim().strip_prefix(base) else {
        return false;
    };
    let rest = match rest.strip_prefix('(') {
        Some(mode) => match mode.find(')') {
            Some(end) => &mode[end + 1..],
            None => return false,
        },
        None => rest,
    };
    matches!(rest.trim_start(), "#" | ">" | "$" | "%")
}

/// Prompt-aware command channel.
pub struct CliChannel {
    transport: Box<dyn CliTransport>,
    buffer: String,
    prompt: Option<String>,
    /// Set by [`sync_prompt`](Self::sync_prompt); later prompts must carry it.
    base: Option<String>,
}

impl CliChannel {
    pub fn new(transport: Box<dyn CliTransport>) -> Self {
        Self {
            transport,
            buffer: String::new(),
            prompt: None,
            base: None,
        }
    }

    /// The most recent prompt line seen.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    /// Wait for the first prompt after login, nudging the device with a
    /// newline if it stays quiet.
    pub async fn sync_prompt(&mut self, wait: Duration) -> Result<String, SessionError> {
        let deadline = Instant::now() + wait;
        let quiet = Instant::now() + (wait / 4).min(Duration::from_secs(2));

        match self.read_until_prompt(quiet, "login banner").await {
            Ok(_) => {}
            Err(SessionError::CommandTimeout(_)) => {
                self.transport.send(b"\n").await?;
                self.read_until_prompt(deadline, "initial prompt")
                    .await
                    .map_err(|e| match e {
                        SessionError::CommandTimeout(_) => SessionError::AuthTimeout,
                        other => other,
                    })?;
            }
            Err(e) => return Err(e),
        }
        self.buffer.clear();
        self.base = self.prompt.as_deref().and_then(prompt_base);
        Ok(self.prompt.clone().unwrap_or_default())
    }

    /// Run one command and return its output without echo or prompt.
    ///
    /// On timeout, [`take_partial`](Self::take_partial) yields whatever was
    /// received.
    pub async fn run(&mut self, command: &str, wait: Duration) -> Result<String, SessionError> {
        self.buffer.clear();
        let mut line = command.to_string();
        line.push('\n');
        self.transport.send(line.as_bytes()).await?;

        let raw = self
            .read_until_prompt(Instant::now() + wait, command)
            .await?;
        self.buffer.clear();
        Ok(strip_echo_and_prompt(&raw, command))
    }

    /// Enter privileged mode. Returns `false` when the device refuses the
    /// secret; the session stays usable either way.
    pub async fn enable(&mut self, secret: &str, wait: Duration) -> Result<bool, SessionError> {
        if self.prompt.as_deref().is_some_and(|p| p.trim_end().ends_with('#')) {
            return Ok(true);
        }

        let deadline = Instant::now() + wait;
        self.buffer.clear();
        self.transport.send(b"enable\n").await?;

        // Either a password prompt or straight back to a prompt.
        loop {
            let lower = self.buffer.to_lowercase();
            if lower.trim_end().ends_with("assword:") {
                break;
            }
            if self.tail_is_prompt() {
                self.buffer.clear();
                return Ok(self.prompt.as_deref().is_some_and(|p| p.trim_end().ends_with('#')));
            }
            self.fill(deadline, "enable").await?;
        }

        self.buffer.clear();
        let mut line = secret.to_string();
        line.push('\n');
        self.transport.send(line.as_bytes()).await?;
        self.read_until_prompt(deadline, "enable").await?;
        self.buffer.clear();

        Ok(self.prompt.as_deref().is_some_and(|p| p.trim_end().ends_with('#')))
    }

    /// Output received for an interrupted command.
    pub fn take_partial(&mut self) -> String {
        clean(&std::mem::take(&mut self.buffer))
    }

    pub async fn close(mut self) {
        let _ = self.transport.send(b"exit\n").await;
        self.transport.close().await;
    }

    async fn read_until_prompt(
        &mut self,
        deadline: Instant,
        what: &str,
    ) -> Result<String, SessionError> {
        loop {
            if self.answer_pager().await? {
                continue;
            }
            if self.tail_is_prompt() {
                return Ok(self.buffer.clone());
            }
            self.fill(deadline, what).await?;
        }
    }

    /// Read one chunk into the buffer.
    async fn fill(&mut self, deadline: Instant, what: &str) -> Result<(), SessionError> {
        match timeout_at(deadline, self.transport.recv()).await {
            Ok(Ok(Some(chunk))) => {
                let text = clean(&String::from_utf8_lossy(&chunk));
                trace!(bytes = chunk.len(), "Received output");
                self.buffer.push_str(&text);
                Ok(())
            }
            Ok(Ok(None)) => Err(SessionError::SessionReset(format!(
                "connection closed during {}",
                what
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::CommandTimeout(what.to_string())),
        }
    }

    /// If the buffer ends in a pager marker, strip it and request the next page.
    async fn answer_pager(&mut self) -> Result<bool, SessionError> {
        let tail_start = self.buffer.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let Some(found) = pager_re().find(&self.buffer[tail_start..]) else {
            return Ok(false);
        };
        let cut = tail_start + found.start();
        self.buffer.truncate(cut);
        self.transport.send(b" ").await?;
        Ok(true)
    }

    fn tail_is_prompt(&mut self) -> bool {
        let tail = self.buffer.rsplit('\n').next().unwrap_or("");
        let matched = match &self.base {
            Some(base) => is_learned_prompt(tail, base),
            None => is_prompt(tail),
        };
        if matched {
            self.prompt = Some(tail.trim().to_string());
            true
        } else {
            false
        }
    }
}

/// Drop the echoed command (first line) and the trailing prompt line.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();
    if lines.last().is_some_and(|l| is_prompt(l)) {
        lines.pop();
    }
    if lines
        .first()
        .is_some_and(|l| l.trim_end().ends_with(command.trim()))
    {
        lines.remove(0);
    }
    lines.join("\n")
}
