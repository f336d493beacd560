//! Transport abstraction for interactive CLI sessions.
//!
//! A [`Connector`] dials a device and yields a [`PendingLogin`]; logging in
//! yields a [`CliTransport`], a raw byte pipe to the device's shell. Prompt
//! handling, paging and command framing live above this layer in
//! [`super::prompt::CliChannel`], so every transport (and every test double)
//! only moves bytes.

use crate::error::SessionError;
use crate::types::Port;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI transport protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
}

impl Protocol {
    /// Well-known port the prober must have seen open.
    pub fn default_port(self) -> Port {
        match self {
            Self::Ssh => Port::SSH,
            Self::Telnet => Port::TELNET,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Telnet => write!(f, "telnet"),
        }
    }
}

/// Login credentials. Opaque: `Debug` never prints the secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    enable_secret: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enable_secret: None,
        }
    }

    /// Attach a privileged-mode secret. Blank secrets are ignored.
    pub fn with_enable_secret(mut self, secret: Option<String>) -> Self {
        self.enable_secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn enable_secret(&self) -> Option<&str> {
        self.enable_secret.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field(
                "enable_secret",
                &self.enable_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A logged-in byte pipe to a device shell.
#[async_trait]
pub trait CliTransport: Send {
    /// Write raw bytes to the shell.
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError>;

    /// Next chunk of shell output, `None` once the peer has closed.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, SessionError>;

    /// Close the session. Errors are irrelevant at this point.
    async fn close(&mut self);
}

/// A connected, not yet authenticated session.
#[async_trait]
pub trait PendingLogin: Send {
    /// Authenticate and open an interactive shell.
    ///
    /// Fails with `AuthRejected` or `AuthTimeout` when the device refuses or
    /// stalls; never with a transport-level error kind, so a failure here
    /// never triggers protocol fallback.
    async fn login(
        self: Box<Self>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn CliTransport>, SessionError>;
}

/// Dials devices over one protocol.
#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Open the connection and finish any protocol handshake.
    async fn dial(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Box<dyn PendingLogin>, SessionError>;
}

/// Map an I/O error from `connect` to a session failure reason.
pub(crate) fn connect_error(error: &std::io::Error) -> SessionError {
    match error.kind() {
        std::io::ErrorKind::ConnectionRefused => SessionError::ConnectRefused,
        std::io::ErrorKind::TimedOut => SessionError::ConnectTimeout,
        _ => SessionError::ConnectFailed(error.to_string()),
    }
}
