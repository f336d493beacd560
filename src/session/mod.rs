//! Interactive CLI collection.
//!
//! Transports ([`ssh`], [`telnet`]) only move bytes; [`prompt`] frames
//! commands on top of them; [`collector`] drives one session per host under a
//! deadline and records the result as a [`RawCapture`].

pub mod capture;
pub mod collector;
pub mod prompt;
pub mod ssh;
pub mod telnet;
pub mod transport;

pub use capture::{AuthOutcome, CommandOutput, CommandStatus, HostProgress, RawCapture, SessionPhase};
pub use collector::{CaptureSink, CollectConfig, CollectStats, SessionCollector};
pub use prompt::CliChannel;
pub use ssh::SshConnector;
pub use telnet::TelnetConnector;
pub use transport::{CliTransport, Connector, Credentials, PendingLogin, Protocol};
