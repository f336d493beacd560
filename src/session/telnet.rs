//! Telnet transport.
//!
//! Implements just enough of RFC 854 option negotiation to reach a device
//! shell: the server may enable ECHO and SUPPRESS-GO-AHEAD, every other
//! option is refused. Login is a prompt dialogue (`Username:` /
//! `Password:`) driven over the decoded byte stream.

use super::prompt::{clean, is_prompt};
use super::transport::{connect_error, CliTransport, Connector, Credentials, PendingLogin, Protocol};
use crate::error::SessionError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::trace;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

/// Phrases devices print when they reject a login.
const LOGIN_FAILURES: &[&str] = &[
    "login invalid",
    "login incorrect",
    "authentication failed",
    "access denied",
    "bad password",
    "invalid password",
    "% bad secrets",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Data,
    Iac,
    Option(u8),
    Subneg,
    SubnegIac,
}

/// Incremental IAC decoder. Sequences may span reads.
#[derive(Debug)]
pub struct TelnetCodec {
    state: DecodeState,
}

impl Default for TelnetCodec {
    fn default() -> Self {
        Self {
            state: DecodeState::Data,
        }
    }
}

impl TelnetCodec {
    /// Split raw input into shell data and the negotiation replies owed.
    pub fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (DecodeState::Data, IAC) => DecodeState::Iac,
                (DecodeState::Data, b) => {
                    data.push(b);
                    DecodeState::Data
                }
                (DecodeState::Iac, IAC) => {
                    data.push(IAC);
                    DecodeState::Data
                }
                (DecodeState::Iac, verb @ (DO | DONT | WILL | WONT)) => DecodeState::Option(verb),
                (DecodeState::Iac, SB) => DecodeState::Subneg,
                (DecodeState::Iac, _) => DecodeState::Data,
                (DecodeState::Option(verb), option) => {
                    if let Some(reply) = reply_for(verb, option) {
                        replies.extend_from_slice(&[IAC, reply, option]);
                    }
                    DecodeState::Data
                }
                (DecodeState::Subneg, IAC) => DecodeState::SubnegIac,
                (DecodeState::Subneg, _) => DecodeState::Subneg,
                (DecodeState::SubnegIac, SE) => DecodeState::Data,
                (DecodeState::SubnegIac, _) => DecodeState::Subneg,
            };
        }

        (data, replies)
    }

    /// Escape outgoing data and translate newlines to CR LF.
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 2);
        for &b in data {
            match b {
                IAC => out.extend_from_slice(&[IAC, IAC]),
                b'\n' => out.extend_from_slice(b"\r\n"),
                _ => out.push(b),
            }
        }
        out
    }
}

fn reply_for(verb: u8, option: u8) -> Option<u8> {
    match verb {
        WILL if option == OPT_ECHO || option == OPT_SGA => Some(DO),
        WILL => Some(DONT),
        DO => Some(WONT),
        // Acknowledgements of refusals need no answer.
        _ => None,
    }
}

/// Telnet byte pipe over any async stream.
pub struct TelnetTransport<S> {
    stream: S,
    codec: TelnetCodec,
}

impl<S> TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: TelnetCodec::default(),
        }
    }
}

#[async_trait]
impl<S> CliTransport for TelnetTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.stream
            .write_all(&TelnetCodec::encode(data))
            .await
            .map_err(|e| SessionError::SessionReset(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut buf = [0u8; 4096];
        loop {
            let n = self
                .stream
                .read(&mut buf)
                .await
                .map_err(|e| SessionError::SessionReset(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            let (data, replies) = self.codec.decode(&buf[..n]);
            if !replies.is_empty() {
                trace!(bytes = replies.len(), "Answering option negotiation");
                self.stream
                    .write_all(&replies)
                    .await
                    .map_err(|e| SessionError::Negotiation(e.to_string()))?;
            }
            if !data.is_empty() {
                return Ok(Some(data));
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Run the username/password dialogue on a fresh Telnet session.
pub async fn login_dialogue<T>(
    transport: &mut T,
    credentials: &Credentials,
    wait: Duration,
) -> Result<(), SessionError>
where
    T: CliTransport + ?Sized,
{
    let deadline = Instant::now() + wait;
    let mut text = String::new();
    let mut sent_user = false;
    let mut sent_pass = false;

    loop {
        let lower = text.to_lowercase();
        let tail = lower.trim_end();

        if sent_pass && LOGIN_FAILURES.iter().any(|f| lower.contains(f)) {
            return Err(SessionError::AuthRejected);
        }
        if tail.ends_with("sername:") || tail.ends_with("ogin:") {
            if sent_user {
                return Err(SessionError::AuthRejected);
            }
            transport
                .send(format!("{}\n", credentials.username()).as_bytes())
                .await?;
            sent_user = true;
            text.clear();
            continue;
        }
        if tail.ends_with("assword:") {
            if sent_pass {
                return Err(SessionError::AuthRejected);
            }
            transport
                .send(format!("{}\n", credentials.password()).as_bytes())
                .await?;
            sent_pass = true;
            text.clear();
            continue;
        }
        if text.rsplit('\n').next().is_some_and(is_prompt) {
            return Ok(());
        }

        match timeout_at(deadline, transport.recv()).await {
            Ok(Ok(Some(chunk))) => text.push_str(&clean(&String::from_utf8_lossy(&chunk))),
            Ok(Ok(None)) if sent_pass => return Err(SessionError::AuthRejected),
            Ok(Ok(None)) => {
                return Err(SessionError::SessionReset(
                    "connection closed before login".to_string(),
                ))
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(SessionError::AuthTimeout),
        }
    }
}

/// Dials devices over Telnet.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelnetConnector;

struct TelnetPending {
    transport: TelnetTransport<TcpStream>,
}

#[async_trait]
impl PendingLogin for TelnetPending {
    async fn login(
        mut self: Box<Self>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn CliTransport>, SessionError> {
        login_dialogue(&mut self.transport, credentials, timeout).await?;
        Ok(Box::new(self.transport))
    }
}

#[async_trait]
impl Connector for TelnetConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Telnet
    }

    async fn dial(
        &self,
        addr: SocketAddr,
        wait: Duration,
    ) -> Result<Box<dyn PendingLogin>, SessionError> {
        let stream = match timeout(wait, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_error(&e)),
            Err(_) => return Err(SessionError::ConnectTimeout),
        };
        let _ = stream.set_nodelay(true);
        Ok(Box::new(TelnetPending {
            transport: TelnetTransport::new(stream),
        }))
    }
}
