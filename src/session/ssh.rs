//! SSH transport built on `russh`.
//!
//! Opens a password-authenticated session, requests a PTY and an
//! interactive shell, and exposes the channel as a byte pipe. Network
//! devices rarely support exec channels consistently, so commands are typed
//! into the shell like an operator would.

use super::transport::{CliTransport, Connector, Credentials, PendingLogin, Protocol};
use crate::error::SessionError;
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Accepts every host key: discovery runs against devices whose keys are
/// not known in advance.
struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Dials devices over SSH.
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn handshake_error(error: russh::Error) -> SessionError {
    match error {
        russh::Error::IO(e) => super::transport::connect_error(&e),
        other => SessionError::Negotiation(other.to_string()),
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Ssh
    }

    async fn dial(
        &self,
        addr: SocketAddr,
        wait: Duration,
    ) -> Result<Box<dyn PendingLogin>, SessionError> {
        let handle = match timeout(
            wait,
            client::connect(Arc::clone(&self.config), addr, AcceptingHandler),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(handshake_error(e)),
            Err(_) => return Err(SessionError::ConnectTimeout),
        };
        debug!(%addr, "SSH handshake complete");
        Ok(Box::new(SshPending { handle }))
    }
}

struct SshPending {
    handle: Handle<AcceptingHandler>,
}

#[async_trait]
impl PendingLogin for SshPending {
    async fn login(
        mut self: Box<Self>,
        credentials: &Credentials,
        wait: Duration,
    ) -> Result<Box<dyn CliTransport>, SessionError> {
        let accepted = timeout(
            wait,
            self.handle
                .authenticate_password(credentials.username(), credentials.password()),
        )
        .await
        .map_err(|_| SessionError::AuthTimeout)?
        .map_err(|e| SessionError::SessionReset(e.to_string()))?;

        if !accepted {
            return Err(SessionError::AuthRejected);
        }

        let reset = |e: russh::Error| SessionError::SessionReset(e.to_string());
        let shell = async {
            let channel = self.handle.channel_open_session().await.map_err(reset)?;
            channel
                .request_pty(false, "vt100", 200, 24, 0, 0, &[])
                .await
                .map_err(reset)?;
            channel.request_shell(false).await.map_err(reset)?;
            Ok::<_, SessionError>(channel)
        };
        let channel = timeout(wait, shell)
            .await
            .map_err(|_| SessionError::AuthTimeout)??;

        Ok(Box::new(SshTransport {
            handle: self.handle,
            channel,
        }))
    }
}

struct SshTransport {
    handle: Handle<AcceptingHandler>,
    channel: Channel<Msg>,
}

#[async_trait]
impl CliTransport for SshTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SessionError::SessionReset(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(None),
                Some(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}
