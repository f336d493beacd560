//! TCP connect check for management ports.
//!
//! A port is open when the handshake completes within the timeout. Refusals,
//! unreachable errors and silence all count as closed: the prober only needs
//! to know whether a CLI session is worth attempting.

use super::banner::read_banner;
use crate::types::Port;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Outcome of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProbe {
    pub port: Port,
    pub open: bool,
    /// Handshake time, set when open.
    pub latency: Option<Duration>,
    pub banner: Option<String>,
}

/// Connect prober for a single address and port.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Try one connect. When `want_banner` is set and the port is open, wait
    /// up to the same timeout for the server's first line.
    pub async fn check(&self, ip: IpAddr, port: Port, want_banner: bool) -> PortProbe {
        let addr = SocketAddr::new(ip, port.as_u16());
        let start = Instant::now();

        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut stream)) => {
                let latency = start.elapsed();
                let banner = if want_banner {
                    read_banner(&mut stream, self.timeout).await
                } else {
                    None
                };
                PortProbe {
                    port,
                    open: true,
                    latency: Some(latency),
                    banner,
                }
            }
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "Port closed");
                self.closed(port)
            }
            Err(_) => {
                trace!(%addr, "Connect timed out");
                self.closed(port)
            }
        }
    }

    fn closed(&self, port: Port) -> PortProbe {
        PortProbe {
            port,
            open: false,
            latency: None,
            banner: None,
        }
    }
}
