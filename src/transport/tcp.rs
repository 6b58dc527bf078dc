//! TCP dialing and socket options.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{lookup_host, TcpStream};

use crate::error::{Error, Result};

/// Socket options applied to every dialed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOptions {
    /// Disable Nagle; browsers do.
    pub nodelay: bool,
    /// Idle time before keepalive probes start. `None` leaves the OS default.
    pub keepalive: Option<Duration>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Configure a connected socket.
pub fn configure_tcp_socket(stream: &TcpStream, opts: &TcpOptions) -> io::Result<()> {
    stream.set_nodelay(opts.nodelay)?;
    if let Some(idle) = opts.keepalive {
        SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
    }
    Ok(())
}

/// Resolve `host:port` and connect to the first address that accepts.
pub async fn dial(host: &str, port: u16, opts: &TcpOptions) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::transport(format!("DNS resolution failed for {host}:{port}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::transport(format!("no addresses found for {host}:{port}")));
    }

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                configure_tcp_socket(&stream, opts)
                    .map_err(|e| Error::transport(format!("failed to configure socket: {e}")))?;
                tracing::trace!(%addr, "tcp connected");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(Error::transport(format!(
        "failed to connect to {host}:{port}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}
