//! Opening the TCP connection to the proxy

use proxytab_shared::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::Endpoint;

/// Resolve and connect to the proxy, trying every resolved address.
///
/// The whole attempt (lookup included) is bounded by `limit`.
pub async fn connect_proxy(proxy: &Endpoint, limit: Duration) -> Result<TcpStream> {
    debug!("Resolving proxy '{}'", proxy.host);

    let stream = timeout(limit, TcpStream::connect((proxy.host.as_str(), proxy.port)))
        .await
        .map_err(|_| Error::Timeout("connecting to proxy"))?
        .map_err(|e| Error::Connection(format!("{}: {}", proxy, e)))?;

    // Tunnels mostly carry interactive traffic
    stream.set_nodelay(true)?;

    info!("Connected to proxy {} ({})", proxy, stream.peer_addr()?);
    Ok(stream)
}
