//! Bidirectional relay between the tunnel and the local streams
//!
//! Both directions share one `select!` loop on one task. Whichever side
//! closes or fails first ends the relay, and the tunnel is shut down.

use proxytab_shared::protocol::BUF_SIZE;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Why the relay stopped. None of these is an error for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The proxy or destination closed the tunnel
    TunnelClosed,
    /// Local input reached end of file
    InputClosed,
    /// Reading from or writing to the tunnel failed
    TunnelError,
    /// Reading local input failed
    InputError,
    /// Writing local output failed
    OutputError,
}

/// Byte counts for a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Local input to tunnel
    pub sent: u64,
    /// Tunnel to local output
    pub received: u64,
    pub reason: CloseReason,
}

/// Copy bytes both ways until one side closes.
///
/// `leftover` holds tunnel bytes that arrived with the handshake response and
/// is written to `output` before anything else. When neither side is ready
/// for `poll_interval` the loop just polls again.
pub async fn relay<T, R, W>(
    tunnel: T,
    mut input: R,
    mut output: W,
    leftover: &[u8],
    poll_interval: Duration,
) -> RelayStats
where
    T: AsyncRead + AsyncWrite,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut tunnel_rd, mut tunnel_wr) = tokio::io::split(tunnel);
    let mut sent = 0u64;
    let mut received = 0u64;

    let mut down = vec![0u8; BUF_SIZE];
    let mut up = vec![0u8; BUF_SIZE];

    let reason = if !leftover.is_empty() && forward(&mut output, leftover).await.is_err() {
        CloseReason::OutputError
    } else {
        received += leftover.len() as u64;
        debug!("Starting relay loop");

        loop {
            tokio::select! {
                res = tunnel_rd.read(&mut down) => match res {
                    Ok(0) => break CloseReason::TunnelClosed,
                    Ok(n) => {
                        if let Err(e) = forward(&mut output, &down[..n]).await {
                            debug!("Local output write failed: {}", e);
                            break CloseReason::OutputError;
                        }
                        received += n as u64;
                    }
                    Err(e) => {
                        debug!("Tunnel read failed: {}", e);
                        break CloseReason::TunnelError;
                    }
                },
                res = input.read(&mut up) => match res {
                    Ok(0) => break CloseReason::InputClosed,
                    Ok(n) => {
                        if let Err(e) = forward(&mut tunnel_wr, &up[..n]).await {
                            debug!("Tunnel write failed: {}", e);
                            break CloseReason::TunnelError;
                        }
                        sent += n as u64;
                    }
                    Err(e) => {
                        debug!("Local input read failed: {}", e);
                        break CloseReason::InputError;
                    }
                },
                _ = tokio::time::sleep(poll_interval) => {
                    trace!("Relay idle for {:?}", poll_interval);
                }
            }
        }
    };

    if let Err(e) = tunnel_wr.shutdown().await {
        trace!("Tunnel shutdown: {}", e);
    }

    debug!(
        "Connection closed ({:?}): {} bytes sent, {} bytes received",
        reason, sent, received
    );
    RelayStats {
        sent,
        received,
        reason,
    }
}

async fn forward<W>(dst: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    dst.write_all(data).await?;
    dst.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_input_reaches_tunnel() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (mut stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let mut out = Vec::new();

        let driver = async {
            stdin_tx.write_all(b"abc").await.unwrap();
            let mut got = [0u8; 3];
            proxy.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"abc");
            drop(proxy);
        };

        let (stats, ()) = tokio::join!(relay(tunnel, stdin_rx, &mut out, &[], POLL), driver);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.reason, CloseReason::TunnelClosed);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_tunnel_close_ends_relay() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (_stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let mut out = Vec::new();

        proxy.write_all(b"hello").await.unwrap();
        drop(proxy);

        let stats = relay(tunnel, stdin_rx, &mut out, &[], POLL).await;
        assert_eq!(stats.reason, CloseReason::TunnelClosed);
        assert_eq!(stats.received, 5);
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn test_leftover_written_first() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (_stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let mut out = Vec::new();

        proxy.write_all(b"KEXINIT").await.unwrap();
        drop(proxy);

        let stats = relay(tunnel, stdin_rx, &mut out, b"SSH-2.0-x\r\n", POLL).await;
        assert_eq!(out, b"SSH-2.0-x\r\nKEXINIT");
        assert_eq!(stats.received, out.len() as u64);
    }

    #[tokio::test]
    async fn test_input_eof_shuts_tunnel() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let mut out = Vec::new();

        let stats = relay(tunnel, &b"bye"[..], &mut out, &[], POLL).await;
        assert_eq!(stats.reason, CloseReason::InputClosed);
        assert_eq!(stats.sent, 3);

        let mut rest = Vec::new();
        proxy.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"bye");
    }

    #[tokio::test]
    async fn test_idle_poll_is_not_fatal() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (_stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let mut out = Vec::new();

        let driver = async {
            tokio::time::sleep(POLL * 5).await;
            proxy.write_all(b"late").await.unwrap();
            drop(proxy);
        };

        let (stats, ()) = tokio::join!(relay(tunnel, stdin_rx, &mut out, &[], POLL), driver);
        assert_eq!(stats.reason, CloseReason::TunnelClosed);
        assert_eq!(out, b"late");
    }

    #[tokio::test]
    async fn test_output_failure_ends_relay() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (_stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let (out_tx, out_rx) = duplex(BUF_SIZE);
        drop(out_rx);

        proxy.write_all(b"x").await.unwrap();

        let stats = relay(tunnel, stdin_rx, out_tx, &[], POLL).await;
        assert_eq!(stats.reason, CloseReason::OutputError);
        assert_eq!(stats.received, 0);
    }

    #[tokio::test]
    async fn test_both_directions_interleave() {
        let (tunnel, mut proxy) = duplex(BUF_SIZE);
        let (mut stdin_tx, stdin_rx) = duplex(BUF_SIZE);
        let (out_tx, mut out_rx) = duplex(BUF_SIZE);

        let driver = async {
            for round in 0..10u8 {
                stdin_tx.write_all(&[b'u', round]).await.unwrap();
                proxy.write_all(&[b'd', round]).await.unwrap();

                let mut up = [0u8; 2];
                proxy.read_exact(&mut up).await.unwrap();
                assert_eq!(up, [b'u', round]);

                let mut down = [0u8; 2];
                out_rx.read_exact(&mut down).await.unwrap();
                assert_eq!(down, [b'd', round]);
            }
            drop(stdin_tx);
        };

        let (stats, ()) = tokio::join!(relay(tunnel, stdin_rx, out_tx, &[], POLL), driver);
        assert_eq!(stats.reason, CloseReason::InputClosed);
        assert_eq!(stats.sent, 20);
        assert_eq!(stats.received, 20);
    }
}
