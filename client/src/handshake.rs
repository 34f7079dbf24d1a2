//! CONNECT handshake with the proxy
//!
//! `Idle → RequestSent → ResponseReceived → {Accepted | Rejected}`. Exactly
//! one attempt is made; every failure is final.

use proxytab_shared::protocol::{header_end, BUF_SIZE};
use proxytab_shared::{Error, HandshakeRequest, HandshakeResponse, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::TunnelConfig;

/// Where the negotiation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    RequestSent,
    ResponseReceived,
    Accepted,
    Rejected,
}

/// An accepted CONNECT
#[derive(Debug)]
pub struct Established {
    pub response: HandshakeResponse,
    /// Tunnel bytes that arrived in the same reads as the response headers
    pub leftover: Vec<u8>,
}

pub struct Negotiator {
    request: HandshakeRequest,
    timeout: Duration,
    state: HandshakeState,
}

impl Negotiator {
    pub fn new(config: &TunnelConfig) -> Self {
        let request = HandshakeRequest::connect(
            &config.destination.host,
            config.destination.port,
            config.credentials.as_ref(),
        );
        Self::with_request(request, config.timeout)
    }

    pub fn with_request(request: HandshakeRequest, timeout: Duration) -> Self {
        Self {
            request,
            timeout,
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run the handshake over an already connected stream
    pub async fn negotiate<S>(&mut self, stream: &mut S) -> Result<Established>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.send_request(stream).await?;

        let (response, leftover) = match self.read_response(stream).await {
            Ok(parsed) => parsed,
            Err(e) => {
                if self.state == HandshakeState::ResponseReceived {
                    self.state = HandshakeState::Rejected;
                }
                return Err(e);
            }
        };
        debug!("Parsed proxy response: {} ({})", response.code, response.reason);

        match response.into_result() {
            Ok(response) => {
                self.state = HandshakeState::Accepted;
                debug!("Handshake accepted, {} tunnel bytes already buffered", leftover.len());
                Ok(Established { response, leftover })
            }
            Err(e) => {
                self.state = HandshakeState::Rejected;
                warn!("Proxy refused CONNECT: {}", e);
                Err(e)
            }
        }
    }

    async fn send_request<S>(&mut self, stream: &mut S) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let request = self.request.as_bytes();
        timeout(self.timeout, async {
            stream.write_all(request).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::Timeout("sending CONNECT request"))??;

        self.state = HandshakeState::RequestSent;
        debug!("Sent {} byte request to proxy", self.request.as_bytes().len());
        Ok(())
    }

    /// Read until the blank line ending the response headers.
    async fn read_response<S>(&mut self, stream: &mut S) -> Result<(HandshakeResponse, Vec<u8>)>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; BUF_SIZE];
        let mut filled = 0;

        loop {
            let n = match timeout(self.timeout, stream.read(&mut buf[filled..])).await {
                Ok(res) => res?,
                Err(_) => {
                    return Err(early_refusal(&buf[..filled])
                        .unwrap_or(Error::Timeout("waiting for proxy response")));
                }
            };

            if n == 0 {
                // A refusal may be followed straight by a close; keep its reason
                if filled > 0 {
                    HandshakeResponse::parse(&buf[..filled])?.into_result()?;
                }
                return Err(Error::Closed("waiting for proxy response"));
            }

            filled += n;
            if self.state == HandshakeState::RequestSent {
                self.state = HandshakeState::ResponseReceived;
                debug!("Received response from proxy");
            }

            if let Some(end) = header_end(&buf[..filled]) {
                let response = HandshakeResponse::parse(&buf[..end])?;
                return Ok((response, buf[end..filled].to_vec()));
            }

            if filled == buf.len() {
                return Err(early_refusal(&buf[..filled])
                    .unwrap_or(Error::ResponseTooLarge(BUF_SIZE)));
            }
        }
    }
}

/// The proxy's own refusal, once a partial response holds a full status line
fn early_refusal(partial: &[u8]) -> Option<Error> {
    if !partial.contains(&b'\n') {
        return None;
    }
    match HandshakeResponse::parse(partial) {
        Ok(response) => response.into_result().err(),
        Err(e) => Some(e),
    }
}
