//! HTTP CONNECT handshake codec.
//!
//! Builds the CONNECT request sent to the proxy and parses the status line
//! the proxy answers with. Nothing past the status line is interpreted: once
//! the proxy accepts, the connection is an opaque byte pipe.

use std::fmt;

use crate::{Credentials, Error, Result};

/// Size of the handshake response buffer and of each relay read.
pub const BUF_SIZE: usize = 4096;

/// HTTP version spoken in the CONNECT request line
pub const HTTP_VERSION: &str = "1.0";

/// Default proxy port when `host[:port]` omits one
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Default destination port (ssh)
pub const DEFAULT_DEST_PORT: u16 = 22;

const CRLF: &[u8] = b"\r\n";

/// A fully assembled CONNECT request, ready to be written in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    bytes: Vec<u8>,
}

impl HandshakeRequest {
    /// Build `CONNECT host:port HTTP/1.0`, an optional `Proxy-Authorization`
    /// line, and the terminating blank line.
    pub fn connect(host: &str, port: u16, credentials: Option<&Credentials>) -> Self {
        let mut bytes = Vec::with_capacity(128);

        let line = if host.contains(':') {
            format!("CONNECT [{}]:{} HTTP/{}", host, port, HTTP_VERSION)
        } else {
            format!("CONNECT {}:{} HTTP/{}", host, port, HTTP_VERSION)
        };
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(CRLF);

        if let Some(creds) = credentials {
            bytes.extend_from_slice(b"Proxy-Authorization: Basic ");
            bytes.extend_from_slice(creds.basic_token().as_bytes());
            bytes.extend_from_slice(CRLF);
        }

        bytes.extend_from_slice(CRLF);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Parsed proxy status line: `HTTP/<major>.<minor> <code> <reason>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub major: u32,
    pub minor: u32,
    pub code: u16,
    pub reason: String,
}

impl HandshakeResponse {
    /// Parse the first line of a proxy response.
    ///
    /// All four fields must be present. The reason phrase runs to the end of
    /// the line and excludes the `\r\n` / `\n` terminator.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let line = match buf.iter().position(|&b| b == b'\n') {
            Some(end) => &buf[..end],
            None => buf,
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = String::from_utf8_lossy(line);

        let malformed = || Error::MalformedResponse(format!("'{}'", line.escape_debug()));

        let rest = line.strip_prefix("HTTP/").ok_or_else(malformed)?;
        let (version, rest) = rest.split_once(char::is_whitespace).ok_or_else(malformed)?;
        let (major, minor) = version.split_once('.').ok_or_else(malformed)?;
        let major = parse_number::<u32>(major).ok_or_else(malformed)?;
        let minor = parse_number::<u32>(minor).ok_or_else(malformed)?;

        let (code, reason) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(malformed)?;
        let code = parse_number::<u16>(code).ok_or_else(malformed)?;

        let reason = reason.trim_start();
        if reason.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            major,
            minor,
            code,
            reason: reason.to_string(),
        })
    }

    /// Whether the proxy agreed to open the tunnel.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code) && self.major >= 1
    }

    /// Turn a refusal into the matching error.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        if !(200..300).contains(&self.code) {
            return Err(Error::Rejected {
                code: self.code,
                reason: self.reason,
            });
        }
        Err(Error::UnsupportedVersion {
            major: self.major,
            minor: self.minor,
        })
    }
}

impl fmt::Display for HandshakeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{} {} {}", self.major, self.minor, self.code, self.reason)
    }
}

/// Offset just past the blank line ending the response headers, if the
/// buffer holds one. Accepts both `\r\n\r\n` and bare `\n\n`.
pub fn header_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn parse_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
