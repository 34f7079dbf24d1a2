//! Error types for proxytab.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid address '{addr}': {reason}")]
    InvalidEndpoint { addr: String, reason: &'static str },

    #[error("Invalid port in '{0}': port is not in valid range")]
    InvalidPort(String),

    #[error("Invalid authentication specification: {0}")]
    InvalidCredentials(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Proxy closed the connection while {0}")]
    Closed(&'static str),

    #[error("Error parsing proxy response: {0}")]
    MalformedResponse(String),

    #[error("Proxy response headers exceed {0} bytes")]
    ResponseTooLarge(usize),

    #[error("Error negotiating with proxy: {code} {reason}")]
    Rejected { code: u16, reason: String },

    #[error("Invalid HTTP protocol version returned by proxy: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
