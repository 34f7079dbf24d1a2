//! Proxytab Shared Library
//!
//! CONNECT request/response codec, Basic credentials, and error types.

pub mod credentials;
pub mod error;
pub mod protocol;

pub use credentials::Credentials;
pub use error::{Error, Result};
pub use protocol::{HandshakeRequest, HandshakeResponse};
