//! HTTP Basic proxy credentials.
//!
//! Credentials are loaded from a file holding `<username>\0<password>` and
//! sent as a `Proxy-Authorization: Basic` header value.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{Error, Result};

/// Separator between username and password in a credential file.
pub const CREDENTIAL_SEPARATOR: u8 = 0;

/// Username/password pair for Basic proxy authentication.
///
/// Both halves are raw bytes: credential files are not required to be UTF-8.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    pub fn new(username: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse the contents of a credential file.
    ///
    /// Only the first NUL byte separates the two fields; any later NUL bytes
    /// belong to the password.
    pub fn from_file_bytes(bytes: &[u8]) -> Result<Self> {
        let sep = bytes
            .iter()
            .position(|&b| b == CREDENTIAL_SEPARATOR)
            .ok_or_else(|| Error::InvalidCredentials("no NUL separator".into()))?;

        Ok(Self::new(&bytes[..sep], &bytes[sep + 1..]))
    }

    /// Serialize back into the credential file layout.
    #[cfg(test)]
    fn to_file_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.username.len() + 1 + self.password.len());
        out.extend_from_slice(&self.username);
        out.push(CREDENTIAL_SEPARATOR);
        out.extend_from_slice(&self.password);
        out
    }

    pub fn username(&self) -> &[u8] {
        &self.username
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    /// Base64 of `username:password`, as used after `Basic ` in the header.
    pub fn basic_token(&self) -> String {
        let mut plain = Vec::with_capacity(self.username.len() + 1 + self.password.len());
        plain.extend_from_slice(&self.username);
        plain.push(b':');
        plain.extend_from_slice(&self.password);
        STANDARD.encode(plain)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential_file() {
        let creds = Credentials::from_file_bytes(b"alice\0s3cret").unwrap();
        assert_eq!(creds.username(), b"alice");
        assert_eq!(creds.password(), b"s3cret");
    }

    #[test]
    fn test_only_first_nul_separates() {
        let raw = b"bob\0pa\0ss\0";
        let creds = Credentials::from_file_bytes(raw).unwrap();
        assert_eq!(creds.username(), b"bob");
        assert_eq!(creds.password(), b"pa\0ss\0");
        assert_eq!(creds.to_file_bytes(), raw.to_vec());
    }

    #[test]
    fn test_empty_fields() {
        let creds = Credentials::from_file_bytes(b"\0").unwrap();
        assert!(creds.username().is_empty());
        assert!(creds.password().is_empty());

        let creds = Credentials::from_file_bytes(b"user\0").unwrap();
        assert_eq!(creds.username(), b"user");
        assert!(creds.password().is_empty());
    }

    #[test]
    fn test_missing_separator() {
        let err = Credentials::from_file_bytes(b"user:pass\n").unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));
        assert!(Credentials::from_file_bytes(b"").is_err());
    }

    #[test]
    fn test_file_bytes_round_trip() {
        for raw in [&b"a\0b"[..], b"\0secret", b"name\0", b"x\0y\0z"] {
            let creds = Credentials::from_file_bytes(raw).unwrap();
            assert_eq!(creds.to_file_bytes(), raw);
        }
    }

    #[test]
    fn test_basic_token() {
        // RFC 7617 example
        let creds = Credentials::new("Aladdin", "open sesame");
        assert_eq!(creds.basic_token(), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");

        let creds = Credentials::new("user", "p:w");
        let decoded = STANDARD.decode(creds.basic_token()).unwrap();
        assert_eq!(decoded, b"user:p:w");
    }

    #[test]
    fn test_debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
