//! Configuration for proxytab
//!
//! Settings come from an optional proxytab.yml and the command line (which
//! wins), and are validated into an immutable [`TunnelConfig`].

use anyhow::{Context, Result};
use proxytab_shared::protocol::{DEFAULT_DEST_PORT, DEFAULT_PROXY_PORT};
use proxytab_shared::{Credentials, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on each handshake wait and on each idle relay poll
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Raw settings, as found in a config file or on the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxytabConfig {
    /// HTTP proxy, `host[:port]`
    pub proxy: Option<String>,

    /// Tunnel destination, `host[:port]`
    pub dest: Option<String>,

    /// Credential file for Basic proxy authentication
    pub auth_file: Option<PathBuf>,

    /// Handshake timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl ProxytabConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: ProxytabConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // Relative credential paths are relative to the config file
        if let (Some(auth), Some(dir)) = (&config.auth_file, path.parent()) {
            if auth.is_relative() {
                config.auth_file = Some(dir.join(auth));
            }
        }

        Ok(config)
    }

    /// Look for a config file in the working directory, then
    /// `<config dir>/proxytab/`, then the home directory
    pub fn find_config() -> Option<PathBuf> {
        let mut search = vec![PathBuf::new()];
        search.extend(dirs::config_dir().map(|dir| dir.join("proxytab")));
        search.extend(dirs::home_dir());
        first_config_in(&search)
    }

    /// Layer `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: ProxytabConfig) -> Self {
        Self {
            proxy: other.proxy.or(self.proxy),
            dest: other.dest.or(self.dest),
            auth_file: other.auth_file.or(self.auth_file),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
        }
    }

    /// Validate into the configuration the tunnel runs with
    pub fn build(self) -> Result<TunnelConfig> {
        let proxy = self
            .proxy
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing proxy specification"))?;
        let proxy = Endpoint::parse(proxy, DEFAULT_PROXY_PORT).context("invalid proxy specification")?;

        let dest = self
            .dest
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing dest specification"))?;
        let destination = Endpoint::parse(dest, DEFAULT_DEST_PORT).context("invalid dest specification")?;

        let credentials = match &self.auth_file {
            Some(path) => Some(load_credentials(path)?),
            None => None,
        };

        let secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if secs == 0 {
            anyhow::bail!("timeout must be at least one second");
        }
        let timeout = Duration::from_secs(secs);

        Ok(TunnelConfig {
            proxy,
            destination,
            credentials,
            timeout,
            poll_interval: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }
}

/// Everything needed to open and run one tunnel. Never changes once built.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub proxy: Endpoint,
    pub destination: Endpoint,
    pub credentials: Option<Credentials>,
    /// Bound on each handshake wait
    pub timeout: Duration,
    /// Idle re-poll interval in the relay
    pub poll_interval: Duration,
}

/// A `host:port` pair with a non-empty host and a port in 1..=65535
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `host[:port]`, falling back to `default_port`.
    ///
    /// IPv6 literals must be bracketed (`[::1]:22`); the brackets are not
    /// part of the stored host.
    pub fn parse(addr: &str, default_port: u16) -> proxytab_shared::Result<Self> {
        let invalid = |reason| Error::InvalidEndpoint {
            addr: addr.to_string(),
            reason,
        };

        let (host, port) = match addr.strip_prefix('[') {
            Some(rest) => {
                let (host, after) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
                if after.is_empty() {
                    (host, None)
                } else {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("unexpected text after ']'"))?;
                    (host, Some(port))
                }
            }
            None => match addr.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (addr, None),
            },
        };

        if host.is_empty() {
            return Err(invalid("host is empty"));
        }

        let port = match port {
            Some(port) => parse_port(port).ok_or_else(|| Error::InvalidPort(addr.to_string()))?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<u32>() {
        Ok(port @ 1..=65535) => Some(port as u16),
        _ => None,
    }
}

/// File names tried in each directory, in order
const CONFIG_NAMES: [&str; 5] = [
    "proxytab.yml",
    "proxytab.yaml",
    ".proxytab.yml",
    ".proxytab.yaml",
    "config.yml",
];

fn first_config_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

/// Read a `user\0pass` credential file in full and split it
pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let raw = std::fs::read(path)
        .with_context(|| format!("Failed to read auth file: {}", path.display()))?;
    Credentials::from_file_bytes(&raw)
        .with_context(|| format!("Invalid auth file: {}", path.display()))
}
