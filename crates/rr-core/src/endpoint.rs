//! Network endpoint of a cluster node

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::PartitionError;

/// Default connect/command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Address of a node plus the settings needed to connect to it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Credential sent with `AUTH` after connecting
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-resolved socket address, used instead of `host` when present
    #[serde(default)]
    pub resolved: Option<SocketAddr>,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            resolved: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_resolved(mut self, addr: SocketAddr) -> Self {
        self.resolved = Some(addr);
        self
    }

    /// `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Password if set and non-empty
    pub fn credential(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    /// Deterministic ordering: host, then port
    pub fn cmp_by_address(&self, other: &Endpoint) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.port.cmp(&other.port))
    }
}

/// Sort endpoints by host then port
pub fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(|a, b| a.cmp_by_address(b));
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = PartitionError;

    /// Parse `host:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PartitionError::InvalidEndpoint(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| PartitionError::InvalidEndpoint(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(PartitionError::InvalidEndpoint(s.to_string()));
        }
        Ok(Endpoint::new(host, port))
    }
}
