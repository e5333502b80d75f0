use std::fmt;

/// A single remote endpoint, identified by address and port.
///
/// Hosts are immutable and compared by value. A pool is bound to exactly
/// one host for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    address: String,
    port: u16,
}

/// Error returned when a `host:port` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid host:port '{0}'")]
pub struct InvalidHost(pub String);

impl Host {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// The "no host" sentinel (`0.0.0.0:0`), used on errors raised before a
    /// pool is bound to a real endpoint.
    pub fn none() -> Self {
        Self::new("0.0.0.0", 0)
    }

    /// Parse an `address:port` string.
    pub fn parse(hostport: &str) -> Result<Self, InvalidHost> {
        let (address, port) = hostport
            .rsplit_once(':')
            .ok_or_else(|| InvalidHost(hostport.to_string()))?;
        if address.is_empty() {
            return Err(InvalidHost(hostport.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidHost(hostport.to_string()))?;
        Ok(Self::new(address, port))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_none(&self) -> bool {
        self.port == 0 && self.address == "0.0.0.0"
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
