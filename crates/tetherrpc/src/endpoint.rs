//! # Endpoint Identity
//!
//! Immutable values naming a reachable process. They are map keys everywhere:
//! channel registries, holder sets, lease tables.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How an endpoint is reached. Authenticated TCP is the only transport today.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportKind {
    Tls,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tls => "tls",
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "tls" => Ok(Self::Tls),
            other => Err(Error::BadAddress(format!("unknown transport '{}'", other))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport, host and port of a process. Constructed once, never mutated.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EndpointAddress {
    transport: TransportKind,
    host: String,
    port: u16,
}

impl EndpointAddress {
    pub fn new(transport: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Self { transport, host: host.into(), port }
    }

    /// Shorthand for an authenticated TCP endpoint.
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self::new(TransportKind::Tls, host, port)
    }

    pub fn transport(&self) -> TransportKind { self.transport }
    pub fn host(&self) -> &str { &self.host }
    pub fn port(&self) -> u16 { self.port }

    /// `host:port`, suitable for socket connect calls.
    pub fn socket_target(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.transport, self.socket_target())
    }
}

impl FromStr for EndpointAddress {
    type Err = Error;

    /// Parses `tls://host:port` (IPv6 hosts in brackets).
    fn from_str(s: &str) -> Result<Self, Error> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::BadAddress(format!("missing scheme in '{}'", s)))?;
        let transport = scheme.parse()?;

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::BadAddress(format!("unclosed '[' in '{}'", s)))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Error::BadAddress(format!("missing port in '{}'", s)))?;
            (host, port)
        } else {
            rest.rsplit_once(':')
                .ok_or_else(|| Error::BadAddress(format!("missing port in '{}'", s)))?
        };

        if host.is_empty() {
            return Err(Error::BadAddress(format!("empty host in '{}'", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::BadAddress(format!("bad port '{}'", port)))?;

        Ok(Self::new(transport, host, port))
    }
}
