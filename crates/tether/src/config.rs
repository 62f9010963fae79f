//! # Configuration
//!
//! Two layers:
//!
//! - `EndpointConfig`: the operator-facing string
//!   `type=tls; keystore=<path>; password_file=<path|/dev/stdin>; host=<h>; port=<n>`.
//! - `CommunicatorConfig`: where to listen plus the timing knobs of the
//!   channel and the collector.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tetherrpc::EndpointAddress;
use tetherrpc::TransportKind;

use crate::auth::Keystore;
use crate::auth::Password;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `key=value` pair could not be split.
    Malformed(String),
    UnknownKey(String),
    DuplicateKey(String),
    MissingKey(&'static str),
    BadValue { key: &'static str, value: String },
    /// Timing knobs that cannot work together.
    Inconsistent(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(part) => write!(f, "malformed setting '{}'", part),
            Self::UnknownKey(key) => write!(f, "unknown setting '{}'", key),
            Self::DuplicateKey(key) => write!(f, "setting '{}' given twice", key),
            Self::MissingKey(key) => write!(f, "missing setting '{}'", key),
            Self::BadValue { key, value } => write!(f, "bad value '{}' for '{}'", value, key),
            Self::Inconsistent(msg) => write!(f, "inconsistent configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A parsed endpoint configuration string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub transport: TransportKind,
    pub keystore: PathBuf,
    pub password_file: PathBuf,
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::new(self.transport, self.host.clone(), self.port)
    }

    /// Reads the password (from stdin for `/dev/stdin`) and opens the keystore.
    /// The password is scrubbed before this returns.
    pub fn load_identity(&self) -> crate::auth::Result<Keystore> {
        let mut password = Password::read_from(&self.password_file)?;
        Keystore::load(&self.keystore, &mut password)
    }
}

impl FromStr for EndpointConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let mut transport = None;
        let mut keystore = None;
        let mut password_file = None;
        let mut host = None;
        let mut port = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ConfigError::Malformed(part.to_string()))?;
            let (key, value) = (key.trim(), value.trim());
            let dup = || ConfigError::DuplicateKey(key.to_string());
            match key {
                "type" => {
                    let kind = value
                        .parse::<TransportKind>()
                        .map_err(|_| ConfigError::BadValue { key: "type", value: value.into() })?;
                    if transport.replace(kind).is_some() {
                        return Err(dup());
                    }
                }
                "keystore" => {
                    if keystore.replace(PathBuf::from(value)).is_some() {
                        return Err(dup());
                    }
                }
                "password_file" => {
                    if password_file.replace(PathBuf::from(value)).is_some() {
                        return Err(dup());
                    }
                }
                "host" => {
                    if value.is_empty() {
                        return Err(ConfigError::BadValue { key: "host", value: value.into() });
                    }
                    if host.replace(value.to_string()).is_some() {
                        return Err(dup());
                    }
                }
                "port" => {
                    let n = value
                        .parse::<u16>()
                        .map_err(|_| ConfigError::BadValue { key: "port", value: value.into() })?;
                    if port.replace(n).is_some() {
                        return Err(dup());
                    }
                }
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }

        Ok(Self {
            transport: transport.ok_or(ConfigError::MissingKey("type"))?,
            keystore: keystore.ok_or(ConfigError::MissingKey("keystore"))?,
            password_file: password_file.ok_or(ConfigError::MissingKey("password_file"))?,
            host: host.ok_or(ConfigError::MissingKey("host"))?,
            port: port.ok_or(ConfigError::MissingKey("port"))?,
        })
    }
}

impl fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={}; keystore={}; password_file={}; host={}; port={}",
            self.transport,
            self.keystore.display(),
            self.password_file.display(),
            self.host,
            self.port
        )
    }
}

/// Listening address and timing of a communicator.
#[derive(Debug, Clone)]
pub struct CommunicatorConfig {
    pub host: String,
    /// 0 picks a free port; the bound port is reported by `local_address`.
    pub port: u16,
    /// How long a holder's claim survives without renewal.
    pub lease_timeout: Duration,
    /// How often holders renew. At most half of `lease_timeout`.
    pub renew_interval: Duration,
    /// How often the owner reclaims expired leases.
    pub sweep_interval: Duration,
    /// Channels with no traffic for this long are torn down.
    pub idle_timeout: Duration,
    /// Upper bound on waiting for one reply.
    pub call_timeout: Duration,
    /// Send an explicit release when the last local handle to a proxy drops.
    pub release_on_drop: bool,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            lease_timeout: Duration::from_secs(30),
            renew_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(60),
            release_on_drop: true,
        }
    }
}

impl CommunicatorConfig {
    pub fn from_endpoint(endpoint: &EndpointConfig) -> Self {
        Self { host: endpoint.host.clone(), port: endpoint.port, ..Self::default() }
    }

    /// Upper bound on one renewal round, dialing included. A healthy owner
    /// is renewed at the start of every round, so the gap between its
    /// renewals stays under `renew_interval + renewal_timeout`, which is
    /// below `lease_timeout` however slow the other owners are.
    pub fn renewal_timeout(&self) -> Duration {
        self.lease_timeout.saturating_sub(self.renew_interval) / 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renew_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(ConfigError::Inconsistent("intervals must be non-zero".into()));
        }
        if self.renew_interval.saturating_mul(2) > self.lease_timeout {
            return Err(ConfigError::Inconsistent(format!(
                "renew interval {:?} is more than half the lease timeout {:?}",
                self.renew_interval, self.lease_timeout
            )));
        }
        if self.renewal_timeout().is_zero() {
            return Err(ConfigError::Inconsistent("lease timeout leaves no time to renew".into()));
        }
        if self.idle_timeout.is_zero() || self.call_timeout.is_zero() {
            return Err(ConfigError::Inconsistent("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}
