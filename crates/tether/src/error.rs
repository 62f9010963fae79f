//! # Error Definitions
//!
//! The one error type application code sees for anything that went wrong
//! below the application-logic layer.
//!
//! An `Error` pairs a short context string naming the attempted operation
//! with the original `Cause`. `kind()` collapses the cause into the category
//! a caller can act on.

use std::fmt;

use tetherrpc::Failure;
use tetherrpc::FailureKind;

use crate::auth;
use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::marshal::MarshalError;
use crate::peer;
use crate::transport;

/// What a caller can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A channel could not be opened, broke mid-call, timed out, or the
    /// communicator was shut down. Never retried automatically.
    Connectivity,
    /// The peer's certificate was absent from the whitelist, malformed or
    /// expired, or a local credential could not be opened.
    Authentication,
    /// A value could not be marshalled or unmarshalled.
    Marshal,
    /// The remote operation itself failed.
    RemoteApplication,
    /// Malformed or unexpected wire data.
    Protocol,
    /// Invalid configuration or capability declarations.
    Configuration,
}

/// The original failure wrapped by an `Error`.
#[derive(Debug)]
pub enum Cause {
    Transport(transport::Error),
    Auth(auth::Error),
    Marshal(MarshalError),
    /// The remote side answered with a failure.
    Failed(Failure),
    Wire(tetherrpc::Error),
    Config(ConfigError),
    Catalog(CatalogError),
    Io(std::io::Error),
    Timeout,
    Closed,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}", e),
            Self::Auth(e) => write!(f, "{}", e),
            Self::Marshal(e) => write!(f, "{}", e),
            Self::Failed(failure) => write!(f, "remote failure: {}", failure),
            Self::Wire(e) => write!(f, "{}", e),
            Self::Config(e) => write!(f, "{}", e),
            Self::Catalog(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "i/o error: {}", e),
            Self::Timeout => write!(f, "call timed out"),
            Self::Closed => write!(f, "communicator is shut down"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    context: String,
    cause: Cause,
}

impl Error {
    pub fn new(context: impl Into<String>, cause: Cause) -> Self {
        Self { context: context.into(), cause }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn into_cause(self) -> Cause {
        self.cause
    }

    /// Replaces the context, keeping the cause.
    pub fn within(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.cause {
            Cause::Transport(_) | Cause::Io(_) | Cause::Timeout | Cause::Closed => ErrorKind::Connectivity,
            Cause::Auth(_) => ErrorKind::Authentication,
            Cause::Marshal(_) => ErrorKind::Marshal,
            Cause::Failed(failure) => match failure.kind {
                FailureKind::Marshal => ErrorKind::Marshal,
                FailureKind::Unavailable => ErrorKind::Connectivity,
                _ => ErrorKind::RemoteApplication,
            },
            Cause::Wire(_) => ErrorKind::Protocol,
            Cause::Config(_) | Cause::Catalog(_) => ErrorKind::Configuration,
        }
    }

    /// The remote failure, if the remote side answered with one.
    pub fn failure(&self) -> Option<&Failure> {
        match &self.cause {
            Cause::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// The domain error kind of a remote application failure.
    pub fn application_kind(&self) -> Option<&str> {
        match self.failure().map(|f| &f.kind) {
            Some(FailureKind::Application(kind)) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn closed(context: impl Into<String>) -> Self {
        Self::new(context, Cause::Closed)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Cause::Transport(e) => Some(e),
            Cause::Auth(e) => Some(e),
            Cause::Marshal(e) => Some(e),
            Cause::Wire(e) => Some(e),
            Cause::Config(e) => Some(e),
            Cause::Catalog(e) => Some(e),
            Cause::Io(e) => Some(e),
            Cause::Failed(_) | Cause::Timeout | Cause::Closed => None,
        }
    }
}

impl From<peer::Error> for Cause {
    fn from(e: peer::Error) -> Self {
        match e {
            peer::Error::Transport(e) => Self::Transport(e),
            peer::Error::Wire(e) => Self::Wire(e),
            peer::Error::Failed(failure) => Self::Failed(failure),
            peer::Error::Timeout => Self::Timeout,
            peer::Error::Closed => Self::Closed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
