//! # Error Definitions
//!
//! Failures of the wire layer itself, and the failure payload a Result frame
//! carries back when the remote side could not produce a value.

use tetherpack::Error as PackError;

/// Operational failures within the wire mechanism.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying tetherpack encoding failed.
    Pack(PackError),
    /// An unknown frame, target, failure kind or value tag was encountered.
    UnknownVariant(String),
    /// A required field was absent.
    MissingField(&'static str),
    /// The message was structurally valid but semantically wrong.
    ProtocolViolation(String),
    /// Value nesting exceeded `MAX_DEPTH`.
    RecursionLimitExceeded,
    /// An endpoint address string could not be parsed.
    BadAddress(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pack(e) => write!(f, "encoding error: {}", e),
            Self::UnknownVariant(v) => write!(f, "unknown variant: {}", v),
            Self::MissingField(name) => write!(f, "missing field: {}", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::RecursionLimitExceeded => write!(f, "value nesting too deep"),
            Self::BadAddress(msg) => write!(f, "bad endpoint address: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pack(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Pack(e) }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a remote invocation produced no value.
///
/// These are distinct from `Error`: they describe the *remote* side failing
/// to carry out the call, whereas `Error` describes the wire failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The invoked operation returned a domain error of the named kind.
    Application(String),
    /// The target object id is not (or no longer) in the owner's table.
    NoSuchObject,
    /// The object does not implement the selector.
    NoSuchMethod,
    /// No task of that name is registered at the destination.
    NoSuchTask,
    /// Arguments did not match what the operation expects.
    BadArguments,
    /// The result (or the arguments) could not be marshalled.
    Marshal,
    /// The destination is shutting down or cannot serve the call.
    Unavailable,
}

impl FailureKind {
    pub(crate) fn wire_name(&self) -> &str {
        match self {
            Self::Application(_) => "App",
            Self::NoSuchObject => "NoObject",
            Self::NoSuchMethod => "NoMethod",
            Self::NoSuchTask => "NoTask",
            Self::BadArguments => "BadArgs",
            Self::Marshal => "Marshal",
            Self::Unavailable => "Unavailable",
        }
    }
}

/// The Err side of a Result frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FailureKind::Application(kind) => write!(f, "{}: {}", kind, self.message),
            other => write!(f, "{:?}: {}", other, self.message),
        }
    }
}
