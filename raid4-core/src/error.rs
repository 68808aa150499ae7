// vim: tw=80
//! Error taxonomy for the RAID4 layout engine.
//!
//! Mirrors the C core's `pho_errno` idea: a small, flat set of causes that
//! every layer from the Mapper up through Locate can raise, plus a
//! human-readable message.  Hand-rolled rather than derived with `thiserror`,
//! matching this codebase's habit of writing its own `Error`/`Result` pair.

use std::{fmt, io};

/// Abstract error kinds, independent of which layer raised them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    IoFailed,
    ShortWrite,
    HashMismatch,
    Unsupported,
    NoSpace,
    ReadOnlyMedium,
    QuotaExceeded,
    NoRouteToObject,
    TryAgain,
    Cancelled,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NotFound => "not found",
            ErrorKind::IoFailed => "I/O failed",
            ErrorKind::ShortWrite => "short write",
            ErrorKind::HashMismatch => "hash mismatch",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::NoSpace => "no space left on medium",
            ErrorKind::ReadOnlyMedium => "medium is read-only",
            ErrorKind::QuotaExceeded => "quota exceeded",
            ErrorKind::NoRouteToObject => "no route to object",
            ErrorKind::TryAgain => "try again",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// A layout-engine error: a kind plus an optional free-form message.
///
/// `Error` is cheap to clone and compare, so it can be threaded through the
/// `Processor`'s step interface and stashed for later inspection (e.g. the
/// first error seen during `Cleanup`) without fighting the borrow checker.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, msg: None }
    }

    pub fn with_msg<S: Into<String>>(kind: ErrorKind, msg: S) -> Self {
        Error { kind, msg: Some(msg.into()) }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::InvalidInput, msg)
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::NotFound, msg)
    }

    pub fn io_failed<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::IoFailed, msg)
    }

    pub fn short_write() -> Self {
        Error::new(ErrorKind::ShortWrite)
    }

    pub fn hash_mismatch<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::HashMismatch, msg)
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::Unsupported, msg)
    }

    pub fn no_route_to_object<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::NoRouteToObject, msg)
    }

    pub fn try_again<S: Into<String>>(msg: S) -> Self {
        Error::with_msg(ErrorKind::TryAgain, msg)
    }

    pub fn cancelled() -> Self {
        Error::new(ErrorKind::Cancelled)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
impl Eq for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msg {
            Some(msg) => write!(f, "{}: {}", self.kind.as_str(), msg),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        use io::ErrorKind as K;
        let kind = match e.kind() {
            K::NotFound => ErrorKind::NotFound,
            K::PermissionDenied => ErrorKind::ReadOnlyMedium,
            K::AlreadyExists => ErrorKind::InvalidInput,
            K::InvalidInput | K::InvalidData => ErrorKind::InvalidInput,
            K::WouldBlock | K::Interrupted => ErrorKind::TryAgain,
            _ => ErrorKind::IoFailed,
        };
        Error::with_msg(kind, e.to_string())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        let kind = match e {
            nix::Error::ENOENT => ErrorKind::NotFound,
            nix::Error::ENOSPC => ErrorKind::NoSpace,
            nix::Error::EROFS => ErrorKind::ReadOnlyMedium,
            nix::Error::EDQUOT => ErrorKind::QuotaExceeded,
            nix::Error::EAGAIN => ErrorKind::TryAgain,
            nix::Error::EINVAL => ErrorKind::InvalidInput,
            nix::Error::ENOTSUP | nix::Error::EOPNOTSUPP => ErrorKind::Unsupported,
            _ => ErrorKind::IoFailed,
        };
        Error::with_msg(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
