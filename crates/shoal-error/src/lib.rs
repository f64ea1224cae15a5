#![forbid(unsafe_code)]
//! Error types for the shoalfs workspace.
//!
//! Defines the closed set of domain error kinds, the `PathError` envelope
//! carrying the failing operation and path, and predicates that inspect the
//! innermost cause of a nested error chain so callers can stay
//! backend-agnostic.

use std::io;
use thiserror::Error;

/// Domain error kinds shared by every backend.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The open flags combine an invalid set of bits, e.g. write-only
    /// together with read-write.
    #[error("invalid combination of open flags")]
    InvalidFlags,

    /// A seek would move the offset before the beginning of the file.
    #[error("seek before beginning of file")]
    InvalidSeek,

    /// A seek origin outside the supported set.
    #[error("invalid value for whence")]
    InvalidWhence,

    /// An invalid size was given, e.g. a truncate beyond the current end.
    #[error("invalid size")]
    InvalidSize,

    /// An operation requiring write access was attempted on a handle that
    /// is open read-only.
    #[error("file is open read only")]
    ReadOnly,

    /// An operation requiring read access was attempted on a handle that
    /// is open write-only.
    #[error("file is open write only")]
    WriteOnly,

    /// The file exists but an exclusive create was requested.
    #[error("file already exists")]
    Exists,

    /// The file does not exist.
    #[error("no such file or directory")]
    NotExist,

    /// A directory operation was attempted on a non-directory.
    #[error("not a directory")]
    NotDir,

    /// File I/O (read, write, seek) was attempted on a directory.
    #[error("is a directory")]
    IsDir,

    /// The handle or filesystem was already closed.
    #[error("file already closed")]
    Closed,

    /// A glob pattern was malformed.
    #[error("syntax error in pattern")]
    BadPattern,

    /// A write landed fewer bytes than requested.
    #[error("short write")]
    ShortWrite,
}

/// Error type returned by all vfs operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A bare domain kind, returned by pure validators such as the open-flag
    /// check.
    #[error(transparent)]
    Kind(#[from] ErrorKind),

    /// A kind wrapped with the operation and path that produced it.
    #[error(transparent)]
    Path(#[from] Box<PathError>),

    /// A host I/O error surfaced by the passthrough backend.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An error annotated with the failing operation name and the offending path.
#[derive(Debug, Error)]
#[error("{op} {path}: {source}")]
pub struct PathError {
    /// Name of the operation where the error occurred.
    pub op: &'static str,
    /// The path that caused the error.
    pub path: String,
    /// The underlying error.
    pub source: Error,
}

impl Error {
    /// Wrap this error in a [`PathError`] carrying the operation name and
    /// path.
    #[must_use]
    pub fn with_path(self, op: &'static str, path: impl Into<String>) -> Self {
        Self::Path(Box::new(PathError {
            op,
            path: path.into(),
            source: self,
        }))
    }

    /// The innermost cause, unwrapping nested [`PathError`] envelopes.
    #[must_use]
    pub fn cause(&self) -> &Self {
        match self {
            Self::Path(pe) => pe.source.cause(),
            other => other,
        }
    }

    /// The innermost domain kind, if the cause is a domain error.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self.cause() {
            Self::Kind(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Whether the innermost cause of `err` is the domain kind `kind`.
#[must_use]
pub fn is_kind(err: &Error, kind: ErrorKind) -> bool {
    err.kind() == Some(kind)
}

/// Whether `err` reports that a file or directory already exists.
///
/// Satisfied by [`ErrorKind::Exists`] as well as the host operating system
/// equivalent, so callers need not know which backend produced the error.
#[must_use]
pub fn is_exist(err: &Error) -> bool {
    match err.cause() {
        Error::Kind(ErrorKind::Exists) => true,
        Error::Io(io_err) => io_err.kind() == io::ErrorKind::AlreadyExists,
        _ => false,
    }
}

/// Whether `err` reports that a file or directory does not exist.
///
/// Satisfied by [`ErrorKind::NotExist`] as well as the host operating system
/// equivalent.
#[must_use]
pub fn is_not_exist(err: &Error) -> bool {
    match err.cause() {
        Error::Kind(ErrorKind::NotExist) => true,
        Error::Io(io_err) => io_err.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Result alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
