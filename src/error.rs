//! Unified error type.
//!
//! Application-level failures (a 404, a validation error) are expressed as
//! response status codes, not as `Error`s. This type surfaces contract
//! violations between the application and the listener — a malformed
//! content-length, a write past the declared body length — plus the
//! infrastructure failures underneath them.

use std::fmt;

/// The error type returned by trestle's fallible operations.
///
/// The contract-violation variants (`InvalidStatus`, `InvalidReason`,
/// `InvalidContentLength`, …) surface at commit time and degrade the
/// exchange to a 500 with an empty body when nothing has reached the wire
/// yet. The byte-count variants (`BodyOverrun`, `BodyUnderrun`) surface
/// mid-stream and abort the connection instead — headers cannot be unsent.
#[derive(Debug)]
pub enum Error {
    /// Socket-level failure: binding a port, accepting a connection.
    Io(std::io::Error),
    /// Failure inside the native HTTP engine.
    Transport(hyper::Error),
    /// An environment key the caller required is not present.
    MissingKey(String),
    /// An environment key is present but holds a different value kind.
    TypeMismatch {
        key: String,
        expected: &'static str,
    },
    /// The request method string is not a valid HTTP method.
    InvalidMethod(String),
    /// The reconstructed request URI does not parse.
    InvalidUri(String),
    /// The response status slot holds a non-integer, a value outside
    /// 100–999, or an informational code the transport cannot send.
    InvalidStatus(i64),
    /// The response reason-phrase slot holds a non-string or a string
    /// that cannot appear in an HTTP/1.1 status line.
    InvalidReason,
    /// A buffered response header has a name or value the transport
    /// rejects.
    InvalidHeader(String),
    /// The declared content-length is non-numeric, negative, or has
    /// conflicting duplicate values.
    InvalidContentLength(String),
    /// More bytes written than the declared content-length allows.
    BodyOverrun { declared: u64, written: u64 },
    /// The exchange completed with fewer bytes than declared.
    BodyUnderrun { declared: u64, written: u64 },
    /// The exchange was already aborted or completed; the operation has
    /// nowhere to go.
    Aborted,
    /// The application delegate failed (returned an error or panicked).
    App(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::MissingKey(key) => write!(f, "environment key `{key}` is missing"),
            Self::TypeMismatch { key, expected } => {
                write!(f, "environment key `{key}` is not a {expected}")
            }
            Self::InvalidMethod(m) => write!(f, "invalid request method `{m}`"),
            Self::InvalidUri(u) => write!(f, "invalid request uri `{u}`"),
            Self::InvalidStatus(code) => write!(f, "status code {code} cannot be sent"),
            Self::InvalidReason => write!(f, "reason phrase is not a sendable string"),
            Self::InvalidHeader(name) => write!(f, "header `{name}` cannot be sent"),
            Self::InvalidContentLength(v) => write!(f, "content-length `{v}` is not valid"),
            Self::BodyOverrun { declared, written } => {
                write!(f, "wrote {written} bytes with content-length {declared}")
            }
            Self::BodyUnderrun { declared, written } => {
                write!(f, "body ended at {written} bytes with content-length {declared}")
            }
            Self::Aborted => write!(f, "exchange already closed"),
            Self::App(msg) => write!(f, "application: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Self {
        Self::Transport(e)
    }
}

impl Error {
    /// Copies a commit-time fault so the same failure reaches both the
    /// caller that triggered commit and the listener waiting on the head.
    /// Only contract-violation variants are duplicated; carrier errors
    /// collapse to [`Error::Aborted`].
    pub(crate) fn fault_copy(&self) -> Error {
        match self {
            Self::MissingKey(k) => Self::MissingKey(k.clone()),
            Self::TypeMismatch { key, expected } => Self::TypeMismatch {
                key: key.clone(),
                expected: *expected,
            },
            Self::InvalidStatus(code) => Self::InvalidStatus(*code),
            Self::InvalidReason => Self::InvalidReason,
            Self::InvalidHeader(name) => Self::InvalidHeader(name.clone()),
            Self::InvalidContentLength(v) => Self::InvalidContentLength(v.clone()),
            Self::BodyOverrun { declared, written } => Self::BodyOverrun {
                declared: *declared,
                written: *written,
            },
            Self::BodyUnderrun { declared, written } => Self::BodyUnderrun {
                declared: *declared,
                written: *written,
            },
            Self::App(msg) => Self::App(msg.clone()),
            _ => Self::Aborted,
        }
    }
}
