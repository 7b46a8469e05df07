use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::constants::*;

/// Status codes carried by SSH_FXP_STATUS responses.
///
/// Codes above the version-3 range are passed through opaquely as
/// [`StatusCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusCode {
    /// SSH_FX_OK: success.
    Ok,
    /// SSH_FX_EOF: end of file or directory.
    Eof,
    /// SSH_FX_NO_SUCH_FILE: the path does not exist.
    NoSuchFile,
    /// SSH_FX_PERMISSION_DENIED: insufficient rights.
    PermissionDenied,
    /// SSH_FX_FAILURE: generic failure.
    Failure,
    /// SSH_FX_BAD_MESSAGE: the server could not parse our packet.
    BadMessage,
    /// SSH_FX_NO_CONNECTION: no connection to the server.
    NoConnection,
    /// SSH_FX_CONNECTION_LOST: the server lost its connection.
    ConnectionLost,
    /// SSH_FX_OP_UNSUPPORTED: the server does not implement the operation.
    OpUnsupported,
    /// A code outside the version-3 range, passed through opaquely.
    Other(u32),
}

impl StatusCode {
    pub(crate) fn from_wire(code: u32) -> Self {
        match code {
            SSH_FX_OK => StatusCode::Ok,
            SSH_FX_EOF => StatusCode::Eof,
            SSH_FX_NO_SUCH_FILE => StatusCode::NoSuchFile,
            SSH_FX_PERMISSION_DENIED => StatusCode::PermissionDenied,
            SSH_FX_FAILURE => StatusCode::Failure,
            SSH_FX_BAD_MESSAGE => StatusCode::BadMessage,
            SSH_FX_NO_CONNECTION => StatusCode::NoConnection,
            SSH_FX_CONNECTION_LOST => StatusCode::ConnectionLost,
            SSH_FX_OP_UNSUPPORTED => StatusCode::OpUnsupported,
            other => StatusCode::Other(other),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::Eof => "end of file",
            StatusCode::NoSuchFile => "no such file",
            StatusCode::PermissionDenied => "permission denied",
            StatusCode::Failure => "failure",
            StatusCode::BadMessage => "bad message",
            StatusCode::NoConnection => "no connection",
            StatusCode::ConnectionLost => "connection lost",
            StatusCode::OpUnsupported => "operation unsupported",
            StatusCode::Other(_) => "unknown status",
        }
    }
}

/// A non-OK, non-EOF status response: the code plus the server's
/// human-readable message.
#[derive(Debug, Error)]
#[error("sftp: {} ({message})", .code.as_str())]
pub struct StatusError {
    /// The status code the server reported.
    pub code: StatusCode,
    /// The server's human-readable error message, possibly empty.
    pub message: String,
}

/// Errors produced by the engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// End of file. Returned by itself, never wrapped, so callers can match
    /// on it directly.
    #[error("end of file")]
    Eof,

    /// I/O error on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The connection reader has terminated; every subsequent call returns
    /// this. [`crate::Sftp::wait`] yields the root cause.
    #[error("sftp connection lost")]
    ConnectionLost,

    /// Operation on a file or directory handle that was already closed.
    #[error("sftp file or directory handle already closed")]
    HandleClosed,

    /// The server negotiated a protocol version this crate does not speak.
    #[error("server speaks unsupported sftp protocol version {version}")]
    UnsupportedVersion { version: u32 },

    /// An inbound frame exceeded the negotiated packet length.
    #[error("packet of {len} bytes exceeds the limit of {limit} bytes")]
    PacketTooLong { len: u32, limit: u32 },

    /// Structurally invalid packet.
    #[error("malformed packet: {0}")]
    BadMessage(&'static str),

    /// A reply of a type the pending request cannot accept.
    #[error("unexpected packet type {actual}")]
    UnexpectedPacket { actual: u8 },

    /// A reply whose request id does not match the request it was routed to.
    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: u32, actual: u32 },

    /// The server did not advertise the extension this operation requires.
    #[error("server does not support the {0} extension")]
    UnsupportedExtension(&'static str),

    /// Seek to a negative or overflowing absolute position.
    #[error("invalid seek to a negative or overflowing position")]
    InvalidSeek,

    /// Error status from the server.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// A pipelined transfer stopped partway; `transferred` bytes before the
    /// first failing offset are known committed.
    #[error("transfer stopped after {transferred} bytes")]
    Partial {
        transferred: u64,
        #[source]
        source: Box<Error>,
    },

    /// An operation annotated with its name and the path involved.
    #[error("{op} {path:?}")]
    Path {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap with the operation name and path, leaving the EOF sentinel bare.
    pub(crate) fn with_path(self, op: &'static str, path: impl Into<String>) -> Self {
        match self {
            Error::Eof => Error::Eof,
            source => Error::Path {
                op,
                path: path.into(),
                source: Box::new(source),
            },
        }
    }

    /// The status code at the root of this error, if it came from a STATUS
    /// response. Traverses `Partial` and `Path` wrappers.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Error::Eof => Some(StatusCode::Eof),
            Error::Status(status) => Some(status.code),
            Error::Partial { source, .. } | Error::Path { source, .. } => source.status_code(),
            _ => None,
        }
    }

    /// True when the root cause is the server reporting a missing file.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NoSuchFile)
    }

    /// True when the root cause is the server denying permission.
    pub fn is_permission_denied(&self) -> bool {
        self.status_code() == Some(StatusCode::PermissionDenied)
    }

    /// True when this is the bare end-of-file sentinel.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }

    /// Bytes known committed before a partial transfer failed.
    pub fn transferred(&self) -> Option<u64> {
        match self {
            Error::Partial { transferred, .. } => Some(*transferred),
            Error::Path { source, .. } => source.transferred(),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match &err {
            Error::Eof => io::ErrorKind::UnexpectedEof,
            Error::Io(e) => e.kind(),
            Error::ConnectionLost => io::ErrorKind::ConnectionAborted,
            Error::InvalidSeek => io::ErrorKind::InvalidInput,
            _ if err.is_not_found() => io::ErrorKind::NotFound,
            _ if err.is_permission_denied() => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl From<Arc<Error>> for Error {
    fn from(err: Arc<Error>) -> Error {
        // The shared terminal error stays on the connection; callers get the
        // canonical connection-lost sentinel with the cause preserved for
        // I/O failures.
        match &*err {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            _ => Error::ConnectionLost,
        }
    }
}
