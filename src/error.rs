//! Error types shared across the request pipeline.
//!
//! Parsing problems are resolved locally wherever the input is merely
//! ambiguous. Anything that must become a client-visible response is raised as
//! an [`HttpError`], which carries the status code to answer with.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::http::response::StatusCode;

/// Failures of the raw request buffer.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A read that needs the complete request ran while bytes were still arriving.
    #[error("request content is still receiving bytes")]
    NotComplete,

    /// `add_bytes` after `done_adding_bytes`.
    #[error("request content is already complete")]
    AlreadyComplete,

    #[error("offset {offset} + {requested} is past the end of {len} buffered bytes")]
    OutOfRange {
        offset: usize,
        requested: usize,
        len: usize,
    },

    /// Temp file creation, write or read failed.
    #[error("temp file i/o failed: {0}")]
    Disk(#[source] io::Error),
}

/// Misuse of a [`Response`](crate::http::response::Response) by a handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("headers have already been sent")]
    HeadersAlreadySent,
}

/// Broad classification of an [`HttpError`], rendered on error pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    PayloadTooLarge,
    Disk,
    Contract,
    Unauthorized,
    NotFound,
    Timeout,
    Handler,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::Disk => "DiskError",
            ErrorKind::Contract => "ContractViolation",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Handler => "HandlerError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that becomes an HTTP response with `status`.
#[derive(Debug, Error)]
#[error("{} {}: {message}", status.as_u16(), status.reason_phrase())]
pub struct HttpError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HttpError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadRequest, ErrorKind::Protocol, message)
    }

    pub fn length_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::LengthRequired, ErrorKind::Protocol, message)
    }

    /// `status` is configurable because older deployments answer oversize
    /// uploads with 500 rather than 413.
    pub fn payload_too_large(status: StatusCode, declared: usize, max: usize) -> Self {
        Self::new(
            status,
            ErrorKind::PayloadTooLarge,
            format!("request of {declared} bytes exceeds the limit of {max} bytes"),
        )
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(
            StatusCode::NotFound,
            ErrorKind::NotFound,
            format!("no resource at {path}"),
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthorized, ErrorKind::Unauthorized, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::RequestTimeout, ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalServerError, ErrorKind::Handler, message)
    }
}

impl From<BufferError> for HttpError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Disk(_) => {
                HttpError::new(StatusCode::InternalServerError, ErrorKind::Disk, "disk error")
                    .with_source(err)
            }
            other => HttpError::new(
                StatusCode::InternalServerError,
                ErrorKind::Contract,
                other.to_string(),
            ),
        }
    }
}

impl From<ResponseError> for HttpError {
    fn from(err: ResponseError) -> Self {
        HttpError::new(
            StatusCode::InternalServerError,
            ErrorKind::Contract,
            err.to_string(),
        )
    }
}

/// How a single connection's request/response cycle ended abnormally.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer went away. Expected client behaviour, never escalated.
    #[error("client disconnected")]
    Disconnected,

    #[error("timed out waiting for the client")]
    TimedOut,

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<BufferError> for WireError {
    fn from(err: BufferError) -> Self {
        WireError::Http(err.into())
    }
}
