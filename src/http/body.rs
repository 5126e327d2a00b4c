//! Reading a complete request off the socket.
//!
//! The head is read until the blank line. After that exactly
//! `Content-Length` more bytes are read, never more, so a pipelined request
//! that follows stays untouched. Bytes that arrived early together with the
//! head are kept in the caller's `carry` buffer for the next request.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use tracing::debug;

use crate::error::{HttpError, WireError};
use crate::http::multipart::{MultipartError, parse_boundary, split_parts};
use crate::http::parser::{find_headers_end, parse_content_length};
use crate::http::raw::RawRequestContent;
use crate::http::request::{Request, parse_urlencoded};
use crate::http::response::StatusCode;
use crate::http::writer::send_continue;
use crate::server::socket::{Socket, Transport, is_disconnect};

/// Default size of a single body read.
pub const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Request heads larger than this are rejected outright.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Polls for late bytes on a POST that declared no length.
const LENGTH_RETRY_LIMIT: u32 = 5;
const LENGTH_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Limits and locations used while reading one request.
#[derive(Debug, Clone)]
pub struct ReadSettings {
    pub temp_root: PathBuf,
    pub disk_threshold: usize,
    pub max_request_length: usize,
    /// Status answered when `max_request_length` is exceeded.
    pub oversize_status: StatusCode,
    /// Longest wait for a single read.
    pub body_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ReadSettings {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            disk_threshold: crate::http::raw::DEFAULT_DISK_THRESHOLD,
            max_request_length: 4 * 1024 * 1024,
            oversize_status: StatusCode::PayloadTooLarge,
            body_timeout: Duration::from_secs(30),
            chunk_size: READ_CHUNK_SIZE,
        }
    }
}

async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<T, WireError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) if is_disconnect(&e) => Err(WireError::Disconnected),
        Ok(Err(e)) => Err(WireError::Io(e)),
        Err(_) => Err(WireError::TimedOut),
    }
}

/// Reads one request into a completed [`RawRequestContent`].
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything, which is how an idle keep-alive connection ends.
pub async fn read_request<S: Transport>(
    socket: &mut Socket<S>,
    carry: &mut BytesMut,
    settings: &ReadSettings,
) -> Result<Option<RawRequestContent>, WireError> {
    let head_len = loop {
        if let Some(pos) = find_headers_end(carry) {
            break pos + 4;
        }
        if carry.len() > settings.max_request_length {
            return Err(HttpError::payload_too_large(
                settings.oversize_status,
                carry.len(),
                settings.max_request_length,
            )
            .into());
        }
        if carry.len() > MAX_HEAD_BYTES {
            return Err(HttpError::bad_request("request head too large").into());
        }

        let n = timed(settings.body_timeout, socket.receive(carry)).await?;
        if n == 0 {
            if carry.is_empty() {
                return Ok(None);
            }
            return Err(WireError::Disconnected);
        }
    };

    let peer = socket.peer_addr().ip();
    let mut raw = RawRequestContent::new(&settings.temp_root, settings.disk_threshold, Some(peer));
    raw.add_bytes(&carry.split_to(head_len))?;

    let headers = raw.headers()?.clone();
    if headers.is_chunked() {
        return Err(HttpError::length_required("chunked request bodies are not supported").into());
    }

    let declared = match headers.get("Content-Length") {
        Some(value) => Some(
            parse_content_length(value)
                .map_err(|_| HttpError::bad_request(format!("invalid Content-Length: {value}")))?,
        ),
        None => None,
    };

    let content_length = match declared {
        Some(len) => len,
        None if raw.http_method()? == Some("POST") => {
            await_undeclared_body(socket, carry).await?;
            0
        }
        None => 0,
    };

    let total = head_len.saturating_add(content_length);
    if total > settings.max_request_length {
        return Err(HttpError::payload_too_large(
            settings.oversize_status,
            total,
            settings.max_request_length,
        )
        .into());
    }

    let early = content_length.min(carry.len());
    raw.add_bytes(&carry.split_to(early))?;

    if raw.len() < total && headers.expect_continue() && headers.is_multipart() {
        send_continue(socket).await?;
    }

    let mut chunk = BytesMut::with_capacity(settings.chunk_size.min(content_length));
    while raw.len() < total {
        if !socket.is_connected() {
            return Err(WireError::Disconnected);
        }
        let want = (total - raw.len()).min(settings.chunk_size);
        chunk.clear();
        let n = timed(settings.body_timeout, socket.receive_up_to(&mut chunk, want)).await?;
        if n == 0 {
            debug!(received = raw.len(), expected = total, "Peer left mid-body");
            return Err(WireError::Disconnected);
        }
        raw.add_bytes(&chunk)?;
    }

    raw.done_adding_bytes()?;
    debug!(
        peer = %peer,
        bytes = raw.len(),
        file_backed = raw.is_file_backed(),
        "Request received"
    );
    Ok(Some(raw))
}

/// A POST without `Content-Length` may still have a head that was split
/// across segments, or a body the client forgot to declare. Poll briefly:
/// undeclared body bytes cannot be framed and are refused with 411.
async fn await_undeclared_body<S: Transport>(
    socket: &mut Socket<S>,
    carry: &mut BytesMut,
) -> Result<(), WireError> {
    for attempt in 1..=LENGTH_RETRY_LIMIT {
        if !carry.is_empty() {
            break;
        }
        match tokio::time::timeout(LENGTH_RETRY_BACKOFF * attempt, socket.receive(carry)).await {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(_)) => {}
            Ok(Err(e)) if is_disconnect(&e) => return Err(WireError::Disconnected),
            Ok(Err(e)) => return Err(WireError::Io(e)),
            Err(_) => {}
        }
    }

    if carry.is_empty() {
        Ok(())
    } else {
        Err(HttpError::length_required("POST body sent without Content-Length").into())
    }
}

/// Fills `request.form` and `request.files` from an urlencoded or multipart
/// body. Other content types are left alone.
pub fn complete_form(request: &mut Request) -> Result<(), HttpError> {
    let Some(content_type) = request.headers.content_type().map(str::to_string) else {
        return Ok(());
    };
    let lower = content_type.to_ascii_lowercase();

    if lower.starts_with("application/x-www-form-urlencoded") {
        let body = request.body()?;
        request.form = parse_urlencoded(&body);
    } else if lower.starts_with("multipart/form-data") {
        let boundary = match parse_boundary(&content_type) {
            Ok(boundary) => boundary,
            Err(e) => {
                debug!(error = %e, "Multipart request without usable boundary");
                return Ok(());
            }
        };

        let range = request.body_range()?;
        let items = split_parts(request.content(), range, &boundary).map_err(|e| match e {
            MultipartError::Buffer(err) => HttpError::from(err),
            other => HttpError::bad_request("malformed multipart body").with_source(other),
        })?;

        for item in items {
            if item.is_file() {
                request.files.push(item);
            } else {
                let value = request.content().read_range(item.range.clone())?;
                request
                    .form
                    .push((item.name, String::from_utf8_lossy(&value).into_owned()));
            }
        }
    }
    Ok(())
}
