use std::io;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::error::{HttpError, WireError};
use crate::http::response::{Response, StatusCode, WriteState};
use crate::server::socket::{Socket, Transport, is_disconnect};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Body bytes go out in slices of this size, with a connectedness check
/// between slices.
pub const BODY_CHUNK_SIZE: usize = 256 * 1024;

const WRITE_RETRY_LIMIT: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(25);

pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Header section built line by line. The terminator is appended exactly
/// once, by [`HeaderBlock::into_bytes`].
#[derive(Debug)]
pub struct HeaderBlock {
    lines: Vec<String>,
}

impl HeaderBlock {
    pub fn new(status: StatusCode) -> Self {
        Self {
            lines: vec![format!(
                "{} {} {}",
                HTTP_VERSION,
                status.as_u16(),
                status.reason_phrase()
            )],
        }
    }

    pub fn push(&mut self, name: &str, value: impl AsRef<str>) {
        self.lines.push(format!("{}: {}", name, value.as_ref()));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.lines.iter().map(|l| l.len() + 2).sum::<usize>() + 2);
        for line in &self.lines {
            buf.extend_from_slice(line.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// Builds the header section for `resp` in emission order: status line,
/// `Server`, cache headers, `Content-Encoding`, `Content-Type`, extra
/// headers, `Set-Cookie`, framing, `Connection`.
pub fn build_header_block(resp: &Response) -> HeaderBlock {
    let mut block = HeaderBlock::new(resp.status());

    block.push("Server", resp.server_name());
    for (name, value) in resp.cache_policy().header_lines() {
        block.push(name, value);
    }
    if let Some(encoding) = resp.content_encoding() {
        block.push("Content-Encoding", encoding);
    }
    block.push("Content-Type", resp.content_type());
    for (name, value) in resp.headers() {
        block.push(name, value);
    }
    for cookie in resp.cookies() {
        block.push("Set-Cookie", cookie.to_set_cookie(resp.http_only_supported()));
    }

    if resp.is_chunked() {
        block.push("Transfer-Encoding", "chunked");
    } else if !resp.headers_cleared() {
        let length = resp
            .forced_content_length()
            .unwrap_or(resp.buffered().len() as u64);
        block.push("Content-Length", length.to_string());
    }

    block.push(
        "Connection",
        if resp.keep_alive() { "keep-alive" } else { "close" },
    );
    block
}

/// How a flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Sent,
    /// The client went away; the socket has been shut down.
    Disconnected,
}

/// A connection a response can be flushed to, with the stream type erased
/// so handlers stay object safe.
#[async_trait]
pub trait ResponseSink: Send {
    async fn flush_response(
        &mut self,
        resp: &mut Response,
        final_flush: bool,
    ) -> Result<FlushOutcome, WireError>;

    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<S: Transport> ResponseSink for Socket<S> {
    async fn flush_response(
        &mut self,
        resp: &mut Response,
        final_flush: bool,
    ) -> Result<FlushOutcome, WireError> {
        flush(self, resp, final_flush).await
    }

    fn is_connected(&self) -> bool {
        Socket::is_connected(self)
    }
}

/// What a handler writes into: the [`Response`] plus the connection it
/// will be sent over.
///
/// Dereferences to the response, so header setters and `write` are used
/// directly. [`flush`](Self::flush) pushes what is buffered so far, which
/// lets a handler stream a large body and stop once the client is gone.
pub struct ResponseWriter<'a> {
    response: &'a mut Response,
    sink: &'a mut dyn ResponseSink,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(response: &'a mut Response, sink: &'a mut dyn ResponseSink) -> Self {
        Self { response, sink }
    }

    /// Sends headers (first time only) and the buffered body. The response
    /// stays open; the final flush happens after the handler returns.
    pub async fn flush(&mut self) -> Result<FlushOutcome, HttpError> {
        match self.sink.flush_response(&mut *self.response, false).await {
            Ok(outcome) => Ok(outcome),
            Err(WireError::Http(err)) => Err(err),
            Err(err) => Err(HttpError::internal("response flush failed").with_source(err)),
        }
    }

    pub fn is_client_connected(&self) -> bool {
        self.sink.is_connected() && self.response.state() != WriteState::Closed
    }
}

impl Deref for ResponseWriter<'_> {
    type Target = Response;

    fn deref(&self) -> &Response {
        &*self.response
    }
}

impl DerefMut for ResponseWriter<'_> {
    fn deref_mut(&mut self) -> &mut Response {
        &mut *self.response
    }
}

/// Writes all of `data`, retrying a few times when the stream will not take
/// bytes. Disconnect errors surface as [`WireError::Disconnected`].
pub async fn write_with_retry<S: Transport>(
    socket: &mut Socket<S>,
    data: &[u8],
) -> Result<(), WireError> {
    let mut written = 0;
    let mut stalls = 0;

    while written < data.len() {
        match socket.send(&data[written..]).await {
            Ok(0) => stalls += 1,
            Ok(n) => {
                written += n;
                stalls = 0;
                continue;
            }
            Err(e) if is_disconnect(&e) => return Err(WireError::Disconnected),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                stalls += 1
            }
            Err(e) => return Err(WireError::Io(e)),
        }

        if stalls > WRITE_RETRY_LIMIT {
            return Err(WireError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "stream stayed unwritable",
            )));
        }
        trace!(attempt = stalls, "Stream not writable, retrying");
        tokio::time::sleep(WRITE_RETRY_DELAY).await;
    }
    Ok(())
}

/// Sends the interim `100 Continue`.
pub async fn send_continue<S: Transport>(socket: &mut Socket<S>) -> Result<(), WireError> {
    write_with_retry(socket, CONTINUE_RESPONSE).await?;
    socket.flush().await.map_err(WireError::Io)
}

/// Writes headers (once) and any buffered body to the socket.
///
/// Intermediate flushes leave the response open for more writes. If one of
/// them sends the headers before the length is fixed, the response switches
/// to chunked framing. The final flush streams a file body if one was set, writes the chunked trailer,
/// and closes the response. A disconnected client is not an error: the
/// socket is shut down and [`FlushOutcome::Disconnected`] returned.
pub async fn flush<S: Transport>(
    socket: &mut Socket<S>,
    resp: &mut Response,
    final_flush: bool,
) -> Result<FlushOutcome, WireError> {
    match flush_inner(socket, resp, final_flush).await {
        Ok(()) => Ok(FlushOutcome::Sent),
        Err(WireError::Disconnected) => {
            debug!(peer = %socket.peer_addr(), "Client disconnected during response");
            resp.state = WriteState::Closed;
            socket.mark_disconnected();
            socket.shutdown().await;
            Ok(FlushOutcome::Disconnected)
        }
        Err(e) => Err(e),
    }
}

async fn flush_inner<S: Transport>(
    socket: &mut Socket<S>,
    resp: &mut Response,
    final_flush: bool,
) -> Result<(), WireError> {
    if resp.state == WriteState::Closed {
        return Ok(());
    }

    if !resp.headers_sent() {
        if !final_flush && needs_chunked_framing(resp) {
            trace!("Length unknown at first flush, switching to chunked");
            resp.chunked = true;
        }
        let head = build_header_block(resp).into_bytes();
        write_with_retry(socket, &head).await?;
        resp.state = WriteState::HeadersSent;
    }

    if resp.omit_body() {
        resp.clear_body();
    } else {
        let body = resp.body.split().freeze();
        write_body(socket, resp.is_chunked(), &body).await?;

        if final_flush {
            if let Some(file) = resp.file_body.take() {
                stream_file(socket, resp.is_chunked(), &file.path).await?;
            }
        }
    }

    if final_flush {
        if resp.is_chunked() && !resp.omit_body() {
            write_with_retry(socket, b"0\r\n\r\n").await?;
        }
        resp.state = WriteState::Closed;
    } else {
        resp.state = WriteState::BodyFlushed;
    }

    socket.flush().await.map_err(|e| {
        if is_disconnect(&e) {
            WireError::Disconnected
        } else {
            WireError::Io(e)
        }
    })
}

/// An early flush of a response whose length is not fixed yet cannot
/// declare `Content-Length` from the bytes buffered so far.
fn needs_chunked_framing(resp: &Response) -> bool {
    !resp.is_chunked() && !resp.headers_cleared() && resp.forced_content_length().is_none()
}

async fn write_body<S: Transport>(
    socket: &mut Socket<S>,
    chunked: bool,
    body: &[u8],
) -> Result<(), WireError> {
    for slice in body.chunks(BODY_CHUNK_SIZE) {
        if !socket.is_connected() {
            return Err(WireError::Disconnected);
        }
        write_piece(socket, chunked, slice).await?;
    }
    Ok(())
}

async fn write_piece<S: Transport>(
    socket: &mut Socket<S>,
    chunked: bool,
    piece: &[u8],
) -> Result<(), WireError> {
    if piece.is_empty() {
        return Ok(());
    }
    if chunked {
        write_with_retry(socket, format!("{:X}\r\n", piece.len()).as_bytes()).await?;
        write_with_retry(socket, piece).await?;
        write_with_retry(socket, b"\r\n").await
    } else {
        write_with_retry(socket, piece).await
    }
}

async fn stream_file<S: Transport>(
    socket: &mut Socket<S>,
    chunked: bool,
    path: &std::path::Path,
) -> Result<(), WireError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; BODY_CHUNK_SIZE];

    loop {
        if !socket.is_connected() {
            return Err(WireError::Disconnected);
        }
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        write_piece(socket, chunked, &buf[..n]).await?;
    }
}

/// Complete response for a peer turned away by the connection cap.
pub fn forbidden_max_connections(server_name: &str) -> Vec<u8> {
    let body = "<html><body><h1>403 Forbidden</h1><p>Maximum Connections Exceeded</p></body></html>";
    let mut block = HeaderBlock::new(StatusCode::Forbidden);
    block.push("Server", server_name);
    block.push("Content-Type", "text/html; charset=utf-8");
    block.push("Content-Length", body.len().to_string());
    block.push("Connection", "close");

    let mut bytes = block.into_bytes();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}
