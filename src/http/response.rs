use std::path::PathBuf;

use bytes::BytesMut;

use crate::error::ResponseError;
use crate::http::cookie::Cookie;

/// HTTP status codes produced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Found
    Found,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 408 Request Timeout
    RequestTimeout,
    /// 411 Length Required
    LengthRequired,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use pebble::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::PayloadTooLarge.as_u16(), 413);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::MovedPermanently => 301,
            StatusCode::Found => 302,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Unauthorized => 401,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::LengthRequired => 411,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::Found => "Found",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::LengthRequired => "Length Required",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// Maps a numeric code back to a known status.
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            100 => StatusCode::Continue,
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            301 => StatusCode::MovedPermanently,
            302 => StatusCode::Found,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            408 => StatusCode::RequestTimeout,
            411 => StatusCode::LengthRequired,
            413 => StatusCode::PayloadTooLarge,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            _ => return None,
        };
        Some(status)
    }
}

/// Cache headers emitted with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// `Cache-Control: no-cache`, `Pragma: no-cache`, `Expires: -1`
    NoCache,
    /// `Cache-Control: private`
    Private,
    /// `Cache-Control: public, max-age=<secs>`
    Public { max_age: u32 },
}

impl CachePolicy {
    pub fn header_lines(&self) -> Vec<(&'static str, String)> {
        match self {
            CachePolicy::NoCache => vec![
                ("Cache-Control", "no-cache".to_string()),
                ("Pragma", "no-cache".to_string()),
                ("Expires", "-1".to_string()),
            ],
            CachePolicy::Private => vec![("Cache-Control", "private".to_string())],
            CachePolicy::Public { max_age } => {
                vec![("Cache-Control", format!("public, max-age={max_age}"))]
            }
        }
    }
}

/// Where a response stands in its single trip to the socket.
///
/// ```text
/// NotStarted -> HeadersPending -> HeadersSent -> BodyFlushed -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    NotStarted,
    HeadersPending,
    HeadersSent,
    BodyFlushed,
    Closed,
}

/// A body that is streamed from disk instead of being buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBody {
    pub path: PathBuf,
    pub len: u64,
}

pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// The outbound side of one request: pending header state plus an in-memory
/// body buffer that handlers write into.
///
/// Header-affecting setters fail with [`ResponseError::HeadersAlreadySent`]
/// once the header block has reached the socket.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    content_type: String,
    content_encoding: Option<String>,
    cache_policy: CachePolicy,
    cookies: Vec<Cookie>,
    headers: Vec<(String, String)>,
    pub(crate) body: BytesMut,
    pub(crate) file_body: Option<FileBody>,
    forced_content_length: Option<u64>,
    headers_cleared: bool,
    pub(crate) chunked: bool,
    keep_alive: bool,
    omit_body: bool,
    server_name: String,
    http_only_supported: bool,
    pub(crate) state: WriteState,
}

impl Response {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Ok,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            content_encoding: None,
            cache_policy: CachePolicy::Private,
            cookies: Vec::new(),
            headers: Vec::new(),
            body: BytesMut::new(),
            file_body: None,
            forced_content_length: None,
            headers_cleared: false,
            chunked: false,
            keep_alive: false,
            omit_body: false,
            server_name: server_name.into(),
            http_only_supported: true,
            state: WriteState::NotStarted,
        }
    }

    /// A fresh response shaped by what the request asked for.
    pub fn for_request(
        server_name: impl Into<String>,
        keep_alive: bool,
        http_only_supported: bool,
        omit_body: bool,
    ) -> Self {
        let mut resp = Response::new(server_name);
        resp.keep_alive = keep_alive;
        resp.http_only_supported = http_only_supported;
        resp.omit_body = omit_body;
        resp
    }

    fn touch(&mut self) -> Result<(), ResponseError> {
        match self.state {
            WriteState::NotStarted => {
                self.state = WriteState::HeadersPending;
                Ok(())
            }
            WriteState::HeadersPending => Ok(()),
            _ => Err(ResponseError::HeadersAlreadySent),
        }
    }

    pub fn headers_sent(&self) -> bool {
        !matches!(self.state, WriteState::NotStarted | WriteState::HeadersPending)
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.touch()?;
        self.status = status;
        Ok(())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) -> Result<(), ResponseError> {
        self.touch()?;
        self.content_type = content_type.into();
        Ok(())
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn set_content_encoding(&mut self, encoding: impl Into<String>) -> Result<(), ResponseError> {
        self.touch()?;
        self.content_encoding = Some(encoding.into());
        Ok(())
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn set_cache_policy(&mut self, policy: CachePolicy) -> Result<(), ResponseError> {
        self.touch()?;
        self.cache_policy = policy;
        Ok(())
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Adds a cookie, replacing one with the same name.
    pub fn set_cookie(&mut self, cookie: Cookie) -> Result<(), ResponseError> {
        self.touch()?;
        self.cookies.retain(|c| c.name() != cookie.name());
        self.cookies.push(cookie);
        Ok(())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Adds or replaces a header (names compare case-insensitively).
    pub fn set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResponseError> {
        self.touch()?;
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        Ok(())
    }

    /// Drops extra headers and cookies and hands framing to the handler: no
    /// `Content-Length` is emitted afterwards.
    pub fn clear_headers(&mut self) -> Result<(), ResponseError> {
        self.touch()?;
        self.headers.clear();
        self.cookies.clear();
        self.headers_cleared = true;
        Ok(())
    }

    pub fn headers_cleared(&self) -> bool {
        self.headers_cleared
    }

    pub fn forced_content_length(&self) -> Option<u64> {
        self.forced_content_length
    }

    /// Overrides the natural body length, for content written without being
    /// fully buffered.
    pub fn set_forced_content_length(&mut self, len: u64) -> Result<(), ResponseError> {
        self.touch()?;
        self.forced_content_length = Some(len);
        Ok(())
    }

    /// Streams `path` as the body. The length is fixed up front.
    pub fn send_file(&mut self, path: impl Into<PathBuf>, len: u64) -> Result<(), ResponseError> {
        self.set_forced_content_length(len)?;
        self.file_body = Some(FileBody {
            path: path.into(),
            len,
        });
        Ok(())
    }

    pub fn file_body(&self) -> Option<&FileBody> {
        self.file_body.as_ref()
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Switches to `Transfer-Encoding: chunked`; each flush becomes one chunk.
    pub fn set_chunked(&mut self) -> Result<(), ResponseError> {
        self.touch()?;
        self.chunked = true;
        Ok(())
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) -> Result<(), ResponseError> {
        self.touch()?;
        self.keep_alive = keep_alive;
        Ok(())
    }

    pub fn omit_body(&self) -> bool {
        self.omit_body
    }

    /// HEAD responses keep their headers but never send body bytes.
    pub fn set_omit_body(&mut self, omit: bool) {
        self.omit_body = omit;
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn http_only_supported(&self) -> bool {
        self.http_only_supported
    }

    pub fn set_http_only_supported(&mut self, supported: bool) {
        self.http_only_supported = supported;
    }

    /// Appends to the body buffer. Allowed after headers are sent; the bytes
    /// go out with the next flush.
    pub fn write(&mut self, data: &[u8]) {
        if self.state == WriteState::NotStarted {
            self.state = WriteState::HeadersPending;
        }
        self.body.extend_from_slice(data);
    }

    pub fn write_str(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    /// Bytes buffered but not yet flushed.
    pub fn buffered(&self) -> &[u8] {
        &self.body
    }

    /// Discards buffered body bytes that have not been flushed.
    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    /// Gives up on a response whose headers already went out. Nothing more
    /// is written, not even the chunked terminator.
    pub(crate) fn abandon(&mut self) {
        self.body.clear();
        self.file_body = None;
        self.state = WriteState::Closed;
    }
}
