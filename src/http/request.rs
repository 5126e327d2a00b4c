use std::net::IpAddr;
use std::ops::Range;

use crate::error::BufferError;
use crate::http::cookie::CookieCollection;
use crate::http::headers::ParsedHeaders;
use crate::http::multipart::ContentItem;
use crate::http::raw::RawRequestContent;

/// HTTP request methods recognized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// TRACE - Loop the request back
    TRACE,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// DEBUG - Debugger attach requests from development tools
    DEBUG,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Example
    ///
    /// ```
    /// # use pebble::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "CONNECT" => Some(Method::CONNECT),
            "OPTIONS" => Some(Method::OPTIONS),
            "TRACE" => Some(Method::TRACE),
            "PATCH" => Some(Method::PATCH),
            "DEBUG" => Some(Method::DEBUG),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
            Method::DEBUG => "DEBUG",
        }
    }

    fn bit(&self) -> u16 {
        1 << (*self as u16)
    }
}

/// A set of methods for handler routing. `*` and `ANY` match every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMask(u16);

impl MethodMask {
    pub const NONE: MethodMask = MethodMask(0);
    pub const ANY: MethodMask = MethodMask(u16::MAX);

    pub fn single(method: Method) -> Self {
        MethodMask(method.bit())
    }

    /// Parses `"GET, POST"`, `"*"` or `"ANY"`. Unknown verbs are ignored.
    pub fn parse(verbs: &str) -> Self {
        let mut mask = MethodMask::NONE;
        for verb in verbs.split([',', ' ', '|']).map(str::trim).filter(|v| !v.is_empty()) {
            if verb == "*" || verb.eq_ignore_ascii_case("ANY") {
                return MethodMask::ANY;
            }
            if let Some(method) = Method::from_str(&verb.to_ascii_uppercase()) {
                mask.0 |= method.bit();
            }
        }
        mask
    }

    pub fn contains(&self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A fully received request, handed to handlers after the body is complete.
///
/// Uploaded files are not copied out of the raw content; `files` holds byte
/// ranges and [`Request::file_bytes`] reads them on demand.
#[derive(Debug)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request path without the query string (e.g., "/index.html")
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query_string: Option<String>,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    pub headers: ParsedHeaders,
    /// Percent-decoded query string pairs
    pub query: Vec<(String, String)>,
    /// Percent-decoded urlencoded fields and multipart text fields
    pub form: Vec<(String, String)>,
    pub files: Vec<ContentItem>,
    pub cookies: CookieCollection,
    pub remote_addr: Option<IpAddr>,
    content: RawRequestContent,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        query_string: Option<String>,
        version: String,
        headers: ParsedHeaders,
        content: RawRequestContent,
    ) -> Self {
        let query = query_string
            .as_deref()
            .map(|q| parse_urlencoded(q.as_bytes()))
            .unwrap_or_default();
        let cookies = headers
            .cookie_header()
            .map(CookieCollection::parse_request_header)
            .unwrap_or_default();
        let remote_addr = content.remote_addr();

        Self {
            method,
            path,
            query_string,
            version,
            headers,
            query,
            form: Vec::new(),
            files: Vec::new(),
            cookies,
            remote_addr,
            content,
        }
    }

    /// Builds a request from complete raw content. `None` when the request
    /// line is malformed or names an unknown method.
    pub fn from_content(mut content: RawRequestContent) -> Result<Option<Self>, BufferError> {
        let Some(line) = content.request_line()?.cloned() else {
            return Ok(None);
        };
        let Some(method) = Method::from_str(&line.method) else {
            return Ok(None);
        };
        let headers = content.headers()?.clone();
        let version = line.version.unwrap_or_else(|| "HTTP/1.0".to_string());
        Ok(Some(Request::new(
            method,
            line.path,
            line.query,
            version,
            headers,
            content,
        )))
    }

    /// Retrieves a header value by its wire name, case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Declared Content-Length, 0 when missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.headers.content_length().unwrap_or(0)
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close.
    pub fn keep_alive(&self) -> bool {
        match self.headers.connection() {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version.eq_ignore_ascii_case("HTTP/1.1"),
        }
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        lookup(&self.form, name)
    }

    pub fn file(&self, field: &str) -> Option<&ContentItem> {
        self.files.iter().find(|f| f.name == field)
    }

    pub fn content(&mut self) -> &mut RawRequestContent {
        &mut self.content
    }

    pub fn body_range(&mut self) -> Result<Range<usize>, BufferError> {
        self.content.body_range()
    }

    /// Copies the whole body out of the raw content.
    pub fn body(&mut self) -> Result<Vec<u8>, BufferError> {
        let range = self.content.body_range()?;
        self.content.read_range(range)
    }

    pub fn file_bytes(&mut self, item: &ContentItem) -> Result<Vec<u8>, BufferError> {
        self.content.read_range(item.range.clone())
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Percent-decodes `a=1&b=two+words`.
pub fn parse_urlencoded(input: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(input)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
