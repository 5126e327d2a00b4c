//! Request line and header line extraction.
//!
//! These functions never see the socket. They work on single lines handed
//! out by [`RawRequestContent`](crate::http::raw::RawRequestContent) and are
//! deliberately tolerant: malformed input yields an error value or `None`,
//! and the caller decides whether that becomes a client-visible 400.

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Not 2 or 3 whitespace-separated tokens.
    InvalidRequest,
    InvalidHeader,
    InvalidContentLength,
    Incomplete,
}

/// `METHOD PATH[?QUERY] [VERSION]`, with the query split off the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub version: Option<String>,
}

impl RequestLine {
    /// Path and query as they appeared on the wire.
    pub fn request_uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

pub fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();

    let (method, target, version) = match parts.as_slice() {
        [method, target] => (*method, *target, None),
        [method, target, version] => (*method, *target, Some(version.to_string())),
        _ => return Err(ParseError::InvalidRequest),
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    Ok(RequestLine {
        method: method.to_string(),
        path,
        query,
        version,
    })
}

/// Splits `Name: value` at the first `:`. `None` when there is no usable
/// separator, which ends header scanning.
pub fn parse_header_line(line: &str) -> Option<(String, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

/// `User-Agent` -> `HTTP_USER_AGENT`.
pub fn server_variable_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 5);
    key.push_str("HTTP_");
    key.extend(name.trim().chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    key
}

pub fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn parse_content_length(value: &str) -> Result<usize, ParseError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidContentLength)
}
