//! Request headers keyed by server-variable names.
//!
//! `Content-Type` on the wire becomes `HTTP_CONTENT_TYPE` here, so lookups
//! are stable regardless of how the client cased or punctuated the name.

use crate::http::parser::server_variable_key;

pub const REMOTE_ADDR: &str = "HTTP_REMOTE_ADDR";
pub const REQUEST_URI: &str = "REQUEST_URI";

/// Ordered, case-insensitive header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    entries: Vec<(String, String)>,
}

impl ParsedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a wire header. Repeated headers are joined with `", "`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.insert_var(server_variable_key(name), value);
    }

    /// Inserts a value under an already-canonical server-variable key.
    pub fn insert_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_uppercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.entries.push((key, value)),
        }
    }

    /// Stores `value` under `key`, discarding anything the client sent
    /// under the same name.
    pub fn set_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().to_ascii_uppercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Looks up a header by its wire name, e.g. `"Content-Length"`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.var(&server_variable_key(name))
    }

    /// Looks up a server variable, e.g. `"HTTP_HOST"` or `"REQUEST_URI"`.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Declared body length. `None` when absent or not a number.
    pub fn content_length(&self) -> Option<usize> {
        self.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.get("User-Agent")
    }

    pub fn cookie_header(&self) -> Option<&str> {
        self.get("Cookie")
    }

    pub fn connection(&self) -> Option<&str> {
        self.get("Connection")
    }

    pub fn expect_continue(&self) -> bool {
        self.get("Expect")
            .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    pub fn is_chunked(&self) -> bool {
        self.get("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type()
            .map(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
            .unwrap_or(false)
    }
}
