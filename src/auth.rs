//! Authentication hook, consulted after the request is read and before any
//! handler runs.

use crate::http::request::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// Answer 401. `challenge` becomes the `WWW-Authenticate` header.
    Deny { challenge: Option<String> },
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &Request) -> AuthDecision;
}

/// Lets every request through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, _request: &Request) -> AuthDecision {
        AuthDecision::Allow
    }
}
