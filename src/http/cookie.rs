//! Cookies in both directions: the request `Cookie` header and the response
//! `Set-Cookie` lines.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};

/// `Sun, 06 Nov 1994 08:49:37 GMT`
const RFC1123_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// `Sunday, 06-Nov-1994 08:49:37 GMT` as older browsers send it.
const COOKIE_DATE_FORMATS: [&str; 2] = ["%a, %d-%b-%Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"];

/// User agents that drop cookies carrying the `HttpOnly` flag.
const NO_HTTP_ONLY_AGENTS: [&str; 4] = ["Windows CE", "IEMobile 6", "MSIE 5", "MSIE 4"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    raw_value: String,
    /// `k1=v1&k2=v2`, materialized from `raw_value` on first structured access.
    values: Option<Vec<(String, String)>>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_value: value.into(),
            values: None,
            domain: None,
            path: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value as it goes on the wire.
    pub fn value(&self) -> Cow<'_, str> {
        match &self.values {
            None => Cow::Borrowed(&self.raw_value),
            Some(pairs) => Cow::Owned(
                pairs
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&"),
            ),
        }
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.raw_value = value.into();
        self.values = None;
    }

    pub fn has_keys(&self) -> bool {
        match &self.values {
            None => self.raw_value.contains('='),
            Some(pairs) => !pairs.is_empty(),
        }
    }

    fn values_mut(&mut self) -> &mut Vec<(String, String)> {
        let raw = &self.raw_value;
        self.values.get_or_insert_with(|| {
            raw.split('&')
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (String::new(), p.to_string()),
                })
                .collect()
        })
    }

    /// Value stored under `key` in a multi-value cookie.
    pub fn get(&mut self, key: &str) -> Option<&str> {
        self.values_mut()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let pairs = self.values_mut();
        pairs.retain(|(k, _)| *k != key);
        pairs.push((key, value.into()));
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// `name=value[; domain=..][; expires=..][; path=..][; secure][; HttpOnly]`
    ///
    /// `HttpOnly` is only written when the requesting agent understands it.
    pub fn to_set_cookie(&self, http_only_supported: bool) -> String {
        let mut out = format!("{}={}", self.name, self.value());
        if let Some(domain) = &self.domain {
            out.push_str("; domain=");
            out.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            out.push_str("; expires=");
            out.push_str(&expires.format(RFC1123_FORMAT).to_string());
        }
        if let Some(path) = &self.path {
            out.push_str("; path=");
            out.push_str(path);
        }
        if self.secure {
            out.push_str("; secure");
        }
        if self.http_only && http_only_supported {
            out.push_str("; HttpOnly");
        }
        out
    }

    /// Parses a `Set-Cookie` value back into a cookie. Unknown attributes are
    /// ignored; `None` only when there is no `name=value` pair.
    pub fn parse_set_cookie(line: &str) -> Option<Self> {
        let line = line
            .strip_prefix("Set-Cookie:")
            .unwrap_or(line)
            .trim();
        let mut attrs = line.split(';');
        let (name, value) = attrs.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim());
        for attr in attrs {
            let attr = attr.trim();
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attr, None),
            };
            match (key.to_ascii_lowercase().as_str(), val) {
                ("domain", Some(v)) => cookie.domain = Some(v.to_string()),
                ("path", Some(v)) => cookie.path = Some(v.to_string()),
                ("expires", Some(v)) => cookie.expires = parse_cookie_date(v),
                ("secure", _) => cookie.secure = true,
                ("httponly", _) => cookie.http_only = true,
                _ => {}
            }
        }
        Some(cookie)
    }
}

pub fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    std::iter::once(RFC1123_FORMAT)
        .chain(COOKIE_DATE_FORMATS)
        .find_map(|fmt| NaiveDateTime::parse_from_str(value.trim(), fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Whether the agent is known to honour `HttpOnly`. Unknown agents are not.
pub fn supports_http_only(user_agent: Option<&str>) -> bool {
    match user_agent {
        Some(ua) if !ua.trim().is_empty() => !NO_HTTP_ONLY_AGENTS.iter().any(|bad| ua.contains(bad)),
        _ => false,
    }
}

/// Cookies sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieCollection {
    cookies: Vec<Cookie>,
}

impl CookieCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1; b=2`. Pairs without `=` are skipped; the first of two
    /// cookies with the same name wins.
    pub fn parse_request_header(header: &str) -> Self {
        let mut collection = Self::new();
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || collection.get(name).is_some() {
                continue;
            }
            collection.cookies.push(Cookie::new(name, value.trim()));
        }
        collection
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cookie> {
        self.cookies.iter_mut().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}
