//! Cookie parsing and `Set-Cookie` construction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Parse a `Cookie` header into a flat map. Later duplicates win.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        cookies.insert(name.trim().to_string(), value.trim().to_string());
    }
    cookies
}

/// Cookie lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Session cookie.
    Session,
    MaxAge(i64),
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A cookie to send. Defaults: path `/`, session, not HttpOnly, Secure, `SameSite=Lax`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub expires: Expiry,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            expires: Expiry::Session,
            http_only: false,
            secure: true,
            same_site: SameSite::Lax,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn expires(mut self, expires: Expiry) -> Self {
        self.expires = expires;
        self
    }

    pub fn http_only(mut self, on: bool) -> Self {
        self.http_only = on;
        self
    }

    pub fn secure(mut self, on: bool) -> Self {
        self.secure = on;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        out.push_str("; SameSite=");
        out.push_str(self.same_site.as_str());
        match self.expires {
            Expiry::Session => {}
            Expiry::MaxAge(secs) => out.push_str(&format!("; Max-Age={}", secs)),
            Expiry::At(at) => {
                out.push_str("; Expires=");
                out.push_str(&at.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
            }
        }
        out
    }
}
