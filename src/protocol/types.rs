use super::headers::HeaderMultiMap;
use crate::utils::error::{PoolError, Result};
use bytes::Bytes;
use http::Method;
use std::collections::BTreeMap;
use std::fmt;
use url::{Position, Url};

pub const HTTP_SCHEME: &str = "http";
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Target server of a pool: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: HTTP_SCHEME.to_string(),
            host: host.into(),
            port,
        }
    }

    /// Parse the origin of an `http://` URL.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = parse_http_url(url)?;
        Self::from_url(&parsed)
    }

    pub(crate) fn from_url(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or_else(|| PoolError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port: url.port_or_known_default().unwrap_or(HTTP_DEFAULT_PORT),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for a `Host` header: the port is omitted when it is the default.
    pub fn host_header(&self) -> String {
        if self.port == HTTP_DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Parse `url`, accepting only the plain `http` scheme.
pub(crate) fn parse_http_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| PoolError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != HTTP_SCHEME {
        return Err(PoolError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    if parsed.host_str().is_none() {
        return Err(PoolError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(parsed)
}

/// Origin-form request target (path plus query) of a parsed URL.
pub(crate) fn origin_form(url: &Url) -> String {
    url[Position::BeforePath..Position::AfterQuery].to_string()
}

/// Absolute-form request target (no user info, no fragment) of a parsed URL.
pub(crate) fn absolute_form(url: &Url) -> String {
    let authority = &url[Position::BeforeHost..Position::AfterPort];
    format!("{}://{}{}", url.scheme(), authority, origin_form(url))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

/// Outgoing request as it goes on the wire.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-form path or absolute URI.
    pub target: String,
    pub headers: HeaderMultiMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMultiMap::new(),
            body: None,
        }
    }

    /// The request asked the server to close the connection afterwards.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("connection", "close")
    }
}

/// Fully read response.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMultiMap,
    pub data: Bytes,
}

impl Response {
    /// Headers with duplicate names merged, keyed by lower-cased name.
    pub fn headers_merged(&self) -> BTreeMap<String, String> {
        self.headers.to_merged_view()
    }

    /// Body as UTF-8 text, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
