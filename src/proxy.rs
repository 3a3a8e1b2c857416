//! Plain HTTP forward proxying.
//!
//! Requests are sent to the proxy with an absolute-form target
//! (`GET http://host/path HTTP/1.1`) and a `Host` header naming the final
//! destination. No CONNECT tunnelling is done.

use crate::pool::{ConnectionPool, PoolConfig, RequestOptions};
use crate::protocol::types::{absolute_form, parse_http_url};
use crate::protocol::{HeaderMultiMap, Origin, Request, Response};
use crate::transport::{Connector, TcpConnector};
use crate::utils::error::Result;
use http::Method;
use tracing::debug;

/// Headers added to every proxied request unless the caller sets them.
pub const DEFAULT_PROXY_HEADERS: [(&str, &str); 2] =
    [("Accept-Encoding", "identity"), ("Accept", "*/*")];

/// Build a TCP proxy manager with the default pool configuration.
pub fn proxy_from_url(proxy_url: &str) -> Result<ProxyManager<TcpConnector>> {
    ProxyManager::new(proxy_url, PoolConfig::default())
}

/// Sends requests for any `http://` URL through one forward proxy.
pub struct ProxyManager<C: Connector = TcpConnector> {
    pool: ConnectionPool<C>,
    proxy_headers: HeaderMultiMap,
}

impl ProxyManager<TcpConnector> {
    pub fn new(proxy_url: &str, config: PoolConfig) -> Result<Self> {
        Self::with_connector(proxy_url, config, TcpConnector::new())
    }
}

impl<C: Connector> ProxyManager<C> {
    pub fn with_connector(proxy_url: &str, config: PoolConfig, connector: C) -> Result<Self> {
        let origin = Origin::parse(proxy_url)?;
        debug!("Using forward proxy {}", origin);
        Ok(Self {
            pool: ConnectionPool::with_connector(origin, config, connector)?,
            proxy_headers: HeaderMultiMap::new(),
        })
    }

    /// Extra headers for the proxy itself, e.g. `Proxy-Authorization`.
    pub fn proxy_headers(mut self, headers: HeaderMultiMap) -> Self {
        self.proxy_headers = headers;
        self
    }

    /// The pool of connections to the proxy.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Send `method url` through the proxy.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let request = self.rewrite(method, url, options.headers, options.body)?;
        self.pool.send(request, options.retries).await
    }

    fn rewrite(
        &self,
        method: Method,
        url: &str,
        caller_headers: HeaderMultiMap,
        body: Option<bytes::Bytes>,
    ) -> Result<Request> {
        let target = parse_http_url(url)?;
        let destination = Origin::from_url(&target)?;

        let mut headers = HeaderMultiMap::new();
        if !caller_headers.contains("host") {
            headers.append("Host", destination.host_header());
        }
        for (name, value) in DEFAULT_PROXY_HEADERS {
            if !caller_headers.contains(name) {
                headers.append(name, value);
            }
        }
        for (name, value) in self.proxy_headers.iter() {
            if !caller_headers.contains(name) {
                headers.append(name, value);
            }
        }
        headers.extend(caller_headers.iter());

        Ok(Request {
            method,
            target: absolute_form(&target),
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_request;
    use crate::transport::MemoryConnector;

    fn manager() -> ProxyManager<MemoryConnector> {
        ProxyManager::with_connector(
            "http://proxy.local:3128",
            PoolConfig::default(),
            MemoryConnector::new(),
        )
        .unwrap()
    }

    #[test]
    fn pool_targets_the_proxy_origin() {
        let proxy = manager();
        assert_eq!(proxy.pool().origin(), &Origin::new("proxy.local", 3128));
    }

    #[test]
    fn rewrites_to_absolute_form_with_default_headers() {
        let request = manager()
            .rewrite(Method::GET, "http://google.com/", HeaderMultiMap::new(), None)
            .unwrap();

        assert_eq!(
            &encode_request(&request)[..],
            b"GET http://google.com/ HTTP/1.1\r\n\
              Host: google.com\r\n\
              Accept-Encoding: identity\r\n\
              Accept: */*\r\n\
              \r\n"
        );
    }

    #[test]
    fn caller_headers_override_defaults() {
        let mut caller = HeaderMultiMap::new();
        caller.append("accept", "application/json");
        caller.append("X-Request-Id", "42");

        let mut proxy_headers = HeaderMultiMap::new();
        proxy_headers.append("Proxy-Authorization", "Basic dXNlcjpwYXNz");

        let request = manager()
            .proxy_headers(proxy_headers)
            .rewrite(Method::GET, "http://example.com:8080/a?b=1#frag", caller, None)
            .unwrap();

        assert_eq!(request.target, "http://example.com:8080/a?b=1");
        let headers: Vec<(&str, &str)> = request.headers.iter().collect();
        assert_eq!(
            headers,
            vec![
                ("Host", "example.com:8080"),
                ("Accept-Encoding", "identity"),
                ("Proxy-Authorization", "Basic dXNlcjpwYXNz"),
                ("accept", "application/json"),
                ("X-Request-Id", "42"),
            ]
        );
    }

    #[test]
    fn rejects_tls_destinations() {
        let err = manager()
            .rewrite(Method::GET, "https://example.com/", HeaderMultiMap::new(), None)
            .unwrap_err();
        assert!(matches!(err, crate::utils::error::PoolError::UnsupportedScheme(_)));
    }
}
