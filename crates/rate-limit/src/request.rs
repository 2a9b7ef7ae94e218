//! Request information for rate limiting.

use std::net::IpAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header::AsHeaderName};

/// The parts of an incoming request the limiter can look at.
#[derive(Debug, Clone, Default)]
pub struct RateLimitRequest {
    method: Method,
    uri: Uri,
    client_ip: Option<IpAddr>,
    headers: HeaderMap,
}

impl RateLimitRequest {
    /// Create a new builder for a rate limit request.
    pub fn builder() -> RateLimitRequestBuilder {
        RateLimitRequestBuilder::default()
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Address of the connected peer, if the host provided one.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// The value of a header, if present and valid visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// All request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug, Default)]
pub struct RateLimitRequestBuilder {
    method: Method,
    uri: Uri,
    client_ip: Option<IpAddr>,
    headers: HeaderMap,
}

impl RateLimitRequestBuilder {
    /// Set the request method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the request URI.
    pub fn uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Set the client IP address.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Set the client IP address from a string.
    pub fn ip_str(mut self, ip: &str) -> Result<Self, std::net::AddrParseError> {
        self.client_ip = Some(ip.parse()?);
        Ok(self)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace all headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            method: self.method,
            uri: self.uri,
            client_ip: self.client_ip,
            headers: self.headers,
        }
    }
}
