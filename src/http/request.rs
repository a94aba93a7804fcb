//! Request model seen by handlers.
//!
//! # Responsibilities
//! - Hold the mutable URL view rewritten while a request descends into mounts
//! - Keep the original URL untouched for logging and the finalizer
//! - Carry captured route params, parsed query and the current app context
//!
//! # Design Decisions
//! - `url` is relative to the active mount point; `base_url` holds the part
//!   that was trimmed away
//! - Request ID added as early as possible for tracing

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method};

use crate::app::AppContext;
use crate::routing::params::Params;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Correlation ID stored in request extensions by the HTTP bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a fresh UUID v4 request ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parsed query string. Repeated names keep every value in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    values: HashMap<String, Vec<String>>,
}

impl Query {
    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn parse(raw: &str) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            values
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Self { values }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Every value for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An in-flight request.
#[derive(Debug)]
pub struct Request {
    /// HTTP method.
    pub method: Method,

    /// Remaining URL relative to the active mount point. May be fully
    /// qualified (`http://host/path`).
    pub url: String,

    /// URL as first seen by the outermost dispatcher. Set once.
    pub original_url: Option<String>,

    /// Concatenated prefixes trimmed by enclosing mounts.
    pub base_url: String,

    /// Params captured by the currently matched layer.
    pub params: Params,

    /// Parsed query, filled in by the app on entry.
    pub query: Option<Query>,

    pub headers: HeaderMap,
    pub body: Bytes,
    pub extensions: Extensions,

    /// Path of the route currently dispatching this request.
    pub route: Option<String>,

    /// Context of the app currently handling this request.
    pub app: Option<Arc<AppContext>>,
}

impl Request {
    /// Create a request with an empty body and no headers.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            original_url: None,
            base_url: String::new(),
            params: Params::new(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            extensions: Extensions::new(),
            route: None,
            app: None,
        }
    }

    /// Builder-style header insertion. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Pathname of the current `url`, without query, fragment or scheme/host.
    pub fn path(&self) -> &str {
        pathname(&self.url).unwrap_or("/")
    }

    /// Protocol the client used. `X-Forwarded-Proto` is honored only when
    /// the app trusts its proxy.
    pub fn protocol(&self) -> String {
        let fallback = "http";
        let trusted = self
            .app
            .as_ref()
            .map(|ctx| ctx.settings.trust_proxy)
            .unwrap_or(false);
        if !trusted {
            return fallback.to_string();
        }
        let header = self.header("x-forwarded-proto").unwrap_or(fallback);
        match header.split_once(',') {
            Some((first, _)) => first.trim().to_string(),
            None => header.trim().to_string(),
        }
    }

    /// Whether the request arrived over TLS.
    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Correlation ID assigned by the HTTP bridge.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.extensions.get::<RequestId>()
    }
}

/// Length of the `scheme://host` part of a fully qualified URL, or 0.
pub(crate) fn protohost_len(url: &str) -> usize {
    if url.is_empty() || url.starts_with('/') {
        return 0;
    }
    let search = url.find('?').unwrap_or(url.len());
    let Some(fqdn) = url[..search].find("://") else {
        return 0;
    };
    let host_start = fqdn + 3;
    match url[host_start..search].find('/') {
        Some(slash) => host_start + slash,
        None => search,
    }
}

/// Pathname portion of `url`. `None` for an empty URL.
pub(crate) fn pathname(url: &str) -> Option<&str> {
    if url.is_empty() {
        return None;
    }
    let rest = &url[protohost_len(url)..];
    let end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
    let path = &rest[..end];
    Some(if path.is_empty() { "/" } else { path })
}

/// Query string portion of `url`, without the `?`.
pub(crate) fn query_string(url: &str) -> Option<&str> {
    let start = url.find('?')? + 1;
    let end = url[start..]
        .find('#')
        .map(|i| start + i)
        .unwrap_or(url.len());
    Some(&url[start..end])
}
