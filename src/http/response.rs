//! Response model written by handlers.
//!
//! # Responsibilities
//! - Collect status, headers and body produced during dispatch
//! - Track whether a handler already completed the response
//! - Convert into an axum response at the HTTP bridge
//!
//! # Design Decisions
//! - Bodies are fully buffered; streaming is out of scope
//! - Header errors surface as request errors instead of panics

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;

use crate::app::AppContext;
use crate::http::error::Error;

/// Response under construction.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,

    /// Context of the app currently handling the request.
    pub app: Option<Arc<AppContext>>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
            app: None,
        }
    }

    /// Set the status code.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<&mut Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Send a body and complete the response. Defaults the content type to
    /// HTML when none was set.
    pub fn send(&mut self, body: impl Into<Bytes>) -> &mut Self {
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        }
        self.body = body.into();
        self.finished = true;
        self
    }

    /// Serialize `value` as the JSON body and complete the response.
    pub fn json<T: serde::Serialize>(&mut self, value: &T) -> Result<&mut Self, Error> {
        let body = serde_json::to_vec(value)?;
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        Ok(self.send(body))
    }

    /// Complete the response without changing the body.
    pub fn end(&mut self) -> &mut Self {
        self.finished = true;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
