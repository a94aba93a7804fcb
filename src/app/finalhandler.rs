//! Last-resort responder for requests no handler completed.
//!
//! # Responsibilities
//! - Answer 404 when the stack ran out without an error
//! - Answer with the error's status (or 500) when an error is still pending
//! - Report errors to an on-error hook before responding
//!
//! # Design Decisions
//! - Never panics; an already-finished response is only logged
//! - Production hides error messages behind the status reason phrase

use std::sync::Arc;

use axum::http::{Method, StatusCode};

use crate::http::request::pathname;
use crate::http::{Error, Request, Response};

/// Completes a request after dispatch is exhausted.
pub trait Finalizer: Send + Sync {
    fn finalize(&self, err: Option<Error>, req: &mut Request, res: &mut Response);
}

type OnError = dyn Fn(&Error, &Request) + Send + Sync;

/// Plain-text 404/error responder.
#[derive(Clone)]
pub struct DefaultFinalizer {
    env: String,
    on_error: Option<Arc<OnError>>,
}

impl DefaultFinalizer {
    /// Responder for `env`. Errors are logged unless `env` is `test`.
    pub fn new(env: impl Into<String>) -> Self {
        Self { env: env.into(), on_error: None }
    }

    /// Replace the error hook.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error, &Request) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    fn report(&self, err: &Error, req: &Request) {
        match &self.on_error {
            Some(hook) => hook(err, req),
            None if self.env != "test" => {
                tracing::error!(
                    method = %req.method,
                    url = %req.original_url.as_deref().unwrap_or(&req.url),
                    status = ?err.status(),
                    error = %err,
                    "Unhandled request error"
                );
            }
            None => {}
        }
    }
}

impl Finalizer for DefaultFinalizer {
    fn finalize(&self, err: Option<Error>, req: &mut Request, res: &mut Response) {
        let (status, message) = match &err {
            Some(err) => {
                self.report(err, req);
                let status = err
                    .status()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let message = if self.env == "production" {
                    status.canonical_reason().unwrap_or("Error").to_string()
                } else {
                    err.message()
                };
                (status, message)
            }
            None => {
                let url = req.original_url.as_deref().unwrap_or(&req.url);
                let path = pathname(url).unwrap_or("/");
                (StatusCode::NOT_FOUND, format!("Cannot {} {}", req.method, path))
            }
        };

        if res.is_finished() {
            tracing::warn!(status = %status, "Response already sent; dropping final response");
            return;
        }

        res.status(status);
        let headers = res
            .set_header("Content-Type", "text/plain; charset=utf-8")
            .and_then(|res| res.set_header("X-Content-Type-Options", "nosniff"));
        if let Err(err) = headers {
            tracing::error!(error = %err, "Failed to set final response headers");
        }

        if req.method == Method::HEAD {
            res.end();
        } else {
            res.send(message);
        }
    }
}
