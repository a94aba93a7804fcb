//! Request-time error values.
//!
//! # Responsibilities
//! - Carry a failure raised by a handler, param callback or matcher
//! - Travel through the dispatch loop as a cheap clone
//! - Optionally pin the HTTP status the finalizer should answer with
//!
//! # Design Decisions
//! - Type-erased over `std::error::Error` so handlers can use `?` on any error
//! - Caught panics become ordinary errors with the panic message

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;

/// Plain message error used by [`Error::msg`] and caught panics.
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// Error pending on a request while it moves through the dispatch stack.
#[derive(Clone)]
pub struct Error {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
    status: Option<StatusCode>,
}

impl Error {
    /// Wrap any standard error.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(err),
            status: None,
        }
    }

    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Attach the HTTP status this error should be answered with.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Status attached to this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Rendered error message.
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// Access the wrapped error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Convert a panic payload caught from a handler.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::msg(message)
    }
}

impl<E> From<E> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("message", &self.inner.to_string())
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_msg_and_status() {
        let err = Error::msg("boom").with_status(StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "boom");
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_downcast_preserves_source_type() {
        let err: Error = DiskError.into();
        assert!(err.downcast_ref::<DiskError>().is_some());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_from_panic_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(Error::from_panic(static_str).message(), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(Error::from_panic(owned).message(), "bang");

        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(Error::from_panic(other).message(), "handler panicked");
    }

    #[test]
    fn test_clone_shares_inner() {
        let err = Error::msg("shared");
        let copy = err.clone();
        assert!(Arc::ptr_eq(&err.inner, &copy.inner));
    }
}
