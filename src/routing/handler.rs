//! Handler kinds and the signals they return.
//!
//! # Responsibilities
//! - Define the callable shapes the dispatcher invokes (normal, error-aware,
//!   mounted dispatcher)
//! - Define `ControlSignal`, the value a handler returns to steer dispatch
//! - Catch panics at every invocation point and turn them into errors
//! - Flatten nested handler lists given at registration
//!
//! # Design Decisions
//! - Handler kind is explicit; error-aware handlers never see normal flow and
//!   normal handlers never see error flow
//! - A mounted dispatcher is recognized by the `Dispatch` capability only

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::http::{Error, Request, Response};
use crate::observability::metrics;
use crate::routing::error::RegistrationError;

pub use futures_util::future::BoxFuture;

/// What a handler tells the dispatcher to do next.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// Advance to the next matching handler.
    Continue,
    /// Abandon the current route and resume matching at the next layer.
    SkipRoute,
    /// Enter error flow with this error.
    Error(Error),
    /// The response is complete; stop dispatching.
    Halt,
}

impl ControlSignal {
    /// Shorthand for `ControlSignal::Error(err.into())`.
    pub fn error(err: impl Into<Error>) -> Self {
        ControlSignal::Error(err.into())
    }
}

impl<E: Into<Error>> From<Result<(), E>> for ControlSignal {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ControlSignal::Continue,
            Err(err) => ControlSignal::Error(err.into()),
        }
    }
}

/// Result of running a whole dispatcher.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A handler completed the response.
    Handled,
    /// The stack ran out, possibly with an unresolved error.
    Exhausted(Option<Error>),
}

/// Anything that can dispatch a request: a router, an app, or a custom type.
pub trait Dispatch: Send + Sync {
    fn dispatch<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Outcome>;
}

type NormalFn =
    dyn for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, ControlSignal> + Send + Sync;
type ErrorFn = dyn for<'a> Fn(Error, &'a mut Request, &'a mut Response) -> BoxFuture<'a, ControlSignal>
    + Send
    + Sync;

/// A registered callable.
#[derive(Clone)]
pub enum Handler {
    /// Runs in normal flow only.
    Normal(Arc<NormalFn>),
    /// Runs in error flow only and receives the pending error.
    ErrorAware(Arc<ErrorFn>),
    /// A nested dispatcher, invoked through the mounting adapter.
    Mounted(Arc<dyn Dispatch>),
}

impl Handler {
    /// Async normal-flow handler.
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response) -> BoxFuture<'a, ControlSignal>
            + Send
            + Sync
            + 'static,
    {
        Handler::Normal(Arc::new(f))
    }

    /// Normal-flow handler that completes without suspending.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Request, &mut Response) -> ControlSignal + Send + Sync + 'static,
    {
        Self::new(move |req, res| Box::pin(futures_util::future::ready(f(req, res))))
    }

    /// Async error-flow handler.
    pub fn error<F>(f: F) -> Self
    where
        F: for<'a> Fn(Error, &'a mut Request, &'a mut Response) -> BoxFuture<'a, ControlSignal>
            + Send
            + Sync
            + 'static,
    {
        Handler::ErrorAware(Arc::new(f))
    }

    /// Error-flow handler that completes without suspending.
    pub fn error_sync<F>(f: F) -> Self
    where
        F: Fn(Error, &mut Request, &mut Response) -> ControlSignal + Send + Sync + 'static,
    {
        Self::error(move |err, req, res| Box::pin(futures_util::future::ready(f(err, req, res))))
    }

    /// Wrap a dispatcher so it can be mounted as middleware.
    pub fn mount<D: Dispatch + 'static>(dispatcher: Arc<D>) -> Self {
        Handler::Mounted(dispatcher)
    }

    pub fn is_error_aware(&self) -> bool {
        matches!(self, Handler::ErrorAware(_))
    }

    /// Invoke in normal flow. Error-aware handlers are passed over.
    pub(crate) async fn call(&self, req: &mut Request, res: &mut Response) -> ControlSignal {
        match self {
            Handler::Normal(f) => guarded(|| {
                let (req, res) = (req, res);
                f(req, res)
            })
            .await,
            Handler::ErrorAware(_) => ControlSignal::Continue,
            Handler::Mounted(child) => invoke_mounted(child.as_ref(), req, res).await,
        }
    }

    /// Invoke in error flow. Only error-aware handlers receive the error.
    pub(crate) async fn call_error(
        &self,
        err: Error,
        req: &mut Request,
        res: &mut Response,
    ) -> ControlSignal {
        match self {
            Handler::ErrorAware(f) => guarded(|| {
                let (req, res) = (req, res);
                f(err, req, res)
            })
            .await,
            _ => ControlSignal::Error(err),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Handler::Normal(_) => "Handler::Normal",
            Handler::ErrorAware(_) => "Handler::ErrorAware",
            Handler::Mounted(_) => "Handler::Mounted",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Call `start` and await the future it returns, converting a panic in
/// either step into `ControlSignal::Error`.
pub(crate) async fn guarded<'a, F>(start: F) -> ControlSignal
where
    F: FnOnce() -> BoxFuture<'a, ControlSignal>,
{
    catch_panics(start, ControlSignal::Error).await
}

async fn catch_panics<F, T, Fut>(start: F, on_panic: fn(Error) -> T) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let future = match std::panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => future,
        Err(payload) => return on_panic(panicked(payload)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => value,
        Err(payload) => on_panic(panicked(payload)),
    }
}

fn panicked(payload: Box<dyn std::any::Any + Send>) -> Error {
    let err = Error::from_panic(payload);
    tracing::warn!(error = %err, "Handler panicked");
    metrics::record_handler_panic();
    err
}

/// Run a mounted dispatcher, restoring the request's app identity when it
/// hands control back.
async fn invoke_mounted(child: &dyn Dispatch, req: &mut Request, res: &mut Response) -> ControlSignal {
    let saved_req_app = req.app.clone();
    let saved_res_app = res.app.clone();

    let (child_req, child_res) = (&mut *req, &mut *res);
    let outcome = catch_panics(
        || {
            let (req, res) = (child_req, child_res);
            child.dispatch(req, res)
        },
        |err| Outcome::Exhausted(Some(err)),
    )
    .await;

    match outcome {
        Outcome::Handled => ControlSignal::Halt,
        Outcome::Exhausted(err) => {
            req.app = saved_req_app;
            res.app = saved_res_app;
            match err {
                Some(err) => ControlSignal::Error(err),
                None => ControlSignal::Continue,
            }
        }
    }
}

/// Handlers given at registration, possibly nested.
#[derive(Debug, Clone)]
pub enum Handlers {
    One(Handler),
    Many(Vec<Handlers>),
    /// A value that is not callable, named by its type.
    Missing(&'static str),
}

impl Handlers {
    /// Flatten to a list, rejecting empty lists and non-callables.
    pub(crate) fn flatten(
        self,
        method: &'static str,
        expected: &'static str,
    ) -> Result<Vec<Handler>, RegistrationError> {
        let mut out = Vec::new();
        self.flatten_into(&mut out, method, expected)?;
        if out.is_empty() {
            return Err(RegistrationError::MissingHandlers(method));
        }
        Ok(out)
    }

    fn flatten_into(
        self,
        out: &mut Vec<Handler>,
        method: &'static str,
        expected: &'static str,
    ) -> Result<(), RegistrationError> {
        match self {
            Handlers::One(handler) => out.push(handler),
            Handlers::Many(items) => {
                for item in items {
                    item.flatten_into(out, method, expected)?;
                }
            }
            Handlers::Missing(type_name) => {
                return Err(RegistrationError::NotCallable { method, expected, type_name })
            }
        }
        Ok(())
    }
}

impl From<Handler> for Handlers {
    fn from(handler: Handler) -> Self {
        Handlers::One(handler)
    }
}

impl From<Option<Handler>> for Handlers {
    fn from(handler: Option<Handler>) -> Self {
        match handler {
            Some(handler) => Handlers::One(handler),
            None => Handlers::Missing("None"),
        }
    }
}

impl<T: Into<Handlers>> From<Vec<T>> for Handlers {
    fn from(items: Vec<T>) -> Self {
        Handlers::Many(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Handlers>, const N: usize> From<[T; N]> for Handlers {
    fn from(items: [T; N]) -> Self {
        Handlers::Many(items.into_iter().map(Into::into).collect())
    }
}
