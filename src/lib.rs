//! Switchyard: an in-process HTTP request dispatcher.
//!
//! Requests walk an ordered stack of layers. Each layer pairs a path
//! pattern with middleware, a route, or a mounted router/app. Handlers steer
//! dispatch by returning a `ControlSignal`.

// Core dispatch
pub mod app;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use app::{App, AppContext, DefaultFinalizer, Finalizer, Settings};
pub use config::Config;
pub use http::{Error, HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use routing::{ControlSignal, Dispatch, Handler, Outcome, ParamCallback, Route, Router, RouterConfig};
