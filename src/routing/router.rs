//! Ordered layer stack and the request dispatch loop.
//!
//! # Responsibilities
//! - Register middleware, mounted dispatchers, routes and param callbacks
//! - Walk the stack for one request, trimming and restoring the URL around
//!   each middleware layer
//! - Route pending errors only to error-aware handlers
//! - Answer OPTIONS automatically from the routes that matched the path
//!
//! # Data Flow
//! ```text
//! handle(req, res, done)
//!     → next(err): restore URL → scan layers from idx
//!         → no match: done(err)
//!         → match: params → process_params
//!             → route: Route::dispatch
//!             → middleware: trim prefix → handler (normal or error path)
//!         → handler result feeds the next call to next(err)
//! ```
//!
//! # Design Decisions
//! - Configured through `&mut self`, then shared immutably (`Arc<Router>`)
//! - All per-request state lives in the dispatch future, never on layers
//! - The walk is a loop, so stack depth does not grow with layer count
//! - Exhaustion yields to the scheduler before reporting back

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use crate::http::request::{pathname, protohost_len};
use crate::http::{Error, Request, Response};
use crate::observability::metrics;
use crate::routing::error::RegistrationError;
use crate::routing::handler::{BoxFuture, ControlSignal, Dispatch, Handler, Handlers, Outcome};
use crate::routing::layer::{Layer, LayerKind};
use crate::routing::params::{merge_params, process_params, ParamCallback, ParamMemo, Params};
use crate::routing::pattern::{MatchOptions, PathMatch, PathSpec};
use crate::routing::route::Route;

/// Matching behavior shared by every layer of a router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Treat `/Foo` and `/foo` as different paths.
    pub case_sensitive: bool,

    /// Treat a trailing slash as significant in routes.
    pub strict: bool,

    /// Overlay captures on the params inherited from an enclosing router.
    pub merge_params: bool,
}

/// Request dispatcher built from an ordered stack of layers.
#[derive(Debug, Default)]
pub struct Router {
    config: RouterConfig,
    stack: Vec<Layer>,
    routes: Vec<Route>,
    params: HashMap<String, Vec<ParamCallback>>,
}

macro_rules! route_shortcut {
    ($($name:ident;)*) => {
        $(
            #[doc = concat!("Shorthand for `route(path)?.", stringify!($name), "(handlers)`.")]
            pub fn $name(
                &mut self,
                path: impl Into<PathSpec>,
                handlers: impl Into<Handlers>,
            ) -> Result<&mut Self, RegistrationError> {
                self.route(path)?.$name(handlers)?;
                Ok(self)
            }
        )*
    };
}

/// Per-dispatch values restored when the stack is exhausted.
struct Frame {
    parent_url: String,
    parent_params: Params,
    protohost: String,
    allowed: Vec<Method>,
}

impl Frame {
    fn finish(self, err: Option<Error>, req: &mut Request, res: &mut Response) -> Outcome {
        req.base_url = self.parent_url;
        req.params = self.parent_params;

        if req.method == Method::OPTIONS && err.is_none() && !self.allowed.is_empty() {
            let body = self
                .allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(",");
            if let Err(err) = res.set_header("Allow", &body) {
                return Outcome::Exhausted(Some(err));
            }
            res.send(body);
            metrics::record_options_response();
            return Outcome::Handled;
        }

        Outcome::Exhausted(err)
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self { config, ..Self::default() }
    }

    pub fn config(&self) -> RouterConfig {
        self.config
    }

    /// Registered layers in precedence order.
    pub fn stack(&self) -> &[Layer] {
        &self.stack
    }

    /// Route backing a route layer.
    pub fn route_at(&self, layer: &Layer) -> Option<&Route> {
        match layer.kind {
            LayerKind::Route(i) => self.routes.get(i),
            LayerKind::Middleware(_) => None,
        }
    }

    /// Register middleware for every path.
    pub fn middleware(&mut self, handlers: impl Into<Handlers>) -> Result<&mut Self, RegistrationError> {
        self.middleware_at("/", handlers)
    }

    /// Register middleware for paths under `path`.
    pub fn middleware_at(
        &mut self,
        path: impl Into<PathSpec>,
        handlers: impl Into<Handlers>,
    ) -> Result<&mut Self, RegistrationError> {
        let handlers = handlers.into().flatten("Router.use()", "middleware function")?;
        let spec = path.into();
        let options = MatchOptions::prefix(self.config.case_sensitive);

        for handler in handlers {
            tracing::debug!(path = %spec, handler = ?handler, "Registering middleware");
            self.stack.push(Layer::new(&spec, options, LayerKind::Middleware(handler))?);
        }
        Ok(self)
    }

    /// Mount a dispatcher (router, app or custom type) under `path`.
    pub fn mount<D: Dispatch + 'static>(
        &mut self,
        path: impl Into<PathSpec>,
        dispatcher: Arc<D>,
    ) -> Result<&mut Self, RegistrationError> {
        self.middleware_at(path, Handler::mount(dispatcher))
    }

    /// Create a route for `path` and return it for method registration.
    pub fn route(&mut self, path: impl Into<PathSpec>) -> Result<&mut Route, RegistrationError> {
        let spec = path.into();
        let options = MatchOptions::route(self.config.case_sensitive, self.config.strict);
        let index = self.routes.len();
        let layer = Layer::new(&spec, options, LayerKind::Route(index))?;

        tracing::debug!(path = %spec, "Registering route");
        self.stack.push(layer);
        self.routes.push(Route::new(spec.to_string()));
        Ok(&mut self.routes[index])
    }

    route_shortcut! {
        get;
        post;
        put;
        delete;
        patch;
        head;
        options;
        all;
    }

    /// Shorthand for `route(path)?.method(method, handlers)`.
    pub fn method(
        &mut self,
        method: Method,
        path: impl Into<PathSpec>,
        handlers: impl Into<Handlers>,
    ) -> Result<&mut Self, RegistrationError> {
        self.route(path)?.method(method, handlers)?;
        Ok(self)
    }

    /// Register a callback for the param `name`. A leading `:` is accepted
    /// and stripped.
    pub fn param(&mut self, name: &str, callback: ParamCallback) -> Result<&mut Self, RegistrationError> {
        let name = match name.strip_prefix(':') {
            Some(stripped) => {
                tracing::warn!(param = %name, "Leading ':' in param name is deprecated");
                stripped
            }
            None => name,
        };
        if name.is_empty() {
            return Err(RegistrationError::EmptyParamName);
        }
        self.params.entry(name.to_string()).or_default().push(callback);
        Ok(self)
    }

    /// Register the same callback for several params.
    pub fn params(&mut self, names: &[&str], callback: ParamCallback) -> Result<&mut Self, RegistrationError> {
        for name in names {
            self.param(name, callback.clone())?;
        }
        Ok(self)
    }

    /// Dispatch `req`. `done` runs only when the stack is exhausted without a
    /// handler completing the response.
    pub async fn handle<F>(&self, req: &mut Request, res: &mut Response, done: F)
    where
        F: FnOnce(Option<Error>, &mut Request, &mut Response),
    {
        if let Outcome::Exhausted(err) = self.run(req, res).await {
            done(err, req, res);
        }
    }

    async fn run(&self, req: &mut Request, res: &mut Response) -> Outcome {
        tracing::debug!(method = %req.method, url = %req.url, base_url = %req.base_url, "Dispatching");

        if req.original_url.is_none() {
            req.original_url = Some(req.url.clone());
        }
        let mut frame = Frame {
            parent_url: req.base_url.clone(),
            parent_params: req.params.clone(),
            protohost: req.url[..protohost_len(&req.url)].to_string(),
            allowed: Vec::new(),
        };
        let mut memo = ParamMemo::new();

        let mut idx = 0;
        let mut removed = String::new();
        let mut slash_added = false;
        let mut carried: Option<Error> = None;

        loop {
            let mut layer_error = carried.take();

            if slash_added {
                if !req.url.is_empty() {
                    req.url.remove(0);
                }
                slash_added = false;
            }
            if !removed.is_empty() {
                req.base_url = frame.parent_url.clone();
                let rest = req.url.get(frame.protohost.len()..).unwrap_or("").to_string();
                req.url = format!("{}{}{}", frame.protohost, removed, rest);
                removed.clear();
            }

            if idx >= self.stack.len() {
                tokio::task::yield_now().await;
                return self.exhausted(frame, layer_error, req, res);
            }

            let Some(path) = pathname(&req.url).map(str::to_string) else {
                return self.exhausted(frame, layer_error, req, res);
            };

            let mut matched: Option<(&Layer, PathMatch)> = None;
            while idx < self.stack.len() {
                let layer = &self.stack[idx];
                idx += 1;

                let found = match layer.matches(&path) {
                    Ok(Some(found)) => found,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::debug!(layer = %layer.path(), error = %err, "Layer match failed");
                        layer_error.get_or_insert(err);
                        if layer.is_route() {
                            continue;
                        }
                        PathMatch { path: String::new(), params: Vec::new() }
                    }
                };

                if let LayerKind::Route(i) = layer.kind {
                    if layer_error.is_some() {
                        continue;
                    }
                    let route = &self.routes[i];
                    let has_method = route.handles_method(&req.method);
                    if !has_method && req.method == Method::OPTIONS {
                        for method in route.allowed_methods() {
                            if !frame.allowed.contains(&method) {
                                frame.allowed.push(method);
                            }
                        }
                    }
                    if !has_method && req.method != Method::HEAD {
                        continue;
                    }
                }

                matched = Some((layer, found));
                break;
            }

            let Some((layer, found)) = matched else {
                return self.exhausted(frame, layer_error, req, res);
            };
            let PathMatch { path: layer_path, params } = found;

            if let LayerKind::Route(i) = layer.kind {
                req.route = Some(self.routes[i].path().to_string());
            }
            let params: Params = params.into_iter().collect();
            req.params = if self.config.merge_params {
                merge_params(params, &frame.parent_params)
            } else {
                params
            };

            match process_params(&self.params, layer.keys(), &mut memo, req, res).await {
                ControlSignal::Continue => {}
                ControlSignal::Halt => return Outcome::Handled,
                ControlSignal::SkipRoute => {
                    carried = layer_error;
                    continue;
                }
                ControlSignal::Error(err) => {
                    carried = Some(layer_error.unwrap_or(err));
                    continue;
                }
            }

            let signal = match &layer.kind {
                LayerKind::Route(i) => self.routes[*i].dispatch(req, res).await,
                LayerKind::Middleware(handler) => {
                    if !layer_path.is_empty() {
                        if !self.trim_prefix(&layer_path, &path, &frame, req) {
                            carried = layer_error;
                            continue;
                        }
                        removed = layer_path;
                        if frame.protohost.is_empty() && !req.url.starts_with('/') {
                            req.url.insert(0, '/');
                            slash_added = true;
                        }
                        let trimmed = removed.strip_suffix('/').unwrap_or(&removed);
                        req.base_url = format!("{}{}", frame.parent_url, trimmed);
                        tracing::trace!(prefix = %removed, url = %req.url, base_url = %req.base_url, "Trimmed prefix");
                    }
                    match layer_error {
                        Some(err) => handler.call_error(err, req, res).await,
                        None => handler.call(req, res).await,
                    }
                }
            };

            match signal {
                ControlSignal::Continue | ControlSignal::SkipRoute => {}
                ControlSignal::Error(err) => carried = Some(err),
                ControlSignal::Halt => {
                    tracing::debug!(url = %req.url, "Response completed");
                    return Outcome::Handled;
                }
            }
        }
    }

    /// Strip `prefix` from `req.url` when it ends on a segment boundary.
    /// Returns false, leaving the URL untouched, when it does not.
    fn trim_prefix(&self, prefix: &str, path: &str, frame: &Frame, req: &mut Request) -> bool {
        if !path.starts_with(prefix) {
            return false;
        }
        if let Some(c) = path[prefix.len()..].chars().next() {
            if c != '/' && c != '.' {
                return false;
            }
        }
        let start = frame.protohost.len();
        if !req.url.get(start..).is_some_and(|url| url.starts_with(prefix)) {
            return false;
        }
        let rest = req.url[start + prefix.len()..].to_string();
        req.url = format!("{}{}", frame.protohost, rest);
        true
    }

    fn exhausted(&self, frame: Frame, err: Option<Error>, req: &mut Request, res: &mut Response) -> Outcome {
        let outcome = frame.finish(err, req, res);
        tracing::debug!(
            url = %req.url,
            handled = matches!(outcome, Outcome::Handled),
            "Stack exhausted"
        );
        outcome
    }
}

impl Dispatch for Router {
    fn dispatch<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Outcome> {
        Box::pin(self.run(req, res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn noop() -> Handler {
        Handler::sync(|_, _| ControlSignal::Continue)
    }

    fn send(body: &'static str) -> Handler {
        Handler::sync(move |_, res| {
            res.send(body);
            ControlSignal::Halt
        })
    }

    async fn run(router: &Router, method: Method, url: &str) -> (Outcome, Request, Response) {
        let mut req = Request::new(method, url);
        let mut res = Response::new();
        let outcome = router.dispatch(&mut req, &mut res).await;
        (outcome, req, res)
    }

    #[test]
    fn test_registration_builds_stack_in_order() {
        let mut router = Router::new();
        router.middleware(noop()).unwrap();
        router.get("/a", noop()).unwrap();
        router.middleware_at("/b", vec![noop(), noop()]).unwrap();

        assert_eq!(router.stack().len(), 4);
        assert!(!router.stack()[0].is_route());
        assert!(router.stack()[1].is_route());
        assert_eq!(router.stack()[2].path(), "/b");
        assert_eq!(router.route_at(&router.stack()[1]).map(Route::path), Some("/a"));
    }

    #[test]
    fn test_middleware_requires_handlers() {
        let mut router = Router::new();
        let err = router.middleware(Vec::<Handler>::new()).unwrap_err();
        assert_eq!(err.to_string(), "Router.use() requires middleware functions");

        let err = router.middleware(None::<Handler>).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Router.use() requires a middleware function but got a None"
        );
        assert!(router.stack().is_empty());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut router = Router::new();
        assert!(matches!(
            router.route("/bad(").unwrap_err(),
            RegistrationError::InvalidPattern(_)
        ));
        assert!(router.stack().is_empty());
    }

    #[test]
    fn test_param_name_rules() {
        let mut router = Router::new();
        let cb = ParamCallback::sync(|_, _, _, _| ControlSignal::Continue);
        router.param(":id", cb.clone()).unwrap();
        assert!(router.params.contains_key("id"));
        assert!(matches!(
            router.param("", cb.clone()).unwrap_err(),
            RegistrationError::EmptyParamName
        ));
        router.params(&["a", "b"], cb).unwrap();
        assert!(router.params.contains_key("a") && router.params.contains_key("b"));
    }

    #[tokio::test]
    async fn test_route_match_sends_response() {
        let mut router = Router::new();
        router.get("/hello", send("world")).unwrap();

        let (outcome, _, res) = run(&router, Method::GET, "/hello").await;
        assert!(matches!(outcome, Outcome::Handled));
        assert_eq!(res.text(), "world");
    }

    #[tokio::test]
    async fn test_no_match_exhausts_without_error() {
        let mut router = Router::new();
        router.get("/hello", send("world")).unwrap();

        let (outcome, req, _) = run(&router, Method::GET, "/other").await;
        assert!(matches!(outcome, Outcome::Exhausted(None)));
        assert_eq!(req.original_url.as_deref(), Some("/other"));
    }

    #[tokio::test]
    async fn test_empty_url_exhausts() {
        let mut router = Router::new();
        router.middleware(send("never")).unwrap();
        let (outcome, _, res) = run(&router, Method::GET, "").await;
        assert!(matches!(outcome, Outcome::Exhausted(None)));
        assert!(!res.is_finished());
    }

    #[tokio::test]
    async fn test_options_lists_allowed_methods() {
        let mut router = Router::new();
        router.get("/users", noop()).unwrap();
        router.post("/users", noop()).unwrap();
        router.put("/other", noop()).unwrap();

        let (outcome, _, res) = run(&router, Method::OPTIONS, "/users").await;
        assert!(matches!(outcome, Outcome::Handled));
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("allow"), Some("GET,HEAD,POST"));
        assert_eq!(res.text(), "GET,HEAD,POST");
    }

    #[tokio::test]
    async fn test_explicit_options_route_wins() {
        let mut router = Router::new();
        router.get("/users", noop()).unwrap();
        router.options("/users", send("custom")).unwrap();

        let (_, _, res) = run(&router, Method::OPTIONS, "/users").await;
        assert_eq!(res.text(), "custom");
    }

    #[tokio::test]
    async fn test_match_error_skips_routes_and_reaches_error_middleware() {
        let mut router = Router::new();
        router.get("/files/:name", send("route")).unwrap();
        router
            .middleware(Handler::error_sync(|err, _, res| {
                res.status(err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
                    .send(err.message());
                ControlSignal::Halt
            }))
            .unwrap();

        let (outcome, _, res) = run(&router, Method::GET, "/files/%zz").await;
        assert!(matches!(outcome, Outcome::Handled));
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.text(), "Failed to decode param '%zz'");
    }

    #[tokio::test]
    async fn test_head_reaches_get_route() {
        let mut router = Router::new();
        router.get("/x", send("body")).unwrap();
        let (outcome, _, _) = run(&router, Method::HEAD, "/x").await;
        assert!(matches!(outcome, Outcome::Handled));
    }
}
