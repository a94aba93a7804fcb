//! Application facade over the router.
//!
//! # Responsibilities
//! - Own the settings and a lazily created root router
//! - Prepare each request (app identity, query, `X-Powered-By`)
//! - Mount sub-applications, which inherit unset settings
//! - Finish requests the stack did not complete
//!
//! # Data Flow
//! ```text
//! App::handle(req, res)
//!     → init: req.app, res.app, query, X-Powered-By
//!     → Router::dispatch
//!         → Handled: done
//!         → Exhausted(err): Finalizer (404 or error response)
//! ```
//!
//! # Design Decisions
//! - The router is created on first registration, using the routing
//!   settings in effect at that moment
//! - A mounted app is an ordinary `Dispatch` value behind the mounting
//!   adapter, which restores the parent identity when it hands back control

pub mod finalhandler;
pub mod settings;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use axum::http::Method;
use serde_json::Value;

use crate::http::request::query_string;
use crate::http::{Error, Query, Request, Response};
use crate::observability::metrics;
use crate::routing::{
    BoxFuture, Dispatch, Handlers, Outcome, ParamCallback, PathSpec, RegistrationError, Route, Router,
    RouterConfig,
};

pub use finalhandler::{DefaultFinalizer, Finalizer};
pub use settings::{QueryParser, Settings};

/// Identity of an application as seen by the requests it handles.
#[derive(Debug, Clone, PartialEq)]
pub struct AppContext {
    pub settings: Settings,

    /// Path the app is mounted at; `/` for the root app.
    pub mountpath: String,
}

impl Default for AppContext {
    fn default() -> Self {
        Self { settings: Settings::default(), mountpath: "/".to_string() }
    }
}

/// Where an app is mounted. Shared with the apps mounted under it, so the
/// chain stays current when an ancestor is mounted later.
#[derive(Debug, Default)]
struct MountSlot(RwLock<Option<MountPoint>>);

#[derive(Debug)]
struct MountPoint {
    mountpath: String,
    parent: Arc<MountSlot>,
}

impl MountSlot {
    fn path(&self) -> String {
        let point = self.0.read().unwrap_or_else(PoisonError::into_inner);
        match point.as_ref() {
            Some(point) => format!("{}{}", point.parent.path(), point.mountpath),
            None => String::new(),
        }
    }

    fn attach(&self, mountpath: String, parent: Arc<MountSlot>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(MountPoint { mountpath, parent });
    }
}

/// A configurable request handler: settings, a router and a finalizer.
#[derive(Default)]
pub struct App {
    context: Arc<AppContext>,
    router: Option<Router>,
    finalizer: Option<Arc<dyn Finalizer>>,
    mount: Arc<MountSlot>,
}

macro_rules! route_shortcut {
    ($($name:ident;)*) => {
        $(
            #[doc = concat!("Register a route handling `", stringify!($name), "` on the root router.")]
            pub fn $name(
                &mut self,
                path: impl Into<PathSpec>,
                handlers: impl Into<Handlers>,
            ) -> Result<&mut Self, RegistrationError> {
                self.router_mut().$name(path, handlers)?;
                Ok(self)
            }
        )*
    };
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// App with settings from configuration.
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            context: Arc::new(AppContext { settings, ..AppContext::default() }),
            ..Self::default()
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        &self.context.settings
    }

    pub fn mountpath(&self) -> &str {
        &self.context.mountpath
    }

    /// Full mount path through every ancestor; empty for the root app.
    pub fn path(&self) -> String {
        self.mount.path()
    }

    /// Root router, if anything was registered yet.
    pub fn router(&self) -> Option<&Router> {
        self.router.as_ref()
    }

    fn router_mut(&mut self) -> &mut Router {
        let settings = &self.context.settings;
        let config = RouterConfig {
            case_sensitive: settings.case_sensitive_routing,
            strict: settings.strict_routing,
            merge_params: false,
        };
        self.router.get_or_insert_with(|| {
            tracing::debug!(
                case_sensitive = config.case_sensitive,
                strict = config.strict,
                "Creating root router"
            );
            Router::with_config(config)
        })
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        Arc::make_mut(&mut self.context).settings.set(name, value);
        self
    }

    /// Read a setting by name.
    pub fn setting(&self, name: &str) -> Option<Value> {
        self.context.settings.get(name)
    }

    pub fn enable(&mut self, name: &str) -> &mut Self {
        self.set(name, true)
    }

    pub fn disable(&mut self, name: &str) -> &mut Self {
        self.set(name, false)
    }

    pub fn enabled(&self, name: &str) -> bool {
        self.context.settings.enabled(name)
    }

    pub fn disabled(&self, name: &str) -> bool {
        self.context.settings.disabled(name)
    }

    /// Replace the responder used when the stack is exhausted.
    pub fn finalizer(&mut self, finalizer: impl Finalizer + 'static) -> &mut Self {
        self.finalizer = Some(Arc::new(finalizer));
        self
    }

    pub fn middleware(&mut self, handlers: impl Into<Handlers>) -> Result<&mut Self, RegistrationError> {
        self.router_mut().middleware(handlers)?;
        Ok(self)
    }

    pub fn middleware_at(
        &mut self,
        path: impl Into<PathSpec>,
        handlers: impl Into<Handlers>,
    ) -> Result<&mut Self, RegistrationError> {
        self.router_mut().middleware_at(path, handlers)?;
        Ok(self)
    }

    /// Mount a router or any other dispatcher under `path`.
    pub fn mount<D: Dispatch + 'static>(
        &mut self,
        path: impl Into<PathSpec>,
        dispatcher: Arc<D>,
    ) -> Result<&mut Self, RegistrationError> {
        self.router_mut().mount(path, dispatcher)?;
        Ok(self)
    }

    /// Mount a sub-application under `path`. Settings the child never
    /// assigned are copied from this app.
    pub fn mount_app(&mut self, path: impl Into<PathSpec>, mut child: App) -> Result<&mut Self, RegistrationError> {
        let spec = path.into();
        let context = Arc::make_mut(&mut child.context);
        context.mountpath = spec.to_string();
        context.settings.inherit(&self.context.settings);
        child.mount.attach(spec.to_string(), self.mount.clone());

        tracing::info!(mountpath = %spec, "Mounting sub-application");
        self.router_mut().mount(spec, Arc::new(child))?;
        Ok(self)
    }

    pub fn route(&mut self, path: impl Into<PathSpec>) -> Result<&mut Route, RegistrationError> {
        self.router_mut().route(path)
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

    pub fn method(
        &mut self,
        method: Method,
        path: impl Into<PathSpec>,
        handlers: impl Into<Handlers>,
    ) -> Result<&mut Self, RegistrationError> {
        self.router_mut().method(method, path, handlers)?;
        Ok(self)
    }

    pub fn param(&mut self, name: &str, callback: ParamCallback) -> Result<&mut Self, RegistrationError> {
        self.router_mut().param(name, callback)?;
        Ok(self)
    }

    pub fn params(&mut self, names: &[&str], callback: ParamCallback) -> Result<&mut Self, RegistrationError> {
        self.router_mut().params(names, callback)?;
        Ok(self)
    }

    /// Dispatch `req` and always leave `res` finished: requests the stack
    /// did not complete go to the finalizer.
    pub async fn handle(&self, req: &mut Request, res: &mut Response) {
        let started = Instant::now();
        let method = req.method.clone();

        let outcome = self.dispatch(req, res).await;
        let label = match &outcome {
            Outcome::Handled => "handled",
            Outcome::Exhausted(None) => "not_found",
            Outcome::Exhausted(Some(_)) => "error",
        };
        if let Outcome::Exhausted(err) = outcome {
            match &self.finalizer {
                Some(finalizer) => finalizer.finalize(err, req, res),
                None => DefaultFinalizer::new(self.context.settings.env.clone()).finalize(err, req, res),
            }
        }

        metrics::record_dispatch(method.as_str(), label, started);
    }

    /// Dispatch `req`, calling `done` instead of the finalizer when the
    /// stack is exhausted.
    pub async fn handle_with<F>(&self, req: &mut Request, res: &mut Response, done: F)
    where
        F: FnOnce(Option<Error>, &mut Request, &mut Response),
    {
        if let Outcome::Exhausted(err) = self.dispatch(req, res).await {
            done(err, req, res);
        }
    }

    fn init(&self, req: &mut Request, res: &mut Response) {
        req.app = Some(self.context.clone());
        res.app = Some(self.context.clone());

        let settings = &self.context.settings;
        if settings.x_powered_by {
            if let Err(err) = res.set_header("X-Powered-By", "Switchyard") {
                tracing::warn!(error = %err, "Failed to set X-Powered-By");
            }
        }
        if req.query.is_none() {
            req.query = Some(match settings.query_parser {
                QueryParser::Simple => Query::parse(query_string(&req.url).unwrap_or("")),
                QueryParser::Disabled => Query::default(),
            });
        }
    }
}

impl Dispatch for App {
    fn dispatch<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some(router) = &self.router else {
                tracing::debug!(mountpath = %self.context.mountpath, "No routes registered");
                return Outcome::Exhausted(None);
            };
            self.init(req, res);
            router.dispatch(req, res).await
        })
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("context", &self.context)
            .field("router", &self.router)
            .field("path", &self.path())
            .field("custom_finalizer", &self.finalizer.is_some())
            .finish()
    }
}
