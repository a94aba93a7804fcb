//! Method-tagged handler chains sharing one path.
//!
//! # Responsibilities
//! - Register handlers per HTTP method (or for every method)
//! - Report which methods the route answers, for OPTIONS replies
//! - Walk its own chain for one request, independent of the router stack
//!
//! # Design Decisions
//! - One ordered stack keeps `all` and per-method registrations interleaved
//! - HEAD falls back to GET handlers unless HEAD was registered explicitly
//! - A route never mutates itself during dispatch

use axum::http::Method;

use crate::http::{Error, Request, Response};
use crate::routing::error::RegistrationError;
use crate::routing::handler::{ControlSignal, Handler, Handlers};

#[derive(Debug, Clone)]
struct RouteEntry {
    /// `None` when registered through `all`.
    method: Option<Method>,
    handler: Handler,
}

/// Handlers bound to a single path.
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    stack: Vec<RouteEntry>,
    methods: Vec<Method>,
    handles_all: bool,
}

macro_rules! method_registrar {
    ($($name:ident => $method:expr, $label:literal;)*) => {
        $(
            #[doc = concat!("Register handlers for `", stringify!($method), "`.")]
            pub fn $name(&mut self, handlers: impl Into<Handlers>) -> Result<&mut Self, RegistrationError> {
                self.register(Some($method), handlers.into(), $label)
            }
        )*
    };
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stack: Vec::new(),
            methods: Vec::new(),
            handles_all: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a request with `method` would reach any handler.
    pub fn handles_method(&self, method: &Method) -> bool {
        if self.handles_all {
            return true;
        }
        self.methods.contains(&self.effective_method(method))
    }

    /// Methods with at least one handler, with HEAD implied by GET.
    pub fn allowed_methods(&self) -> Vec<Method> {
        let mut methods = self.methods.clone();
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        methods
    }

    fn effective_method(&self, method: &Method) -> Method {
        if *method == Method::HEAD && !self.methods.contains(&Method::HEAD) {
            Method::GET
        } else {
            method.clone()
        }
    }

    /// Run the chain for `req`.
    ///
    /// Returns `Continue` when the chain completes or is skipped,
    /// `Error` when an error is still unresolved, and `Halt` when a handler
    /// completed the response.
    pub async fn dispatch(&self, req: &mut Request, res: &mut Response) -> ControlSignal {
        let method = self.effective_method(&req.method);
        req.route = Some(self.path.clone());

        let mut pending: Option<Error> = None;
        for entry in &self.stack {
            if entry.method.as_ref().is_some_and(|m| *m != method) {
                continue;
            }

            let signal = match pending.take() {
                Some(err) => entry.handler.call_error(err, req, res).await,
                None => entry.handler.call(req, res).await,
            };

            match signal {
                ControlSignal::Continue => {}
                ControlSignal::SkipRoute => return ControlSignal::Continue,
                ControlSignal::Error(err) => pending = Some(err),
                ControlSignal::Halt => return ControlSignal::Halt,
            }
        }

        match pending {
            Some(err) => ControlSignal::Error(err),
            None => ControlSignal::Continue,
        }
    }

    /// Register handlers for every method.
    pub fn all(&mut self, handlers: impl Into<Handlers>) -> Result<&mut Self, RegistrationError> {
        let handlers = handlers.into().flatten("Route.all()", "callback function")?;
        self.handles_all = true;
        for handler in handlers {
            self.stack.push(RouteEntry { method: None, handler });
        }
        Ok(self)
    }

    /// Register handlers for an arbitrary method.
    pub fn method(
        &mut self,
        method: Method,
        handlers: impl Into<Handlers>,
    ) -> Result<&mut Self, RegistrationError> {
        self.register(Some(method), handlers.into(), "Route.method()")
    }

    method_registrar! {
        get => Method::GET, "Route.get()";
        post => Method::POST, "Route.post()";
        put => Method::PUT, "Route.put()";
        delete => Method::DELETE, "Route.delete()";
        patch => Method::PATCH, "Route.patch()";
        head => Method::HEAD, "Route.head()";
        options => Method::OPTIONS, "Route.options()";
    }

    fn register(
        &mut self,
        method: Option<Method>,
        handlers: Handlers,
        label: &'static str,
    ) -> Result<&mut Self, RegistrationError> {
        let handlers = handlers.flatten(label, "callback function")?;
        if let Some(method) = &method {
            tracing::trace!(method = %method, path = %self.path, "Registering route handlers");
            if !self.methods.contains(method) {
                self.methods.push(method.clone());
            }
        }
        for handler in handlers {
            self.stack.push(RouteEntry { method: method.clone(), handler });
        }
        Ok(self)
    }
}
