//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (before sharing):
//!     path + handlers
//!     → pattern.rs (compile path pattern)
//!     → layer.rs (pattern bound to a handler or route)
//!     → router.rs (ordered stack, param callbacks)
//!
//! Dispatch (per request):
//!     Router::handle
//!     → layer match → params.rs (param callbacks, memoized)
//!     → route.rs (method chain) or middleware handler
//!     → handler.rs (panic guard, mounted dispatchers)
//! ```
//!
//! # Design Decisions
//! - Layers are compiled at registration and immutable at dispatch
//! - First matching layer wins; order of registration is precedence
//! - Deterministic: same request always walks the same layers

pub mod error;
pub mod handler;
pub mod layer;
pub mod params;
pub mod pattern;
pub mod route;
pub mod router;

pub use error::{PatternError, RegistrationError};
pub use handler::{BoxFuture, ControlSignal, Dispatch, Handler, Handlers, Outcome};
pub use layer::Layer;
pub use params::{merge_params, ParamCallback, ParamKey, Params};
pub use pattern::{MatchOptions, PathMatch, PathSpec, Pattern};
pub use route::Route;
pub use router::{Router, RouterConfig};
