//! HTTP request/response model and the axum bridge.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum, body limit, request ID, timeout)
//!     → request.rs (switchyard Request)
//!     → App::handle (routing)
//!     → response.rs (switchyard Response → axum response)
//!     → Send to client
//! ```

pub mod error;
pub mod request;
pub mod response;
pub mod server;

pub use error::Error;
pub use request::{Query, Request, RequestId, X_REQUEST_ID};
pub use response::Response;
pub use server::HttpServer;
