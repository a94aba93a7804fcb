//! HTTP server setup and the bridge into the dispatcher.
//!
//! # Responsibilities
//! - Create the Axum router that forwards every path to the app
//! - Wire up middleware (tracing, timeout)
//! - Buffer the body under the configured limit
//! - Assign or propagate the request ID
//! - Serve until the shutdown signal fires

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response as AxumResponse},
    routing::any,
    Router as AxumRouter,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::app::App;
use crate::config::ServerConfig;
use crate::http::{Request, RequestId, Response, X_REQUEST_ID};

/// State injected into the bridge handler.
#[derive(Clone)]
struct BridgeState {
    app: Arc<App>,
    max_body_bytes: usize,
}

/// HTTP server serving one `App`.
pub struct HttpServer {
    router: AxumRouter,
    config: ServerConfig,
}

impl HttpServer {
    pub fn new(app: Arc<App>, config: ServerConfig) -> Self {
        let state = BridgeState { app, max_body_bytes: config.max_body_bytes };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, state: BridgeState) -> AxumRouter {
        AxumRouter::new()
            .route("/{*path}", any(dispatch_handler))
            .route("/", any(dispatch_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// The configured Axum router, for embedding or in-process testing.
    pub fn into_router(self) -> AxumRouter {
        self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Convert the axum request, run the app, convert the response back.
async fn dispatch_handler(State(state): State<BridgeState>, request: axum::extract::Request) -> AxumResponse {
    let (parts, body) = request.into_parts();

    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| RequestId(v.to_string()))
        .unwrap_or_else(RequestId::generate);

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(
                request_id = %request_id.as_str(),
                limit = state.max_body_bytes,
                error = %err,
                "Rejecting request body"
            );
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }
    };

    let mut req = Request::new(parts.method, parts.uri.to_string());
    req.headers = parts.headers;
    req.body = body;
    req.extensions = parts.extensions;
    req.extensions.insert(request_id.clone());
    let mut res = Response::new();

    let span = tracing::info_span!(
        "dispatch",
        request_id = %request_id.as_str(),
        method = %req.method,
        url = %req.url,
    );
    state.app.handle(&mut req, &mut res).instrument(span).await;

    match HeaderValue::from_str(request_id.as_str()) {
        Ok(value) => {
            res.headers_mut().insert(X_REQUEST_ID, value);
        }
        Err(err) => tracing::warn!(error = %err, "Request ID is not a valid header value"),
    }
    res.into_response()
}
