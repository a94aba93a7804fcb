//! Switchyard demo server.
//!
//! ```text
//! TCP → axum bridge → App::handle → Router stack → handlers
//! ```
//!
//! Serves a small app exercising middleware, params, mounted routers and a
//! mounted sub-application.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use switchyard::app::settings::ENV;
use switchyard::config::{load_config, validate_config, Config, ConfigError};
use switchyard::observability::{logging, metrics};
use switchyard::routing::RegistrationError;
use switchyard::{lifecycle, App, ControlSignal, Error, Handler, HttpServer, ParamCallback, Router, Shutdown};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Express-style request dispatcher demo server", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Ok(env) = std::env::var("SWITCHYARD_ENV") {
        config.settings.set(ENV, env);
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
    tracing::info!(
        bind_address = %config.server.bind_address,
        env = %config.settings.env,
        request_timeout_secs = config.server.request_timeout_secs,
        max_body_bytes = config.server.max_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(err) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %err,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = Arc::new(build_app(&config)?);

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(lifecycle::wait_for_signal(shutdown.clone()));

    HttpServer::new(app, config.server.clone())
        .run(listener, shutdown.subscribe())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_app(config: &Config) -> Result<App, RegistrationError> {
    let mut app = App::with_settings(config.settings.clone());

    app.middleware(Handler::sync(|req, _| {
        tracing::debug!(method = %req.method, url = %req.url, "Incoming request");
        ControlSignal::Continue
    }))?;

    app.get(
        "/",
        Handler::sync(|_, res| {
            res.send("switchyard");
            ControlSignal::Halt
        }),
    )?;
    app.get(
        "/health",
        Handler::sync(|_, res| match res.json(&json!({ "status": "ok" })) {
            Ok(_) => ControlSignal::Halt,
            Err(err) => ControlSignal::Error(err),
        }),
    )?;

    app.param(
        "id",
        ParamCallback::sync(|req, _, value, name| match value.parse::<u64>() {
            Ok(id) => {
                req.params.set(name, id);
                ControlSignal::Continue
            }
            Err(_) => ControlSignal::SkipRoute,
        }),
    )?;
    app.get(
        "/users/:id",
        Handler::sync(|req, res| {
            let body = json!({ "id": req.params.get("id") });
            match res.json(&body) {
                Ok(_) => ControlSignal::Halt,
                Err(err) => ControlSignal::Error(err),
            }
        }),
    )?;

    let mut api = Router::with_config(config.router);
    api.get(
        "/echo/:word",
        Handler::sync(|req, res| {
            let word = req.params.get_str("word").unwrap_or_default().to_string();
            res.send(word);
            ControlSignal::Halt
        }),
    )?;
    api.get(
        "/fail",
        Handler::sync(|_, _| ControlSignal::error(Error::msg("requested failure"))),
    )?;
    app.mount("/api", Arc::new(api))?;

    let mut admin = App::new();
    admin.get(
        "/",
        Handler::sync(|req, res| {
            let mountpath = req.app.as_ref().map(|ctx| ctx.mountpath.clone()).unwrap_or_default();
            res.send(format!("admin mounted at {}", mountpath));
            ControlSignal::Halt
        }),
    )?;
    app.mount_app("/admin", admin)?;

    app.middleware(Handler::error_sync(|err, req, res| {
        tracing::warn!(url = %req.url, error = %err, "Request failed");
        let status = err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match res.status(status).json(&json!({ "error": err.message() })) {
            Ok(_) => ControlSignal::Halt,
            Err(err) => ControlSignal::Error(err),
        }
    }))?;

    Ok(app)
}
