//! Shared utilities for integration tests.

use std::sync::{Arc, Mutex};

use axum::http::Method;
use switchyard::routing::Dispatch;
use switchyard::{ControlSignal, Handler, Outcome, Request, Response};

/// Ordered log shared between handlers and assertions.
pub type Log = Arc<Mutex<Vec<String>>>;

#[allow(dead_code)]
pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

#[allow(dead_code)]
pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Handler that records `label` and continues.
#[allow(dead_code)]
pub fn record(log: &Log, label: &str) -> Handler {
    let log = log.clone();
    let label = label.to_string();
    Handler::sync(move |_, _| {
        log.lock().unwrap().push(label.clone());
        ControlSignal::Continue
    })
}

/// Handler that completes the response with `body`.
#[allow(dead_code)]
pub fn send(body: &'static str) -> Handler {
    Handler::sync(move |_, res| {
        res.send(body);
        ControlSignal::Halt
    })
}

/// Dispatch one request through `dispatcher`.
#[allow(dead_code)]
pub async fn dispatch<D: Dispatch>(dispatcher: &D, method: Method, url: &str) -> (Outcome, Request, Response) {
    let mut req = Request::new(method, url);
    let mut res = Response::new();
    let outcome = dispatcher.dispatch(&mut req, &mut res).await;
    (outcome, req, res)
}
