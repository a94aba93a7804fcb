//! Dispatch behavior of `Router` observed from the outside.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use serde_json::json;
use switchyard::routing::{Dispatch, RouterConfig};
use switchyard::{ControlSignal, Error, Handler, Outcome, ParamCallback, Request, Response, Router};

mod common;

use common::{dispatch, entries, log, record, send};

/// Run `router.handle` and capture the error passed to `done`.
async fn handle(router: &Router, method: Method, url: &str) -> (bool, Option<Error>, Response) {
    let mut req = Request::new(method, url);
    let mut res = Response::new();
    let mut called = false;
    let mut seen = None;
    router
        .handle(&mut req, &mut res, |err, _, _| {
            called = true;
            seen = err;
        })
        .await;
    (called, seen, res)
}

#[tokio::test]
async fn test_middleware_sees_trimmed_url() {
    let mut router = Router::new();
    router
        .middleware_at(
            "/foo",
            Handler::sync(|req, res| {
                res.send(format!("saw {} {}", req.method, req.url));
                ControlSignal::Halt
            }),
        )
        .unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/foo/bar").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.text(), "saw GET /bar");
}

#[tokio::test]
async fn test_param_callback_converts_value() {
    let mut router = Router::new();
    router
        .param(
            "id",
            ParamCallback::sync(|req, _, value, name| match value.parse::<u64>() {
                Ok(id) => {
                    req.params.set(name, id);
                    ControlSignal::Continue
                }
                Err(err) => ControlSignal::error(err),
            }),
        )
        .unwrap();
    router
        .get(
            "/user/:id",
            Handler::sync(|req, res| {
                assert_eq!(req.params.get("id"), Some(&json!(123)));
                res.send("ok");
                ControlSignal::Halt
            }),
        )
        .unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/user/123").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.text(), "ok");
}

#[tokio::test]
async fn test_param_callback_runs_once_across_mounts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut router = Router::new();
    router
        .param(
            "user",
            ParamCallback::sync(move |_, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlSignal::Continue
            }),
        )
        .unwrap();
    router.mount("/foo/:user/", Arc::new(Router::new())).unwrap();
    router.mount("/foo/:user/", Arc::new(Router::new())).unwrap();

    let (outcome, _, _) = dispatch(&router, Method::GET, "/foo/bob/bar").await;
    assert!(matches!(outcome, Outcome::Exhausted(None)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_param_callback_runs_per_distinct_value() {
    let seen = log();
    let sink = seen.clone();

    let mut router = Router::new();
    router
        .param(
            "user",
            ParamCallback::sync(move |_, _, value, _| {
                sink.lock().unwrap().push(value.to_string());
                ControlSignal::Continue
            }),
        )
        .unwrap();
    router.middleware_at("/:user", record(&seen, "first")).unwrap();
    router.middleware_at("/:other/:user", record(&seen, "second")).unwrap();
    router.middleware_at("/:user", record(&seen, "third")).unwrap();

    dispatch(&router, Method::GET, "/alice/bob").await;
    assert_eq!(entries(&seen), vec!["alice", "first", "bob", "second", "alice", "third"]);
}

#[tokio::test]
async fn test_memoized_error_replayed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut router = Router::new();
    router
        .param(
            "id",
            ParamCallback::sync(move |_, _, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlSignal::error(Error::msg("no such id").with_status(StatusCode::NOT_FOUND))
            }),
        )
        .unwrap();
    router.get("/a/:id", send("unreachable")).unwrap();
    router.get("/:x/:id", send("unreachable")).unwrap();

    let (called, err, _) = handle(&router, Method::GET, "/a/1").await;
    assert!(called);
    let err = err.unwrap();
    assert_eq!(err.message(), "no such id");
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_param_skip_moves_to_next_layer() {
    let mut router = Router::new();
    router
        .param(
            "id",
            ParamCallback::sync(|_, _, value, _| {
                if value.chars().all(|c| c.is_ascii_digit()) {
                    ControlSignal::Continue
                } else {
                    ControlSignal::SkipRoute
                }
            }),
        )
        .unwrap();
    router.get("/item/:id", send("numeric")).unwrap();
    router.get("/item/:slug", send("slug")).unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "/item/42").await;
    assert_eq!(res.text(), "numeric");
    let (_, _, res) = dispatch(&router, Method::GET, "/item/widget").await;
    assert_eq!(res.text(), "slug");
}

#[tokio::test]
async fn test_deep_stack_does_not_overflow() {
    let mut router = Router::new();
    for i in 0..6000 {
        router.get(format!("/path{i}"), send("never")).unwrap();
    }
    router.middleware(send("reached")).unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.text(), "reached");
}

#[tokio::test]
async fn test_deep_middleware_chain_does_not_overflow() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut router = Router::new();
    for _ in 0..6000 {
        let counter = counter.clone();
        router
            .middleware(Handler::sync(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlSignal::Continue
            }))
            .unwrap();
    }

    let (called, err, _) = handle(&router, Method::GET, "/").await;
    assert!(called);
    assert!(err.is_none());
    assert_eq!(counter.load(Ordering::SeqCst), 6000);
}

#[tokio::test]
async fn test_panic_reaches_done() {
    let mut router = Router::new();
    router.get("/boom", Handler::sync(|_, _| panic!("boom"))).unwrap();

    let (called, err, res) = handle(&router, Method::GET, "/boom").await;
    assert!(called);
    assert_eq!(err.unwrap().message(), "boom");
    assert!(!res.is_finished());
}

#[tokio::test]
async fn test_async_error_reaches_done() {
    let mut router = Router::new();
    router
        .middleware(Handler::new(|_, _| {
            Box::pin(async {
                tokio::task::yield_now().await;
                ControlSignal::error(Error::msg("boom"))
            })
        }))
        .unwrap();

    let (called, err, _) = handle(&router, Method::GET, "/anything").await;
    assert!(called);
    assert_eq!(err.unwrap().message(), "boom");
}

#[tokio::test]
async fn test_fully_qualified_url_keeps_host() {
    let mut router = Router::new();
    router
        .middleware_at(
            "/blog",
            Handler::sync(|req, res| {
                res.send(req.url.clone());
                ControlSignal::Halt
            }),
        )
        .unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "http://example.com/blog/post/1").await;
    assert_eq!(res.text(), "http://example.com/post/1");
}

#[tokio::test]
async fn test_fully_qualified_url_restored_after_mount() {
    let mut router = Router::new();
    router.middleware_at("/blog", record(&log(), "noop")).unwrap();
    router
        .middleware(Handler::sync(|req, res| {
            res.send(format!("{}|{}", req.url, req.base_url));
            ControlSignal::Halt
        }))
        .unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "http://example.com/blog/post/1").await;
    assert_eq!(res.text(), "http://example.com/blog/post/1|");
}

#[tokio::test]
async fn test_prefix_restored_for_siblings() {
    let seen = log();
    let first = seen.clone();
    let second = seen.clone();

    let mut router = Router::new();
    router
        .middleware_at(
            "/foo",
            Handler::sync(move |req, _| {
                first.lock().unwrap().push(format!("{} {}", req.url, req.base_url));
                ControlSignal::Continue
            }),
        )
        .unwrap();
    router
        .middleware(Handler::sync(move |req, _| {
            second.lock().unwrap().push(format!("{} {}", req.url, req.base_url));
            ControlSignal::Continue
        }))
        .unwrap();

    let (_, req, _) = dispatch(&router, Method::GET, "/foo/bar?x=1").await;
    assert_eq!(entries(&seen), vec!["/bar?x=1 /foo", "/foo/bar?x=1 "]);
    assert_eq!(req.url, "/foo/bar?x=1");
    assert_eq!(req.original_url.as_deref(), Some("/foo/bar?x=1"));
}

#[tokio::test]
async fn test_synthesized_slash_removed() {
    let seen = log();
    let inner = seen.clone();

    let mut router = Router::new();
    router
        .middleware_at(
            "/foo",
            Handler::sync(move |req, _| {
                inner.lock().unwrap().push(req.url.clone());
                ControlSignal::Continue
            }),
        )
        .unwrap();

    let (_, req, _) = dispatch(&router, Method::GET, "/foo?q=1").await;
    assert_eq!(entries(&seen), vec!["/?q=1"]);
    assert_eq!(req.url, "/foo?q=1");
}

#[tokio::test]
async fn test_prefix_must_end_on_segment() {
    let seen = log();
    let mut router = Router::new();
    router.middleware_at("/foo", record(&seen, "foo")).unwrap();

    dispatch(&router, Method::GET, "/foobar").await;
    dispatch(&router, Method::GET, "/foo.json").await;
    assert!(entries(&seen).is_empty());

    dispatch(&router, Method::GET, "/foo/bar").await;
    assert_eq!(entries(&seen), vec!["foo"]);
}

#[tokio::test]
async fn test_route_skip_resumes_search() {
    let seen = log();
    let mut router = Router::new();
    router
        .get(
            "/x",
            vec![
                Handler::sync(|_, _| ControlSignal::SkipRoute),
                record(&seen, "unreachable"),
            ],
        )
        .unwrap();
    router.get("/x", send("second")).unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "/x").await;
    assert_eq!(res.text(), "second");
    assert!(entries(&seen).is_empty());
}

#[tokio::test]
async fn test_method_mismatch_only_contributes_to_options() {
    let seen = log();
    let mut router = Router::new();
    router.get("/x", record(&seen, "get")).unwrap();
    router.delete("/x", record(&seen, "delete")).unwrap();

    let (outcome, _, res) = dispatch(&router, Method::OPTIONS, "/x").await;
    assert!(entries(&seen).is_empty());
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.header("allow"), Some("GET,HEAD,DELETE"));

    let (outcome, _, _) = dispatch(&router, Method::POST, "/x").await;
    assert!(matches!(outcome, Outcome::Exhausted(None)));
    assert!(entries(&seen).is_empty());
}

#[tokio::test]
async fn test_options_without_routes_is_not_handled() {
    let router = Router::new();
    let (outcome, _, _) = dispatch(&router, Method::OPTIONS, "/x").await;
    assert!(matches!(outcome, Outcome::Exhausted(None)));
}

#[tokio::test]
async fn test_error_skips_routes_and_normal_middleware() {
    let seen = log();
    let mut router = Router::new();
    router
        .middleware(Handler::sync(|_, _| ControlSignal::error(Error::msg("bad"))))
        .unwrap();
    router.get("/x", record(&seen, "route")).unwrap();
    router.middleware(record(&seen, "normal")).unwrap();
    router.mount("/", Arc::new(Router::new())).unwrap();
    router
        .middleware(Handler::error_sync(|err, _, res| {
            res.status(StatusCode::BAD_GATEWAY).send(format!("handled {}", err));
            ControlSignal::Halt
        }))
        .unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/x").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert!(entries(&seen).is_empty());
    assert_eq!(res.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(res.text(), "handled bad");
}

#[tokio::test]
async fn test_error_handler_can_clear_error() {
    let mut router = Router::new();
    router
        .middleware(Handler::sync(|_, _| ControlSignal::error(Error::msg("bad"))))
        .unwrap();
    router
        .middleware(Handler::error_sync(|_, _, _| ControlSignal::Continue))
        .unwrap();
    router.get("/x", send("recovered")).unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "/x").await;
    assert_eq!(res.text(), "recovered");
}

#[tokio::test]
async fn test_nested_routers_rewrite_and_restore() {
    let mut inner = Router::new();
    inner
        .get(
            "/item/:id",
            Handler::sync(|req, res| {
                res.send(format!(
                    "{} {} {}",
                    req.url,
                    req.base_url,
                    req.params.get_str("id").unwrap_or("-")
                ));
                ControlSignal::Halt
            }),
        )
        .unwrap();
    let mut middle = Router::new();
    middle.mount("/v1", Arc::new(inner)).unwrap();
    let mut outer = Router::new();
    outer.mount("/api", Arc::new(middle)).unwrap();

    let (_, _, res) = dispatch(&outer, Method::GET, "/api/v1/item/9?full=1").await;
    assert_eq!(res.text(), "/item/9?full=1 /api/v1 9");

    let (outcome, req, _) = dispatch(&outer, Method::GET, "/api/v1/missing").await;
    assert!(matches!(outcome, Outcome::Exhausted(None)));
    assert_eq!(req.url, "/api/v1/missing");
    assert_eq!(req.base_url, "");
}

#[tokio::test]
async fn test_merge_params_sees_parent_captures() {
    let handler = Handler::sync(|req, res| {
        res.send(format!(
            "{} {}",
            req.params.get_str("user").unwrap_or("-"),
            req.params.get_str("post").unwrap_or("-")
        ));
        ControlSignal::Halt
    });

    let mut merging = Router::with_config(RouterConfig { merge_params: true, ..RouterConfig::default() });
    merging.get("/posts/:post", handler.clone()).unwrap();
    let mut isolated = Router::new();
    isolated.get("/posts/:post", handler).unwrap();

    let mut router = Router::new();
    router.mount("/merged/:user", Arc::new(merging)).unwrap();
    router.mount("/plain/:user", Arc::new(isolated)).unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "/merged/ann/posts/7").await;
    assert_eq!(res.text(), "ann 7");
    let (_, _, res) = dispatch(&router, Method::GET, "/plain/ann/posts/7").await;
    assert_eq!(res.text(), "- 7");
}

#[tokio::test]
async fn test_regex_and_list_paths() {
    let mut router = Router::new();
    router
        .get(
            regex::Regex::new(r"^/files/(\d+)$").unwrap(),
            Handler::sync(|req, res| {
                res.send(req.params.get_str(0usize).unwrap_or("-").to_string());
                ControlSignal::Halt
            }),
        )
        .unwrap();
    router.get(["/a", "/b"], send("list")).unwrap();

    let (_, _, res) = dispatch(&router, Method::GET, "/files/12").await;
    assert_eq!(res.text(), "12");
    let (_, _, res) = dispatch(&router, Method::GET, "/b").await;
    assert_eq!(res.text(), "list");
}

#[tokio::test]
async fn test_concurrent_dispatch_shares_router() {
    let mut router = Router::new();
    router
        .get(
            "/echo/:n",
            Handler::new(|req, res| {
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    let n = req.params.get_str("n").unwrap_or("-").to_string();
                    res.send(n);
                    ControlSignal::Halt
                })
            }),
        )
        .unwrap();
    let router = Arc::new(router);

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let router = router.clone();
            tokio::spawn(async move {
                let mut req = Request::new(Method::GET, format!("/echo/{i}"));
                let mut res = Response::new();
                router.dispatch(&mut req, &mut res).await;
                (i, res.text())
            })
        })
        .collect();

    for task in tasks {
        let (i, body) = task.await.unwrap();
        assert_eq!(body, i.to_string());
    }
}

#[tokio::test]
async fn test_async_param_callback_runs_once_and_keeps_value() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let seen = log();
    let sink = seen.clone();

    let mut router = Router::new();
    router
        .param(
            "id",
            ParamCallback::new(move |req, _, value, name| {
                let counter = counter.clone();
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    match value.parse::<u64>() {
                        Ok(id) => {
                            req.params.set(name, id);
                            ControlSignal::Continue
                        }
                        Err(err) => ControlSignal::error(err),
                    }
                })
            }),
        )
        .unwrap();
    router
        .middleware_at(
            "/user/:id",
            Handler::sync(move |req, _| {
                let id = req.params.get("id").cloned().unwrap_or_default();
                sink.lock().unwrap().push(format!("middleware {}", id));
                ControlSignal::Continue
            }),
        )
        .unwrap();
    router
        .get(
            "/user/:id",
            Handler::sync(|req, res| {
                assert_eq!(req.params.get("id"), Some(&json!(7)));
                res.send("route");
                ControlSignal::Halt
            }),
        )
        .unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/user/7").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.text(), "route");
    assert_eq!(entries(&seen), vec!["middleware 7"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_param_callback_skips_route() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut router = Router::new();
    router
        .param(
            "id",
            ParamCallback::new(move |_, _, _, _| {
                let counter = counter.clone();
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    ControlSignal::SkipRoute
                })
            }),
        )
        .unwrap();
    router.get("/item/:id", send("first")).unwrap();
    router.get("/item/:id", send("second")).unwrap();
    router.middleware(send("fallback")).unwrap();

    let (outcome, _, res) = dispatch(&router, Method::GET, "/item/3").await;
    assert!(matches!(outcome, Outcome::Handled));
    assert_eq!(res.text(), "fallback");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_error_handler_clears_error() {
    let seen = log();
    let sink = seen.clone();

    let mut router = Router::new();
    router
        .middleware(Handler::sync(|_, _| ControlSignal::error(Error::msg("boom"))))
        .unwrap();
    router.get("/x", send("unreached")).unwrap();
    router
        .middleware(Handler::error(move |err, _, _| {
            let sink = sink.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                sink.lock().unwrap().push(err.message().to_string());
                ControlSignal::Continue
            })
        }))
        .unwrap();
    router.middleware(send("recovered")).unwrap();

    let (called, err, res) = handle(&router, Method::GET, "/x").await;
    assert!(!called);
    assert!(err.is_none());
    assert_eq!(res.text(), "recovered");
    assert_eq!(entries(&seen), vec!["boom"]);
}
