//! Route parameters and the param-callback pipeline.
//!
//! # Responsibilities
//! - Hold the captured params of the matched layer (`Params`)
//! - Merge a child's captures over its parent's when requested
//! - Run registered param callbacks before a layer executes, at most once per
//!   distinct value within one dispatch
//!
//! # Data Flow
//! ```text
//! layer matched
//!     → req.params = captures (merged with parent params if configured)
//!     → process_params (callbacks per key, memoized in ParamMemo)
//!     → Continue: run layer | SkipRoute/Error: next layer | Halt: stop
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::http::{Request, Response};
use crate::routing::handler::{guarded, BoxFuture, ControlSignal};

/// Key of a captured param: a placeholder name or a positional index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Named(String),
    Index(usize),
}

impl From<&str> for ParamKey {
    fn from(s: &str) -> Self {
        match s.parse::<usize>() {
            Ok(i) if !s.starts_with('+') => ParamKey::Index(i),
            _ => ParamKey::Named(s.to_string()),
        }
    }
}

impl From<String> for ParamKey {
    fn from(s: String) -> Self {
        ParamKey::from(s.as_str())
    }
}

impl From<usize> for ParamKey {
    fn from(i: usize) -> Self {
        ParamKey::Index(i)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Named(name) => f.write_str(name),
            ParamKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Ordered bag of request params.
///
/// Captured values are strings; param callbacks may replace them with any
/// JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(ParamKey, Value)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: impl Into<ParamKey>) -> Option<&Value> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Value as a string slice, if it is a string.
    pub fn get_str(&self, key: impl Into<ParamKey>) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Positional value.
    pub fn index(&self, i: usize) -> Option<&Value> {
        self.get(ParamKey::Index(i))
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn set(&mut self, key: impl Into<ParamKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: impl Into<ParamKey>) -> Option<Value> {
        let key = key.into();
        let pos = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, key: impl Into<ParamKey>) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Render as a JSON object keyed by the display form of each key.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    /// Length of the contiguous positional run starting at index 0.
    fn positional_run(&self) -> usize {
        let mut n = 0;
        while self.contains(ParamKey::Index(n)) {
            n += 1;
        }
        n
    }
}

impl FromIterator<(ParamKey, String)> for Params {
    fn from_iter<I: IntoIterator<Item = (ParamKey, String)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.set(key, value);
        }
        params
    }
}

/// Overlay `child` on a copy of `parent`.
///
/// When both bags start a positional run at index 0, the child's run is
/// renumbered to follow the parent's so neither is lost.
pub fn merge_params(child: Params, parent: &Params) -> Params {
    if parent.is_empty() {
        return child;
    }
    let mut merged = parent.clone();

    let shift = if child.contains(ParamKey::Index(0)) && parent.contains(ParamKey::Index(0)) {
        Some((child.positional_run(), parent.positional_run()))
    } else {
        None
    };

    for (key, value) in child.entries {
        let key = match (shift, key) {
            (Some((run, offset)), ParamKey::Index(i)) if i < run => ParamKey::Index(i + offset),
            (_, key) => key,
        };
        merged.set(key, value);
    }
    merged
}

type ParamFn = dyn for<'a> Fn(&'a mut Request, &'a mut Response, &'a str, &'a str) -> BoxFuture<'a, ControlSignal>
    + Send
    + Sync;

/// Callback run before a layer whose pattern captured the named param.
///
/// Receives the raw captured value and the param name.
#[derive(Clone)]
pub struct ParamCallback(Arc<ParamFn>);

impl ParamCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Request, &'a mut Response, &'a str, &'a str) -> BoxFuture<'a, ControlSignal>
            + Send
            + Sync
            + 'static,
    {
        Self(Arc::new(f))
    }

    /// Callback that completes without suspending.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut Request, &mut Response, &str, &str) -> ControlSignal + Send + Sync + 'static,
    {
        Self::new(move |req, res, value, name| {
            Box::pin(futures_util::future::ready(f(req, res, value, name)))
        })
    }

    pub(crate) async fn call(
        &self,
        req: &mut Request,
        res: &mut Response,
        value: &str,
        name: &str,
    ) -> ControlSignal {
        guarded(|| {
            let (req, res) = (req, res);
            (self.0)(req, res, value, name)
        })
        .await
    }
}

impl fmt::Debug for ParamCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ParamCallback")
    }
}

#[derive(Debug, Clone)]
enum Verdict {
    Skip,
    Failed(crate::http::Error),
}

impl Verdict {
    fn signal(&self) -> ControlSignal {
        match self {
            Verdict::Skip => ControlSignal::SkipRoute,
            Verdict::Failed(err) => ControlSignal::Error(err.clone()),
        }
    }
}

#[derive(Debug)]
struct Called {
    /// Value the callbacks were invoked for.
    matched: Value,
    /// Value left in the bag after the last callback ran.
    value: Value,
    verdict: Option<Verdict>,
}

/// Per-dispatch record of which param values already ran their callbacks.
#[derive(Debug, Default)]
pub struct ParamMemo {
    called: HashMap<String, Called>,
}

impl ParamMemo {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Run the callbacks registered for `keys` against the current `req.params`.
pub(crate) async fn process_params(
    registry: &HashMap<String, Vec<ParamCallback>>,
    keys: &[ParamKey],
    memo: &mut ParamMemo,
    req: &mut Request,
    res: &mut Response,
) -> ControlSignal {
    if registry.is_empty() {
        return ControlSignal::Continue;
    }

    for key in keys {
        let name = key.to_string();
        let Some(current) = req.params.get(key.clone()).cloned() else {
            continue;
        };
        let Some(callbacks) = registry.get(&name).filter(|cbs| !cbs.is_empty()) else {
            continue;
        };

        if let Some(called) = memo.called.get(&name) {
            let replay = called.matched == current
                || matches!(called.verdict, Some(Verdict::Failed(_)));
            if replay {
                req.params.set(key.clone(), called.value.clone());
                match &called.verdict {
                    None => continue,
                    Some(verdict) => return verdict.signal(),
                }
            }
        }

        memo.called.insert(
            name.clone(),
            Called { matched: current.clone(), value: current.clone(), verdict: None },
        );

        let raw = match &current {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        for callback in callbacks {
            tracing::trace!(param = %name, value = %raw, "Running param callback");
            let signal = callback.call(req, res, &raw, &name).await;

            let stored = req.params.get(key.clone()).cloned().unwrap_or(Value::Null);
            let Some(called) = memo.called.get_mut(&name) else {
                break;
            };
            called.value = stored;

            match signal {
                ControlSignal::Continue => {}
                ControlSignal::SkipRoute => {
                    called.verdict = Some(Verdict::Skip);
                    return ControlSignal::SkipRoute;
                }
                ControlSignal::Error(err) => {
                    called.verdict = Some(Verdict::Failed(err.clone()));
                    return ControlSignal::Error(err);
                }
                ControlSignal::Halt => return ControlSignal::Halt,
            }
        }
    }

    ControlSignal::Continue
}
