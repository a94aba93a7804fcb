//! A compiled pattern bound to one callable.

use crate::http::Error;
use crate::routing::error::PatternError;
use crate::routing::handler::Handler;
use crate::routing::params::ParamKey;
use crate::routing::pattern::{MatchOptions, PathMatch, PathSpec, Pattern};

/// What a layer invokes when it matches.
#[derive(Debug, Clone)]
pub(crate) enum LayerKind {
    /// Middleware or a mounted dispatcher, matched as a prefix.
    Middleware(Handler),
    /// Index into the owning router's route table.
    Route(usize),
}

/// One entry of a router's stack.
#[derive(Debug, Clone)]
pub struct Layer {
    path: String,
    pattern: Pattern,
    options: MatchOptions,
    pub(crate) kind: LayerKind,
}

impl Layer {
    pub(crate) fn new(spec: &PathSpec, options: MatchOptions, kind: LayerKind) -> Result<Self, PatternError> {
        Ok(Self {
            path: spec.to_string(),
            pattern: Pattern::compile(spec, options)?,
            options,
            kind,
        })
    }

    /// Pattern source as registered.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    pub fn keys(&self) -> &[ParamKey] {
        self.pattern.keys()
    }

    pub fn is_route(&self) -> bool {
        matches!(self.kind, LayerKind::Route(_))
    }

    /// Match a pathname. Captures are returned, never stored on the layer.
    pub fn matches(&self, pathname: &str) -> Result<Option<PathMatch>, Error> {
        self.pattern.matches(pathname)
    }
}
