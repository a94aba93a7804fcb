//! Registration-time errors.

use thiserror::Error;

/// A path pattern that cannot be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unbalanced parenthesis in path pattern '{0}'")]
    UnbalancedGroup(String),

    #[error("missing parameter name after ':' in path pattern '{0}'")]
    EmptyParamName(String),

    #[error("invalid path pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A registration call that was rejected.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    #[error("{0} requires middleware functions")]
    MissingHandlers(&'static str),

    #[error("{method} requires a {expected} but got a {type_name}")]
    NotCallable {
        method: &'static str,
        expected: &'static str,
        type_name: &'static str,
    },

    #[error("param() requires a parameter name")]
    EmptyParamName,
}
