//! Application settings.
//!
//! # Responsibilities
//! - Hold the well-known settings as typed fields
//! - Accept free-form settings by name
//! - Copy unset settings from a parent app at mount time
//!
//! # Design Decisions
//! - Names follow the space-separated convention (`"trust proxy"`)
//! - Values are coerced by truthiness for boolean settings
//! - A setting counts as explicit once `set` touched it; only implicit
//!   settings are inherited

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENV: &str = "env";
pub const X_POWERED_BY: &str = "x-powered-by";
pub const QUERY_PARSER: &str = "query parser";
pub const TRUST_PROXY: &str = "trust proxy";
pub const CASE_SENSITIVE_ROUTING: &str = "case sensitive routing";
pub const STRICT_ROUTING: &str = "strict routing";

const WELL_KNOWN: [&str; 6] = [
    ENV,
    X_POWERED_BY,
    QUERY_PARSER,
    TRUST_PROXY,
    CASE_SENSITIVE_ROUTING,
    STRICT_ROUTING,
];

/// How the query string is turned into `Request::query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryParser {
    /// Parse `a=1&b=2` pairs.
    #[default]
    Simple,
    /// Always produce an empty query.
    Disabled,
}

impl QueryParser {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(false) | Value::Null => QueryParser::Disabled,
            Value::String(s) if s == "false" || s == "disabled" => QueryParser::Disabled,
            _ => QueryParser::Simple,
        }
    }

    fn as_value(&self) -> Value {
        match self {
            QueryParser::Simple => Value::from("simple"),
            QueryParser::Disabled => Value::Bool(false),
        }
    }
}

/// Settings of one application.
///
/// Every field present when deserializing counts as explicit.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "SettingsFile")]
pub struct Settings {
    /// Environment name (`development`, `production`, `test`).
    pub env: String,

    /// Send `X-Powered-By: Switchyard`.
    pub x_powered_by: bool,

    pub query_parser: QueryParser,

    /// Trust `X-Forwarded-*` headers.
    pub trust_proxy: bool,

    pub case_sensitive_routing: bool,

    pub strict_routing: bool,

    /// Settings without a dedicated field.
    pub custom: HashMap<String, Value>,

    #[serde(skip)]
    explicit: HashSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            x_powered_by: true,
            query_parser: QueryParser::Simple,
            trust_proxy: false,
            case_sensitive_routing: false,
            strict_routing: false,
            custom: HashMap::new(),
            explicit: HashSet::new(),
        }
    }
}

/// On-disk shape of `Settings`, where absence is distinguishable from a value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    env: Option<String>,
    x_powered_by: Option<bool>,
    query_parser: Option<QueryParser>,
    trust_proxy: Option<bool>,
    case_sensitive_routing: Option<bool>,
    strict_routing: Option<bool>,
    custom: HashMap<String, Value>,
}

impl From<SettingsFile> for Settings {
    fn from(file: SettingsFile) -> Self {
        let mut settings = Settings::default();
        if let Some(env) = file.env {
            settings.set(ENV, env);
        }
        if let Some(on) = file.x_powered_by {
            settings.set(X_POWERED_BY, on);
        }
        if let Some(parser) = file.query_parser {
            settings.set(QUERY_PARSER, parser.as_value());
        }
        if let Some(on) = file.trust_proxy {
            settings.set(TRUST_PROXY, on);
        }
        if let Some(on) = file.case_sensitive_routing {
            settings.set(CASE_SENSITIVE_ROUTING, on);
        }
        if let Some(on) = file.strict_routing {
            settings.set(STRICT_ROUTING, on);
        }
        for (name, value) in file.custom {
            settings.set(&name, value);
        }
        settings
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl Settings {
    /// Assign a setting.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        tracing::debug!(setting = %name, value = %value, "Setting updated");
        match name {
            ENV => {
                self.env = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            X_POWERED_BY => self.x_powered_by = truthy(&value),
            QUERY_PARSER => self.query_parser = QueryParser::from_value(&value),
            TRUST_PROXY => self.trust_proxy = truthy(&value),
            CASE_SENSITIVE_ROUTING => self.case_sensitive_routing = truthy(&value),
            STRICT_ROUTING => self.strict_routing = truthy(&value),
            _ => {
                self.custom.insert(name.to_string(), value);
            }
        }
        self.explicit.insert(name.to_string());
    }

    /// Read a setting.
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            ENV => Some(Value::from(self.env.clone())),
            X_POWERED_BY => Some(Value::Bool(self.x_powered_by)),
            QUERY_PARSER => Some(self.query_parser.as_value()),
            TRUST_PROXY => Some(Value::Bool(self.trust_proxy)),
            CASE_SENSITIVE_ROUTING => Some(Value::Bool(self.case_sensitive_routing)),
            STRICT_ROUTING => Some(Value::Bool(self.strict_routing)),
            _ => self.custom.get(name).cloned(),
        }
    }

    pub fn enable(&mut self, name: &str) {
        self.set(name, true);
    }

    pub fn disable(&mut self, name: &str) {
        self.set(name, false);
    }

    pub fn enabled(&self, name: &str) -> bool {
        self.get(name).as_ref().is_some_and(truthy)
    }

    pub fn disabled(&self, name: &str) -> bool {
        !self.enabled(name)
    }

    /// Whether `name` was assigned on this app rather than defaulted.
    pub fn is_explicit(&self, name: &str) -> bool {
        self.explicit.contains(name)
    }

    /// Copy every setting of `parent` that was not assigned on `self`.
    pub fn inherit(&mut self, parent: &Settings) {
        for name in WELL_KNOWN {
            if self.is_explicit(name) {
                continue;
            }
            match name {
                ENV => self.env = parent.env.clone(),
                X_POWERED_BY => self.x_powered_by = parent.x_powered_by,
                QUERY_PARSER => self.query_parser = parent.query_parser,
                TRUST_PROXY => self.trust_proxy = parent.trust_proxy,
                CASE_SENSITIVE_ROUTING => self.case_sensitive_routing = parent.case_sensitive_routing,
                STRICT_ROUTING => self.strict_routing = parent.strict_routing,
                _ => {}
            }
        }
        for (name, value) in &parent.custom {
            if !self.is_explicit(name) && !self.custom.contains_key(name) {
                self.custom.insert(name.clone(), value.clone());
            }
        }
    }
}
