//! Path pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile string patterns (`/users/:id`, `/files/*`, `/ab?cd`) into regexes
//! - Accept user-supplied regexes and lists of alternatives
//! - Match a request pathname, returning the matched prefix and the
//!   percent-decoded captures in declaration order
//!
//! # Pattern Language
//! ```text
//! :name          one segment, lazily ([^/]+?)
//! .:name         one segment that also stops at '.' ([^/.]+?)
//! :name(\d+)     custom capture
//! :name?         optional, together with its leading '/' or '.'
//! *              anything (.*), positional key
//! (re)           positional capture; right after '/' it does not capture
//! ? +            quantifiers on the preceding literal or group
//! ```
//!
//! # Design Decisions
//! - Compiled once at registration; matching never mutates the pattern
//! - Prefix matching (`end = false`) stops at a '/' boundary or end of path
//! - `/` as a prefix pattern short-circuits to "matches everything"
//! - Decode failures are per-request errors carrying status 400

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use regex::{Regex, RegexBuilder};

use crate::http::error::Error;
use crate::routing::error::PatternError;
use crate::routing::params::ParamKey;

/// A path as given at registration.
#[derive(Debug, Clone)]
pub enum PathSpec {
    Literal(String),
    Regex(Regex),
    List(Vec<PathSpec>),
}

impl From<&str> for PathSpec {
    fn from(s: &str) -> Self {
        PathSpec::Literal(s.to_string())
    }
}

impl From<String> for PathSpec {
    fn from(s: String) -> Self {
        PathSpec::Literal(s)
    }
}

impl From<&String> for PathSpec {
    fn from(s: &String) -> Self {
        PathSpec::Literal(s.clone())
    }
}

impl From<Regex> for PathSpec {
    fn from(re: Regex) -> Self {
        PathSpec::Regex(re)
    }
}

impl<T: Into<PathSpec>> From<Vec<T>> for PathSpec {
    fn from(items: Vec<T>) -> Self {
        PathSpec::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<PathSpec>, const N: usize> From<[T; N]> for PathSpec {
    fn from(items: [T; N]) -> Self {
        PathSpec::List(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSpec::Literal(s) => f.write_str(s),
            PathSpec::Regex(re) => write!(f, "/{}/", re.as_str()),
            PathSpec::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// Flags controlling how a pattern matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub strict: bool,
    /// Require the pattern to consume the whole path.
    pub end: bool,
}

impl MatchOptions {
    /// Options for a route: whole-path match.
    pub fn route(case_sensitive: bool, strict: bool) -> Self {
        Self { case_sensitive, strict, end: true }
    }

    /// Options for middleware: prefix match, never strict.
    pub fn prefix(case_sensitive: bool) -> Self {
        Self { case_sensitive, strict: false, end: false }
    }
}

/// Result of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Matched portion of the path.
    pub path: String,
    /// Decoded captures in declaration order.
    pub params: Vec<(ParamKey, String)>,
}

/// A compiled path pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    kind: PatternKind,
    keys: Vec<ParamKey>,
}

#[derive(Debug, Clone)]
enum PatternKind {
    FastSlash,
    Alternatives(Vec<Matcher>),
}

#[derive(Debug, Clone)]
struct Matcher {
    regex: Regex,
    /// Capture group index and the key it fills.
    slots: Vec<(usize, ParamKey)>,
    /// Index of the group holding the matched prefix, for generated regexes.
    prefix_group: Option<usize>,
    strict: bool,
    end: bool,
}

impl Pattern {
    /// Compile `spec` with the given options.
    pub fn compile(spec: &PathSpec, options: MatchOptions) -> Result<Self, PatternError> {
        if let PathSpec::Literal(s) = spec {
            if s == "/" && !options.end {
                return Ok(Self { kind: PatternKind::FastSlash, keys: Vec::new() });
            }
        }

        let mut matchers = Vec::new();
        collect_matchers(spec, options, &mut matchers)?;
        let keys = matchers
            .iter()
            .flat_map(|m| m.slots.iter().map(|(_, key)| key.clone()))
            .collect();

        Ok(Self { kind: PatternKind::Alternatives(matchers), keys })
    }

    /// Keys this pattern may capture, in declaration order.
    pub fn keys(&self) -> &[ParamKey] {
        &self.keys
    }

    /// Whether this is the `/` prefix pattern that matches everything.
    pub fn is_fast_slash(&self) -> bool {
        matches!(self.kind, PatternKind::FastSlash)
    }

    /// Match `path`. A capture that fails to percent-decode is an error.
    pub fn matches(&self, path: &str) -> Result<Option<PathMatch>, Error> {
        match &self.kind {
            PatternKind::FastSlash => Ok(Some(PathMatch { path: String::new(), params: Vec::new() })),
            PatternKind::Alternatives(matchers) => {
                for matcher in matchers {
                    if let Some(found) = matcher.matches(path)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
        }
    }
}

impl Matcher {
    fn matches(&self, path: &str) -> Result<Option<PathMatch>, Error> {
        let Some(caps) = self.regex.captures(path) else {
            return Ok(None);
        };
        let Some(whole) = caps.get(0) else {
            return Ok(None);
        };
        if whole.start() != 0 {
            return Ok(None);
        }

        let matched = match self.prefix_group.and_then(|i| caps.get(i)) {
            Some(prefix) if !self.end => {
                let end = prefix.end();
                // A lone trailing slash belongs to the prefix.
                if !self.strict && &path[end..] == "/" {
                    path[..=end].to_string()
                } else {
                    prefix.as_str().to_string()
                }
            }
            _ => whole.as_str().to_string(),
        };

        let mut params = Vec::with_capacity(self.slots.len());
        for (group, key) in &self.slots {
            if let Some(value) = caps.get(*group) {
                params.push((key.clone(), decode_param(value.as_str())?));
            }
        }

        Ok(Some(PathMatch { path: matched, params }))
    }
}

fn collect_matchers(
    spec: &PathSpec,
    options: MatchOptions,
    out: &mut Vec<Matcher>,
) -> Result<(), PatternError> {
    match spec {
        PathSpec::Literal(source) => out.push(compile_literal(source, options)?),
        PathSpec::Regex(regex) => {
            let mut positional = 0;
            let slots = regex
                .capture_names()
                .enumerate()
                .skip(1)
                .map(|(group, name)| {
                    let key = match name {
                        Some(name) => ParamKey::Named(name.to_string()),
                        None => {
                            positional += 1;
                            ParamKey::Index(positional - 1)
                        }
                    };
                    (group, key)
                })
                .collect();
            out.push(Matcher {
                regex: regex.clone(),
                slots,
                prefix_group: None,
                strict: options.strict,
                end: true,
            });
        }
        PathSpec::List(items) => {
            for item in items {
                collect_matchers(item, options, out)?;
            }
        }
    }
    Ok(())
}

fn compile_literal(source: &str, options: MatchOptions) -> Result<Matcher, PatternError> {
    let body_source = if !options.strict && source.ends_with('/') {
        &source[..source.len() - 1]
    } else {
        source
    };
    let (body, keys) = translate(body_source, source)?;

    let anchored = if options.end {
        if options.strict {
            format!("^(?P<prefix>{})$", body)
        } else {
            format!("^(?P<prefix>{})/?$", body)
        }
    } else if options.strict {
        if source.ends_with('/') {
            format!("^(?P<prefix>{})", body)
        } else {
            format!("^(?P<prefix>{})(?:$|/)", body)
        }
    } else {
        format!("^(?P<prefix>{})(?:/?$|/)", body)
    };

    let regex = RegexBuilder::new(&anchored)
        .case_insensitive(!options.case_sensitive)
        .build()
        .map_err(|source_err| PatternError::InvalidRegex {
            pattern: source.to_string(),
            source: source_err,
        })?;

    let mut prefix_group = None;
    let mut slots = Vec::with_capacity(keys.len());
    for (group, name) in regex.capture_names().enumerate() {
        match name {
            Some("prefix") => prefix_group = Some(group),
            Some(name) => {
                if let Some(key) = name
                    .strip_prefix('k')
                    .and_then(|n| n.parse::<usize>().ok())
                    .and_then(|n| keys.get(n))
                {
                    slots.push((group, key.clone()));
                }
            }
            None => {}
        }
    }

    Ok(Matcher {
        regex,
        slots,
        prefix_group,
        strict: options.strict,
        end: options.end,
    })
}

fn is_word(c: Option<&char>) -> bool {
    matches!(c, Some(c) if c.is_ascii_alphanumeric() || *c == '_')
}

/// Translate a string pattern body into regex source plus its keys.
fn translate(body: &str, source: &str) -> Result<(String, Vec<ParamKey>), PatternError> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len() * 2);
    let mut keys = Vec::new();
    let mut positional = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        // Placeholder, with or without a leading '/' or '.'.
        let lead = match c {
            '/' | '.' if chars.get(i + 1) == Some(&':') && is_word(chars.get(i + 2)) => Some(c),
            ':' if is_word(chars.get(i + 1)) => None,
            ':' => return Err(PatternError::EmptyParamName(source.to_string())),
            _ => {
                i = translate_plain(&chars, i, source, &mut out, &mut keys, &mut positional)?;
                continue;
            }
        };

        i += if lead.is_some() { 2 } else { 1 };
        let name_start = i;
        while is_word(chars.get(i)) {
            i += 1;
        }
        let name: String = chars[name_start..i].iter().collect();

        let capture = if chars.get(i) == Some(&'(') {
            let (inner, next) = read_group(&chars, i, source)?;
            i = next;
            inner
        } else if lead == Some('.') {
            "[^/.]+?".to_string()
        } else {
            "[^/]+?".to_string()
        };

        let optional = chars.get(i) == Some(&'?');
        if optional {
            i += 1;
        }

        let lead = match lead {
            Some('/') => "/",
            Some(_) => r"\.",
            None => "",
        };
        let group = format!("(?P<k{}>{})", keys.len(), capture);
        if optional {
            out.push_str(&format!("(?:{}{})?", lead, group));
        } else {
            out.push_str(lead);
            out.push_str(&group);
        }
        keys.push(ParamKey::Named(name));
    }

    Ok((out, keys))
}

/// Translate one non-placeholder token starting at `i`, returning the next index.
fn translate_plain(
    chars: &[char],
    i: usize,
    source: &str,
    out: &mut String,
    keys: &mut Vec<ParamKey>,
    positional: &mut usize,
) -> Result<usize, PatternError> {
    match chars[i] {
        '*' => {
            out.push_str(&format!("(?P<k{}>.*)", keys.len()));
            keys.push(ParamKey::Index(*positional));
            *positional += 1;
            Ok(i + 1)
        }
        '(' => {
            let (inner, next) = read_group(chars, i, source)?;
            if inner.starts_with('?') {
                out.push_str(&format!("({})", inner));
            } else if i > 0 && chars[i - 1] == '/' {
                out.push_str(&format!("(?:{})", inner));
            } else {
                out.push_str(&format!("(?P<k{}>{})", keys.len(), inner));
                keys.push(ParamKey::Index(*positional));
                *positional += 1;
            }
            Ok(next)
        }
        ')' => Err(PatternError::UnbalancedGroup(source.to_string())),
        '?' | '+' => {
            out.push(chars[i]);
            Ok(i + 1)
        }
        c => {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            Ok(i + 1)
        }
    }
}

/// Read a balanced `( ... )` group at `open`, returning its inner text and
/// the index after the closing parenthesis.
fn read_group(chars: &[char], open: usize, source: &str) -> Result<(String, usize), PatternError> {
    let mut depth = 0usize;
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((chars[open + 1..i].iter().collect(), i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(PatternError::UnbalancedGroup(source.to_string()))
}

/// Percent-decode a captured value.
pub fn decode_param(raw: &str) -> Result<String, Error> {
    let failed = || {
        Error::msg(format!("Failed to decode param '{}'", raw)).with_status(StatusCode::BAD_REQUEST)
    };

    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(failed());
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .map_err(|_| failed())
}
