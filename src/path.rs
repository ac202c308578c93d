//! Path patterns and parameter extraction.
//!
//! A pattern is an ordered list of [`Segment`]s parsed once at registration.
//! At request time the route tree hands back the raw path segments and
//! [`Pattern::extract`] binds them to the pattern's parameter slots,
//! percent-decoding each one.
//!
//! ```text
//! /users/:id          one literal, one named parameter
//! /users/{id}         same pattern, brace spelling
//! /files/*path        catch-all, must be last, may match nothing
//! /files/{*path}      same pattern, brace spelling
//! ```

use std::borrow::Cow;
use std::fmt;

use crate::error::{DecodeError, RouteError};

/// One segment of a parsed pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// A parsed, validated route pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses and validates a pattern.
    ///
    /// Rejected: patterns not starting with `/`, a catch-all followed by
    /// anything, a parameter name used twice, empty or non-word parameter
    /// names, and segments that mix braces with literal text.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern { pattern: raw.to_owned(), reason };

        if !raw.starts_with('/') {
            return Err(invalid("pattern must start with `/`"));
        }

        let mut segments = Vec::new();
        for part in split(raw) {
            if matches!(segments.last(), Some(Segment::CatchAll(_))) {
                return Err(invalid("catch-all must be the final segment"));
            }

            let segment = if let Some(inner) = part.strip_prefix('{') {
                let inner = inner.strip_suffix('}').ok_or_else(|| invalid("unclosed `{`"))?;
                match inner.strip_prefix('*') {
                    Some(name) => Segment::CatchAll(name.to_owned()),
                    None => Segment::Param(inner.to_owned()),
                }
            } else if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_owned())
            } else if let Some(name) = part.strip_prefix('*') {
                Segment::CatchAll(name.to_owned())
            } else if part.contains(['{', '}']) {
                return Err(invalid("braces must wrap a whole segment"));
            } else {
                Segment::Literal(part.to_owned())
            };

            if let Segment::Param(name) | Segment::CatchAll(name) = &segment {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid("parameter names must be non-empty `[A-Za-z0-9_]`"));
                }
                let duplicate = segments.iter().any(|s| {
                    matches!(s, Segment::Param(n) | Segment::CatchAll(n) if n == name)
                });
                if duplicate {
                    return Err(invalid("parameter name used twice"));
                }
            }

            segments.push(segment);
        }

        Ok(Self { raw: raw.to_owned(), segments })
    }

    /// Joins a scope prefix and a route pattern: `/api` + `/users` → `/api/users`.
    pub(crate) fn join(prefix: &str, pattern: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        match (prefix.is_empty(), pattern.starts_with('/')) {
            (true, _) => pattern.to_owned(),
            (false, true) => format!("{prefix}{pattern}"),
            (false, false) => format!("{prefix}/{pattern}"),
        }
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Canonical spelling, used to detect duplicate registrations:
    /// `/users/{id}` and `/users/:id` canonicalise identically.
    pub(crate) fn canonical(&self) -> String {
        self.to_string()
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(n) | Segment::CatchAll(n) => Some(n.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Binds `path` (already split by [`split`]) to this pattern's parameter
    /// slots, appending to `out` in declaration order.
    ///
    /// The caller guarantees `path` matched this pattern. A catch-all takes the
    /// remaining segments joined with `/`.
    pub fn extract(&self, path: &[&str], out: &mut Params) -> Result<(), DecodeError> {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    let raw = path.get(i).copied().unwrap_or_default();
                    out.push(name, decode(raw)?.into_owned());
                }
                Segment::CatchAll(name) => {
                    let mut value = String::new();
                    for (n, raw) in path.iter().skip(i).enumerate() {
                        if n > 0 {
                            value.push('/');
                        }
                        value.push_str(&decode(raw)?);
                    }
                    out.push(name, value);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => write!(f, "/{s}")?,
                Segment::Param(n) => write!(f, "/:{n}")?,
                Segment::CatchAll(n) => write!(f, "/*{n}")?,
            }
        }
        Ok(())
    }
}

/// Splits a path into its non-empty segments. `/a//b/` → `["a", "b"]`.
pub fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Percent-decodes one path segment.
///
/// Unlike a lenient decoder, a `%` that is not followed by two hex digits is
/// an error rather than passed through. `+` is left alone; it only means a
/// space in query strings.
pub fn decode(segment: &str) -> Result<Cow<'_, str>, DecodeError> {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while let Some(offset) = bytes[i..].iter().position(|&b| b == b'%') {
        let at = i + offset;
        let escape = bytes.get(at + 1..at + 3);
        if !escape.is_some_and(|e| e.iter().all(u8::is_ascii_hexdigit)) {
            return Err(DecodeError { segment: segment.to_owned() });
        }
        i = at + 3;
    }
    urlencoding::decode(segment).map_err(|_| DecodeError { segment: segment.to_owned() })
}

// ── Params ────────────────────────────────────────────────────────────────────

/// Bound path parameters, in the order they are declared in the pattern.
///
/// Backed by a `Vec` rather than a map: routes have a handful of parameters,
/// and pooled contexts keep the allocation between requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, name: &str, value: String) {
        self.entries.push((name.to_owned(), value));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(pattern: &str, path: &str) -> Result<Params, DecodeError> {
        let pattern = Pattern::parse(pattern).unwrap();
        let mut params = Params::new();
        pattern.extract(&split(path), &mut params)?;
        Ok(params)
    }

    #[test]
    fn both_spellings_parse_to_the_same_segments() {
        let colon = Pattern::parse("/users/:id/files/*rest").unwrap();
        let brace = Pattern::parse("/users/{id}/files/{*rest}").unwrap();
        assert_eq!(colon.segments(), brace.segments());
        assert_eq!(colon.canonical(), brace.canonical());
        assert_eq!(brace.canonical(), "/users/:id/files/*rest");
    }

    #[test]
    fn root_pattern_has_no_segments() {
        let root = Pattern::parse("/").unwrap();
        assert!(root.segments().is_empty());
        assert_eq!(root.canonical(), "/");
    }

    #[test]
    fn rejects_catch_all_with_trailing_segments() {
        let err = Pattern::parse("/files/*path/edit").unwrap_err();
        assert!(matches!(err, RouteError::InvalidPattern { reason, .. } if reason.contains("catch-all")));
    }

    #[test]
    fn rejects_reused_parameter_names() {
        assert!(Pattern::parse("/a/:id/b/:id").is_err());
        assert!(Pattern::parse("/a/:id/*id").is_err());
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(Pattern::parse("users").is_err());
        assert!(Pattern::parse("/users/:").is_err());
        assert!(Pattern::parse("/users/{id").is_err());
        assert!(Pattern::parse("/users/x{id}").is_err());
        assert!(Pattern::parse("/users/:i-d").is_err());
    }

    #[test]
    fn binds_params_in_declaration_order() {
        let params = bind("/orgs/:org/repos/:repo", "/orgs/rust-lang/repos/cargo").unwrap();
        let names: Vec<_> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["org", "repo"]);
        assert_eq!(params.get("repo"), Some("cargo"));
    }

    #[test]
    fn decodes_each_segment() {
        let params = bind("/users/:name", "/users/caf%C3%A9%20au%20lait").unwrap();
        assert_eq!(params.get("name"), Some("café au lait"));
    }

    #[test]
    fn catch_all_captures_the_remainder() {
        let params = bind("/files/*path", "/files/a/b/c").unwrap();
        assert_eq!(params.get("path"), Some("a/b/c"));

        let params = bind("/files/*path", "/files").unwrap();
        assert_eq!(params.get("path"), Some(""));
    }

    #[test]
    fn invalid_escapes_are_errors() {
        assert!(bind("/users/:id", "/users/%zz").is_err());
        assert!(bind("/users/:id", "/users/100%").is_err());
        assert!(bind("/files/*path", "/files/ok/%4").is_err());
        // %FF is a valid escape but not UTF-8.
        assert!(bind("/users/:id", "/users/%FF").is_err());
    }

    #[test]
    fn joins_prefixes() {
        assert_eq!(Pattern::join("", "/users"), "/users");
        assert_eq!(Pattern::join("/api", "/users"), "/api/users");
        assert_eq!(Pattern::join("/api/", "users"), "/api/users");
    }
}
