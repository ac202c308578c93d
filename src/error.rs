//! Error types.
//!
//! Two families live here. Setup and infrastructure failures ([`Error`],
//! [`RouteError`]) are returned synchronously to whoever builds the router or
//! starts the server, and the application must not start when they occur.
//! Per-request failures are [`Fault`]s: they travel through the pipeline as
//! [`Outcome::Faulted`](crate::Outcome::Faulted) and end at the recovery
//! point, which turns them into a response.

use std::any::Any;
use std::fmt;

/// A type-erased error that can cross task boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by strata's fallible setup operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid listen address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Registration-time routing failures. Both are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The same method and pattern were registered twice.
    #[error("route conflict: {method} {pattern} is already registered")]
    Conflict { method: http::Method, pattern: String },

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
}

/// A path segment contained a malformed percent-escape or decoded to invalid
/// UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot percent-decode path segment `{segment}`")]
pub struct DecodeError {
    pub segment: String,
}

/// Status or headers were changed after the response head was sent.
///
/// The change is dropped; [`Context`](crate::Context) logs it once per
/// request and carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("response already committed, {what} change suppressed")]
pub struct WriteAfterCommit {
    pub what: &'static str,
}

// ── Fault ─────────────────────────────────────────────────────────────────────

/// Broad classification of a [`Fault`], used by the recovery point to pick a
/// status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// A handler or middleware reported failure.
    Handler,
    /// A handler or middleware panicked.
    Panic,
    /// The request was cancelled (client went away or the deadline passed).
    Cancelled,
    /// Reading the request body failed.
    Body,
}

/// A per-request failure signalled by a middleware or handler.
///
/// Any `std::error::Error` converts into a `Fault`, so `?` works inside
/// handlers. For that reason `Fault` itself does not implement
/// `std::error::Error`.
pub struct Fault {
    kind: FaultKind,
    inner: BoxError,
}

impl Fault {
    /// A handler failure from any error or message.
    ///
    /// ```rust
    /// use strata::Fault;
    /// let fault = Fault::new("upstream returned garbage");
    /// assert_eq!(fault.to_string(), "upstream returned garbage");
    /// ```
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self { kind: FaultKind::Handler, inner: err.into() }
    }

    pub fn cancelled() -> Self {
        Self { kind: FaultKind::Cancelled, inner: "request cancelled".into() }
    }

    pub(crate) fn body(err: BoxError) -> Self {
        Self { kind: FaultKind::Body, inner: err }
    }

    /// Builds a fault from a caught panic payload.
    pub(crate) fn panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { kind: FaultKind::Panic, inner: format!("panic: {message}").into() }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The underlying error.
    pub fn source(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("kind", &self.kind)
            .field("error", &self.inner)
            .finish()
    }
}

impl<E> From<E> for Fault
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let fault = Fault::panic(Box::new("boom"));
        assert_eq!(fault.kind(), FaultKind::Panic);
        assert_eq!(fault.to_string(), "panic: boom");

        let fault = Fault::panic(Box::new(String::from("owned boom")));
        assert_eq!(fault.to_string(), "panic: owned boom");

        let fault = Fault::panic(Box::new(42_u8));
        assert_eq!(fault.to_string(), "panic: non-string panic payload");
    }

    #[test]
    fn std_errors_convert_with_question_mark() {
        fn fails() -> Result<(), Fault> {
            Err(std::io::Error::other("disk gone"))?;
            Ok(())
        }
        let fault = fails().unwrap_err();
        assert_eq!(fault.kind(), FaultKind::Handler);
        assert_eq!(fault.to_string(), "disk gone");
    }

    #[test]
    fn route_errors_render_the_offending_pattern() {
        let err = RouteError::Conflict {
            method: http::Method::GET,
            pattern: "/users/:id".into(),
        };
        assert_eq!(err.to_string(), "route conflict: GET /users/:id is already registered");
    }
}
