//! Response values and the [`Reply`] conversion trait.
//!
//! Handlers can write to the context directly (`ctx.write`, `ctx.flush`) or
//! return a value. A returned value is applied to the context's sink after
//! the handler finishes, on top of anything middleware already set.

use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use tracing::warn;

use crate::context::Context;
use crate::error::Fault;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Csv,
    /// Server-sent events.
    EventStream,
    FormData,
    Html,
    Json,
    MsgPack,
    /// Binary or file download.
    OctetStream,
    Pdf,
    Text,
    Xml,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData => "application/x-www-form-urlencoded",
            Self::Html => "text/html; charset=utf-8",
            Self::Json => "application/json",
            Self::MsgPack => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf => "application/pdf",
            Self::Text => "text/plain; charset=utf-8",
            Self::Xml => "application/xml",
        }
    }

    fn header_value(self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// A complete response value.
///
/// # Shortcuts
///
/// ```rust
/// use http::StatusCode;
/// use strata::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder
///
/// ```rust
/// use http::StatusCode;
/// use strata::{ContentType, Response};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder().bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Vec<u8>,
}

impl Response {
    /// `200 OK`, `application/json`. Pass the serialiser's bytes as they are.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// A response with no body.
    pub fn status(status: StatusCode) -> Self {
        Self::builder().status(status).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: StatusCode::OK, headers: Vec::new() }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter().map(|(name, value)| (name, value))
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Writes status, headers and body into `ctx`.
    ///
    /// `content-type` replaces whatever was set before; other headers are
    /// appended so repeated names (`set-cookie`) survive.
    pub(crate) fn apply(self, ctx: &mut Context) {
        ctx.set_status(self.status);
        for (name, value) in self.headers {
            if name == CONTENT_TYPE {
                ctx.set_header(name, value);
            } else {
                ctx.append_header(name, value);
            }
        }
        if !self.body.is_empty() {
            ctx.write(&self.body);
        }
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`], from [`Response::builder`].
///
/// Defaults to `200 OK` and ends with a typed body method.
#[derive(Debug)]
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header. An invalid name or value is dropped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            _ => warn!(header = name, "invalid response header dropped"),
        }
        self
    }

    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(ContentType::Json, body)
    }

    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, body.into().into_bytes())
    }

    /// Ends with a typed body: XML, HTML, binary, SSE and so on.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.finish(content_type, body)
    }

    /// Ends without a body (`204`, redirects).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Vec::new() }
    }

    fn finish(self, content_type: ContentType, body: Vec<u8>) -> Response {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        headers.push((CONTENT_TYPE, content_type.header_value()));
        headers.extend(self.headers);
        Response { status: self.status, headers, body }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What a handler may return.
///
/// The reply is applied to the request's context once the handler's future
/// completes. `Err` becomes a fault and goes to the recovery point.
///
/// # Example: a typed JSON wrapper
///
/// ```rust,ignore
/// use serde::Serialize;
/// use strata::{Context, Fault, Reply, Response};
///
/// struct Json<T>(T);
///
/// impl<T: Serialize> Reply for Json<T> {
///     fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
///         Response::json(serde_json::to_vec(&self.0)?).reply(ctx)
///     }
/// }
/// ```
pub trait Reply {
    fn reply(self, ctx: &mut Context) -> Result<(), Fault>;
}

/// Nothing to add: the handler wrote through the context itself.
impl Reply for () {
    fn reply(self, _ctx: &mut Context) -> Result<(), Fault> {
        Ok(())
    }
}

impl Reply for Response {
    fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
        ctx.respond(self);
        Ok(())
    }
}

impl Reply for &'static str {
    fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
        Response::text(self).reply(ctx)
    }
}

impl Reply for String {
    fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
        Response::text(self).reply(ctx)
    }
}

/// Return a status directly: `StatusCode::NOT_FOUND`.
impl Reply for StatusCode {
    fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
        ctx.set_status(self);
        Ok(())
    }
}

impl<T, E> Reply for Result<T, E>
where
    T: Reply,
    E: Into<Fault>,
{
    fn reply(self, ctx: &mut Context) -> Result<(), Fault> {
        match self {
            Ok(reply) => reply.reply(ctx),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body;

    fn context() -> Context {
        Context::new(http::Request::new(body::empty()))
    }

    #[test]
    fn builder_puts_content_type_first_and_drops_invalid_headers() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/42")
            .header("bad header", "x")
            .json(b"{}".to_vec());

        assert_eq!(response.status_code(), StatusCode::CREATED);
        let names: Vec<_> = response.headers().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["content-type", "location"]);
    }

    #[test]
    fn applying_keeps_headers_set_by_middleware() {
        let mut ctx = context();
        ctx.set_header("x-request-id", "abc");
        ctx.set_header("content-type", "application/octet-stream");

        Response::builder()
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .text("hi")
            .reply(&mut ctx)
            .unwrap();

        let headers = ctx.response().headers();
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers["content-type"], "text/plain; charset=utf-8");
        assert_eq!(headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(ctx.response().buffered(), b"hi");
    }

    #[test]
    fn errors_become_faults() {
        let mut ctx = context();
        let result: Result<&'static str, std::io::Error> = Err(std::io::Error::other("nope"));
        let fault = result.reply(&mut ctx).unwrap_err();
        assert_eq!(fault.to_string(), "nope");
        assert!(ctx.response().buffered().is_empty());
    }

    #[test]
    fn status_codes_reply_without_a_body() {
        let mut ctx = context();
        StatusCode::NO_CONTENT.reply(&mut ctx).unwrap();
        assert_eq!(ctx.status(), StatusCode::NO_CONTENT);
        assert!(ctx.response().buffered().is_empty());
    }
}
