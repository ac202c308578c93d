use std::fmt;

use uuid::Uuid;

use super::Middleware;

const HEADER: &str = "x-request-id";

/// The request's correlation id, stored in the context's extensions by
/// [`request_id()`].
///
/// ```rust
/// # use strata::{BoxFuture, Context, Response};
/// use strata::middleware::RequestId;
///
/// fn whoami(ctx: &mut Context) -> BoxFuture<'_, Response> {
///     Box::pin(async move {
///         let id = ctx.extensions().get::<RequestId>().map(RequestId::as_str).unwrap_or("-");
///         Response::text(format!("request {id}"))
///     })
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reuses the incoming `x-request-id`, or generates a UUID v4, and echoes it
/// on the response.
pub fn request_id() -> Middleware {
    Middleware::step(|ctx| {
        Box::pin(async move {
            let id = ctx
                .header(HEADER)
                .filter(|id| !id.is_empty())
                .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);
            ctx.set_header(HEADER, id.as_str());
            ctx.extensions_mut().insert(RequestId(id));
            ctx.next().await
        })
    })
}
