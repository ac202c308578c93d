use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderValue};
use tracing::error;

use super::Middleware;
use crate::context::Context;
use crate::error::{Fault, FaultKind};
use crate::pipeline::Outcome;

/// The default recovery point.
///
/// Catches faults and panics from everything further in and renders them
/// with [`render`]. The router installs it as the outermost entry of every
/// pipeline; replace it with [`Router::recover`](crate::Router::recover).
pub fn recover() -> Middleware {
    Middleware::step(|ctx| {
        Box::pin(async move {
            let outcome = match AssertUnwindSafe(ctx.next()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Outcome::Faulted(Fault::panic(payload)),
            };
            match outcome {
                Outcome::Faulted(fault) => {
                    render(ctx, &fault);
                    Outcome::Continued
                }
                other => other,
            }
        })
    })
}

/// Turns `fault` into a response, or only logs it once the head is out.
///
/// Uncommitted: whatever was built is discarded and replaced by a plain
/// `500` (`503` for cancellation). Committed: the client already has a
/// status line, so nothing is written.
pub(crate) fn render(ctx: &mut Context, fault: &Fault) {
    let committed = ctx.is_committed();
    error!(
        method = %ctx.method(),
        path = ctx.path(),
        route = ctx.route(),
        kind = ?fault.kind(),
        committed,
        "request failed: {fault}"
    );

    let sink = ctx.response_mut();
    if !sink.discard() {
        return;
    }
    let status = match fault.kind() {
        FaultKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    // Cannot fail: the sink was just reset, so it is uncommitted.
    let _ = sink.set_status(status);
    let _ = sink.set_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    sink.write(status.canonical_reason().unwrap_or("error").as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body;
    use crate::handler::endpoint;
    use crate::pipeline::{Pipeline, Strategy};
    use crate::response::Response;

    fn explode() -> Response {
        panic!("handler exploded")
    }

    fn context() -> Context {
        Context::new(http::Request::new(body::empty()))
    }

    #[test]
    fn uncommitted_responses_are_replaced() {
        let mut ctx = context();
        ctx.set_status(StatusCode::CREATED);
        ctx.set_header("x-partial", "yes");
        ctx.write("half a page");

        render(&mut ctx, &Fault::new("boom"));

        assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.response().headers().get("x-partial").is_none());
        assert_eq!(ctx.response().buffered(), b"Internal Server Error");
    }

    #[test]
    fn cancellation_renders_as_unavailable() {
        let mut ctx = context();
        render(&mut ctx, &Fault::cancelled());
        assert_eq!(ctx.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn committed_responses_keep_their_status() {
        let mut ctx = context();
        ctx.set_status(StatusCode::ACCEPTED);
        ctx.write("streamed");
        ctx.flush().await.unwrap();

        render(&mut ctx, &Fault::new("late failure"));

        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
        assert_eq!(ctx.response().buffered(), b"streamed");
    }

    #[tokio::test]
    async fn panics_are_caught_under_both_strategies() {
        for strategy in [Strategy::Wrapping, Strategy::Cursor] {
            let exploding = endpoint(|_ctx| Box::pin(async { explode() }));
            let pipeline = Pipeline::compose(strategy, &[recover()], &exploding);

            let mut ctx = context();
            let outcome = pipeline.run(&mut ctx).await;

            assert!(outcome.is_continued(), "{strategy:?}");
            assert_eq!(ctx.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
