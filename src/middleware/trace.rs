use std::time::Instant;

use tracing::{Instrument, info, info_span};

use super::Middleware;

/// Opens one `request` span per request and logs how it ended.
///
/// Fields: `method`, `path` and the matched `route` on the span; `status`,
/// `latency_us` and `outcome` on the closing event. Install it early so the
/// span covers everything after it.
pub fn trace() -> Middleware {
    Middleware::step(|ctx| {
        let span = info_span!(
            "request",
            method = %ctx.method(),
            path = ctx.path(),
            route = ctx.route(),
        );
        Box::pin(async move {
            let started = Instant::now();
            let outcome = ctx.next().instrument(span.clone()).await;
            info!(
                parent: &span,
                status = ctx.status().as_u16(),
                latency_us = started.elapsed().as_micros() as u64,
                outcome = outcome.label(),
                "request finished"
            );
            outcome
        })
    })
}
