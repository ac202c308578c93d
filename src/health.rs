//! Built-in health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can it serve traffic? Failure → taken out of rotation. |
//!
//! ```rust
//! use strata::{Router, health};
//!
//! # fn main() -> Result<(), strata::RouteError> {
//! let mut router = Router::new();
//! router.get("/healthz", health::liveness)?;
//! router.get("/readyz", health::readiness)?;
//! # Ok(())
//! # }
//! ```
//!
//! Register your own readiness handler to gate on dependencies:
//!
//! ```rust
//! use http::StatusCode;
//! use strata::{BoxFuture, Context, Response};
//!
//! fn readiness(_ctx: &mut Context) -> BoxFuture<'_, Response> {
//!     Box::pin(async {
//!         if dependencies_are_healthy().await {
//!             Response::text("ready")
//!         } else {
//!             Response::status(StatusCode::SERVICE_UNAVAILABLE)
//!         }
//!     })
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::response::Response;

/// Always `200 OK` with body `ok`. Checks nothing: if it can
/// answer at all, the process is alive.
pub fn liveness(_ctx: &mut Context) -> BoxFuture<'_, Response> {
    Box::pin(async { Response::text("ok") })
}

/// `200 OK` with body `ready`.
pub fn readiness(_ctx: &mut Context) -> BoxFuture<'_, Response> {
    Box::pin(async { Response::text("ready") })
}
