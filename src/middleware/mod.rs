//! Middleware: the two registration shapes and the built-in middleware.
//!
//! A middleware is written in one of two shapes, freely mixed in one
//! pipeline:
//!
//! - **wrap** ([`Middleware::wrap`]): a [`Layer`] that receives the next
//!   [`Stage`] at composition time and returns a stage that may call it.
//! - **step** ([`Middleware::step`]): an async function of the context that
//!   continues with [`Context::next`].
//!
//! Either shape continues at most once, and must not keep the context past
//! its own return. Returning without continuing short-circuits; calling
//! [`Context::abort`] does the same for everything that has not started yet.
//!
//! Built in:
//! - [`recover()`]: the outermost recovery point (installed by the router)
//! - [`trace()`]: per-request span with method, path, status and latency
//! - [`request_id()`]: `x-request-id` propagation

mod recover;
mod request_id;
mod trace;

use std::fmt;
use std::sync::Arc;

pub use recover::recover;
pub(crate) use recover::render;
pub use request_id::{RequestId, request_id};
pub use trace::trace;

use crate::context::Context;
use crate::handler::{BoxFuture, Stage};
use crate::pipeline::Outcome;

/// Builds the stage that runs around `next`.
///
/// Called once per route when the router is built, never per request.
/// Closures `Fn(Stage) -> Stage` implement it.
pub trait Layer: Send + Sync + 'static {
    fn wrap(&self, next: Stage) -> Stage;
}

impl<F> Layer for F
where
    F: Fn(Stage) -> Stage + Send + Sync + 'static,
{
    fn wrap(&self, next: Stage) -> Stage {
        self(next)
    }
}

/// A registered middleware.
#[derive(Clone)]
pub enum Middleware {
    Wrap(Arc<dyn Layer>),
    Step(Stage),
}

impl Middleware {
    /// A middleware that wraps the rest of the pipeline.
    ///
    /// ```rust
    /// use strata::{Middleware, Stage};
    ///
    /// let timing = Middleware::wrap(|next: Stage| {
    ///     Stage::new(move |ctx| {
    ///         let next = next.clone();
    ///         Box::pin(async move {
    ///             let started = std::time::Instant::now();
    ///             let outcome = next.call(ctx).await;
    ///             ctx.set_header("x-elapsed-us", started.elapsed().as_micros().to_string());
    ///             outcome
    ///         })
    ///     })
    /// });
    /// # let _ = timing;
    /// ```
    pub fn wrap(layer: impl Layer) -> Self {
        Self::Wrap(Arc::new(layer))
    }

    /// A middleware that continues through [`Context::next`].
    ///
    /// ```rust
    /// use strata::{Middleware, Outcome};
    /// use http::StatusCode;
    ///
    /// let auth = Middleware::step(|ctx| Box::pin(async move {
    ///     if ctx.header("authorization").is_none() {
    ///         ctx.set_status(StatusCode::UNAUTHORIZED);
    ///         return Outcome::ShortCircuited;
    ///     }
    ///     ctx.next().await
    /// }));
    /// # let _ = auth;
    /// ```
    pub fn step<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        Self::Step(Stage::new(f))
    }

    pub fn is_wrap(&self) -> bool {
        matches!(self, Self::Wrap(_))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrap(_) => f.write_str("Middleware::Wrap"),
            Self::Step(stage) => f.debug_tuple("Middleware::Step").field(stage).finish(),
        }
    }
}
