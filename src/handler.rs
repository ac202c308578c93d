//! Stages and handler type erasure.
//!
//! # How handlers are stored
//!
//! The router holds handlers and middleware of many different closure types.
//! Rust collections hold one concrete type, so everything executable is
//! erased into a [`Stage`]: a shared, type-erased async function from a live
//! [`Context`] to an [`Outcome`].
//!
//! ```text
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_, Response>   ← user writes this
//!        ↓ router.get("/users/:id", get_user)
//! endpoint(get_user)                                          ← marks the terminal,
//!        ↓                                                       applies the Reply
//! Stage(Arc<dyn Fn(&mut Context) -> BoxFuture<Outcome>>)      ← stored in the pipeline
//!        ↓
//! stage.call(&mut ctx)  at request time                        ← one vtable dispatch
//! ```
//!
//! The context is passed by `&mut` rather than by value: middleware code that
//! runs after `next` sees every change made further in, and the response sink
//! lives in exactly one place.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::pipeline::Outcome;
use crate::response::Reply;

/// A heap-allocated, type-erased future borrowing the request context for `'a`.
///
/// `Send` lets tokio move the request task across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type StageFn = dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static;

/// One executable step of a pipeline.
///
/// Cloning is one atomic increment; the same stage is shared by every request
/// that reaches it, so it must not hold per-request state.
#[derive(Clone)]
pub struct Stage(Arc<StageFn>);

impl Stage {
    /// Wraps an async function over the context.
    ///
    /// ```rust
    /// use strata::Stage;
    ///
    /// let stage = Stage::new(|ctx| Box::pin(async move {
    ///     ctx.set_header("x-served-by", "strata");
    ///     ctx.next().await
    /// }));
    /// # let _ = stage;
    /// ```
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call<'a>(&self, ctx: &'a mut Context) -> BoxFuture<'a, Outcome> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stage").field(&Arc::as_ptr(&self.0)).finish()
    }
}

/// Erases a terminal handler into a [`Stage`].
///
/// The stage records that the terminal was reached, awaits the handler and
/// applies its [`Reply`] to the context. A reply that fails becomes
/// [`Outcome::Faulted`].
pub(crate) fn endpoint<F, R>(handler: F) -> Stage
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, R> + Send + Sync + 'static,
    R: Reply + Send + 'static,
{
    // The handler must outlive the borrowed future, which only lives as long
    // as the context borrow; share it instead of borrowing the closure.
    let handler = Arc::new(handler);
    Stage::new(move |ctx| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            ctx.flow.reached_terminal = true;
            let reply = (*handler)(&mut *ctx).await;
            match reply.reply(ctx) {
                Ok(()) => Outcome::Continued,
                Err(fault) => Outcome::Faulted(fault),
            }
        })
    })
}
