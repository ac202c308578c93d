//! Composition and execution of middleware pipelines.
//!
//! A route's pipeline is `[recovery, ancestor scopes…, route middleware…,
//! handler]`, composed once when the router is built. Two strategies turn
//! that list into something runnable; they are interchangeable and produce
//! the same order for the same list:
//!
//! ```text
//! enter(m1) → enter(m2) → … → handler → … → exit(m2) → exit(m1)
//! ```
//!
//! **Wrapping** ([`Strategy::Wrapping`]) folds the list right-to-left over the
//! handler into one nested stage. Continuing is a real call into the wrapped
//! stage; code after it runs on the way back out.
//!
//! **Cursor** ([`Strategy::Cursor`]) flattens the list into a chain and keeps
//! an index in the [`Context`]. [`Context::next`] advances the index and runs
//! whatever is there; a caller of `next` is suspended until everything further
//! in has returned.
//!
//! In both, every hand-over between stages checks the abort flag.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::context::Context;
use crate::error::Fault;
use crate::handler::Stage;
use crate::middleware::Middleware;

/// Which execution model a pipeline uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Call-stack nesting: each middleware wraps the next stage.
    #[default]
    Wrapping,
    /// A flat chain driven by an index held in the request context.
    Cursor,
}

/// How running a stage, and everything it continued into, ended.
#[derive(Debug)]
pub enum Outcome {
    /// Execution reached the terminal handler and unwound normally.
    Continued,
    /// A stage stopped without letting the request reach the handler.
    ShortCircuited,
    Faulted(Fault),
}

impl Outcome {
    pub fn is_continued(&self) -> bool {
        matches!(self, Self::Continued)
    }

    pub fn is_short_circuited(&self) -> bool {
        matches!(self, Self::ShortCircuited)
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Continued => "continued",
            Self::ShortCircuited => "short_circuited",
            Self::Faulted(_) => "faulted",
        }
    }
}

impl From<Result<(), Fault>> for Outcome {
    fn from(result: Result<(), Fault>) -> Self {
        match result {
            Ok(()) => Self::Continued,
            Err(fault) => Self::Faulted(fault),
        }
    }
}

#[derive(Clone)]
enum Compiled {
    Nested(Stage),
    Flat(Arc<[Stage]>),
}

/// A composed, immutable pipeline. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct Pipeline {
    strategy: Strategy,
    compiled: Compiled,
    len: usize,
}

impl Pipeline {
    /// Composes `middleware` (outermost first) around `handler`.
    ///
    /// Depends only on its arguments, so composing the same list twice yields
    /// pipelines that behave identically.
    pub fn compose(strategy: Strategy, middleware: &[Middleware], handler: &Stage) -> Self {
        let compiled = match strategy {
            Strategy::Wrapping => {
                let mut stage = handler.clone();
                for mw in middleware.iter().rev() {
                    let next = guarded(stage);
                    stage = match mw {
                        Middleware::Wrap(layer) => layer.wrap(next),
                        Middleware::Step(step) => step_into(step.clone(), next),
                    };
                }
                Compiled::Nested(stage)
            }
            Strategy::Cursor => {
                // A wrap middleware continues through `next`; under the cursor
                // strategy that is simply another advance.
                let advance = Stage::new(|ctx| ctx.next());
                let chain: Vec<Stage> = middleware
                    .iter()
                    .map(|mw| match mw {
                        Middleware::Wrap(layer) => layer.wrap(advance.clone()),
                        Middleware::Step(step) => step.clone(),
                    })
                    .chain(std::iter::once(handler.clone()))
                    .collect();
                Compiled::Flat(chain.into())
            }
        };
        Self { strategy, compiled, len: middleware.len() + 1 }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Number of entries including the handler.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Drives `ctx` through the pipeline.
    ///
    /// The result is normalised from what actually happened rather than what
    /// the outermost stage claims: a fault stays a fault, otherwise it is
    /// [`Outcome::Continued`] if the handler was entered and
    /// [`Outcome::ShortCircuited`] if it was not.
    pub async fn run(&self, ctx: &mut Context) -> Outcome {
        ctx.flow.aborted = false;
        ctx.flow.reached_terminal = false;
        let outcome = match &self.compiled {
            Compiled::Nested(stage) => {
                ctx.flow.enter_nested();
                stage.call(ctx).await
            }
            Compiled::Flat(chain) => {
                ctx.flow.enter_cursor(Arc::clone(chain));
                ctx.next().await
            }
        };
        ctx.flow.leave();

        match outcome {
            Outcome::Faulted(fault) => Outcome::Faulted(fault),
            _ if ctx.flow.reached_terminal => Outcome::Continued,
            _ => Outcome::ShortCircuited,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("strategy", &self.strategy)
            .field("len", &self.len)
            .finish()
    }
}

/// Refuses to enter `stage` once the request has been aborted.
fn guarded(stage: Stage) -> Stage {
    Stage::new(move |ctx| {
        let stage = stage.clone();
        Box::pin(async move {
            if ctx.is_aborted() {
                return Outcome::ShortCircuited;
            }
            stage.call(ctx).await
        })
    })
}

/// Runs a step middleware under the wrapping strategy: `next` is parked in
/// the context for the step's `ctx.next()` to pick up.
fn step_into(step: Stage, next: Stage) -> Stage {
    Stage::new(move |ctx| {
        let step = step.clone();
        let next = next.clone();
        Box::pin(async move {
            let previous = ctx.flow.hand_off(next);
            let outcome = step.call(&mut *ctx).await;
            ctx.flow.restore(previous);
            outcome
        })
    })
}
