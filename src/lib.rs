//! # strata
//!
//! An HTTP routing and middleware core for Rust services behind a reverse
//! proxy: a segment-trie router with typed path parameters, a middleware
//! pipeline with two interchangeable execution strategies, and a per-request
//! [`Context`] that handlers and middleware share.
//!
//! ## The pieces
//!
//! - **Routing**: `:name` / `{name}` parameters, `*rest` catch-alls, literal
//!   beats parameter beats catch-all, 404 vs 405 with `Allow`.
//! - **Middleware**: wrap-shaped ([`Layer`]) or step-shaped
//!   ([`Context::next`]), registered globally, per [`Group`] or per route.
//!   Order is always outermost-first in, reverse out.
//! - **Execution**: [`Strategy::Wrapping`] nests stages like a call stack;
//!   [`Strategy::Cursor`] walks a flat chain with an index.
//! - **Failures**: handlers return `Result`; faults and panics end at one
//!   recovery point that renders a 500 unless the response is already
//!   streaming.
//! - **Host**: tokio + hyper, HTTP/1.1 and HTTP/2, graceful shutdown.
//!
//! TLS, body-size limits and rate limiting belong to the proxy.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use strata::{BoxFuture, Context, Fault, Response, Router, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), strata::Error> {
//!     let mut router = Router::new();
//!     router.use_middleware(middleware::trace());
//!     router.get("/users/:id", get_user)?;
//!     router.post("/users", create_user)?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(router.build()).await
//! }
//!
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_, Response> {
//!     Box::pin(async move {
//!         let id = ctx.param("id").unwrap_or("unknown");
//!         Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//!     })
//! }
//!
//! fn create_user(ctx: &mut Context) -> BoxFuture<'_, Result<Response, Fault>> {
//!     Box::pin(async move {
//!         let body = ctx.body_bytes().await?;
//!         if body.is_empty() {
//!             return Ok(Response::status(StatusCode::BAD_REQUEST));
//!         }
//!         Ok(Response::builder()
//!             .status(StatusCode::CREATED)
//!             .header("location", "/users/99")
//!             .json(body.to_vec()))
//!     })
//! }
//! ```

mod app;
mod config;
mod context;
mod error;
mod handler;
mod path;
mod pipeline;
mod response;
mod router;
mod server;
mod sink;
mod tree;

pub mod body;
pub mod health;
pub mod middleware;

pub use app::App;
pub use body::Body;
pub use config::Config;
pub use context::{Context, ContextPool};
pub use error::{BoxError, DecodeError, Error, Fault, FaultKind, RouteError, WriteAfterCommit};
pub use handler::{BoxFuture, Stage};
pub use middleware::{Layer, Middleware};
pub use path::{Params, Pattern, Segment, decode, split};
pub use pipeline::{Outcome, Pipeline, Strategy};
pub use response::{ContentType, Reply, Response, ResponseBuilder};
pub use router::{Group, RouteBuilder, RouteId, Router};
pub use server::Server;
pub use sink::ResponseSink;
pub use tree::Lookup;
