//! The built application and its request dispatcher.
//!
//! ```text
//! App::serve(request)
//!   ├─ split path, look up (method, segments) in the route tree
//!   │    NotFound ─────────────▶ 404            (no middleware runs)
//!   │    MethodNotAllowed ─────▶ 405 + Allow    (no middleware runs)
//!   ├─ acquire a context, bind params           DecodeError ──▶ 400
//!   ├─ spawn the request task ─────────────────────────────────────────┐
//!   │                                                                   │
//!   └─ await the response head ◀── first flush or finish ── pipeline.run(ctx)
//!                                                           finish, release ctx
//! ```
//!
//! The request runs on its own task, so a handler that streams keeps running
//! after `serve` has returned the head, and a panic that escapes everything
//! stays inside that task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::body::{self, Body};
use crate::config::Config;
use crate::context::{Context, ContextPool};
use crate::error::Fault;
use crate::middleware::{self, Middleware};
use crate::path::{self, Pattern};
use crate::pipeline::{Outcome, Pipeline};
use crate::router::{self, Route, RouteId, Router};
use crate::sink;
use crate::tree::{Lookup, RouteTree};

/// A frozen, shareable application. Cloning is one atomic increment.
#[derive(Clone)]
pub struct App {
    inner: Arc<Shared>,
}

struct Shared {
    tree: RouteTree,
    routes: Vec<Route>,
    /// Middleware list per route, kept so pipelines can be recomposed.
    chains: Vec<Vec<Middleware>>,
    pipelines: Vec<Pipeline>,
    pool: ContextPool,
    config: Config,
}

impl App {
    pub(crate) fn new(router: Router) -> Self {
        let (tree, routes, scopes, recovery, config) = router.into_parts();
        let chains: Vec<_> = routes
            .iter()
            .map(|route| router::chain_for(route, &scopes, &recovery))
            .collect();
        let pipelines = routes
            .iter()
            .zip(&chains)
            .map(|(route, chain)| Pipeline::compose(config.strategy, chain, &route.handler))
            .collect();

        info!(routes = routes.len(), strategy = ?config.strategy, "application built");
        let pool = ContextPool::new(config.pool_capacity);
        Self { inner: Arc::new(Shared { tree, routes, chains, pipelines, pool, config }) }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Resolves `method` + `path` without running anything.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup {
        self.inner.tree.lookup(method, &path::split(path))
    }

    /// The full pattern a route was registered under.
    pub fn pattern(&self, id: RouteId) -> Option<&Pattern> {
        self.inner.routes.get(id.0).map(|route| &route.pattern)
    }

    /// The pipeline composed for `id` when the application was built.
    pub fn pipeline(&self, id: RouteId) -> Option<&Pipeline> {
        self.inner.pipelines.get(id.0)
    }

    /// Composes `id`'s pipeline again from its middleware list. Behaves
    /// exactly like the cached one.
    pub fn compose(&self, id: RouteId) -> Option<Pipeline> {
        let route = self.inner.routes.get(id.0)?;
        let chain = &self.inner.chains[id.0];
        Some(Pipeline::compose(self.inner.config.strategy, chain, &route.handler))
    }

    pub fn pool(&self) -> &ContextPool {
        &self.inner.pool
    }

    /// Dispatches one request and returns the response once its head is
    /// committed. The body may still be streaming when this returns.
    pub async fn serve(&self, request: http::Request<Body>) -> http::Response<Body> {
        let shared = &*self.inner;
        let segments = path::split(request.uri().path());
        let id = match shared.tree.lookup(request.method(), &segments) {
            Lookup::Found(id) => id,
            Lookup::MethodNotAllowed(allowed) => {
                debug!(method = %request.method(), path = request.uri().path(), "method not allowed");
                return method_not_allowed(&allowed);
            }
            Lookup::NotFound => {
                debug!(method = %request.method(), path = request.uri().path(), "no route");
                return plain(StatusCode::NOT_FOUND);
            }
        };

        let route = &shared.routes[id.0];
        let mut ctx = shared.pool.acquire();
        if let Err(err) = route.pattern.extract(&segments, ctx.params_mut()) {
            debug!(route = %route.name, "{err}");
            shared.pool.release(ctx);
            return plain(StatusCode::BAD_REQUEST);
        }

        let (parts, body) = request.into_parts();
        let (sink, pending) = sink::channel(shared.config.body_buffer);
        ctx.bind(parts, body, Some(Arc::clone(&route.name)), sink, CancellationToken::new());

        let app = self.clone();
        let name = Arc::clone(&route.name);
        tokio::spawn(async move {
            if let Err(payload) = AssertUnwindSafe(app.execute(id, ctx)).catch_unwind().await {
                let fault = Fault::panic(payload);
                error!(route = %name, "request task died: {fault}");
            }
        });

        match pending.wait().await {
            Some(response) => response,
            None => plain(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Runs the pipeline, finalizes the response and returns the context to
    /// the pool.
    async fn execute(self, id: RouteId, mut ctx: Context) {
        let shared = &*self.inner;
        let route = &shared.routes[id.0];

        let (outcome, interrupted) = {
            let token = ctx.cancellation().clone();
            let disconnect = ctx.response().disconnect_signal();
            let deadline = shared.config.request_timeout();
            let watch = async move {
                let gone = async {
                    match &disconnect {
                        Some(tx) => tx.closed().await,
                        None => std::future::pending().await,
                    }
                };
                match deadline {
                    Some(limit) => tokio::select! {
                        () = gone => debug!("client went away"),
                        () = tokio::time::sleep(limit) => debug!(?limit, "deadline passed"),
                    },
                    None => {
                        gone.await;
                        debug!("client went away");
                    }
                }
            };

            let run = shared.pipelines[id.0].run(&mut ctx);
            tokio::pin!(run, watch);
            tokio::select! {
                outcome = &mut run => (outcome, false),
                () = &mut watch => {
                    token.cancel();
                    (run.await, true)
                }
            }
        };

        match &outcome {
            // Reached only when a replacement recovery point let a fault through.
            Outcome::Faulted(fault) => middleware::render(&mut ctx, fault),
            // Writes after cancellation were dropped, so the buffered reply is
            // not what the handler meant to send.
            _ if interrupted && !ctx.is_committed() => middleware::render(&mut ctx, &Fault::cancelled()),
            _ => {}
        }
        ctx.response_mut().finish().await;
        debug!(method = %route.method, route = %route.name, outcome = outcome.label(), "request complete");
        shared.pool.release(ctx);
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.inner.routes.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// A complete response carrying the status's reason phrase as its body.
fn plain(status: StatusCode) -> http::Response<Body> {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = http::Response::new(body::full(reason));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(reason.len()));
    response
}

fn method_not_allowed(allowed: &[Method]) -> http::Response<Body> {
    let list = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
    let mut response = plain(StatusCode::METHOD_NOT_ALLOWED);
    if let Ok(value) = HeaderValue::from_str(&list) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}
