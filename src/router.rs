//! Route and middleware registration.
//!
//! Registration builds three things: the route tree, a scope tree (the root
//! scope plus one per [`Group`]), and per-route middleware lists. Nothing is
//! composed until [`Router::build`], which is why scope middleware applies to
//! every route of its scope no matter which was registered first.
//!
//! ```rust
//! use strata::{BoxFuture, Context, Response, Router, middleware};
//!
//! fn show(ctx: &mut Context) -> BoxFuture<'_, Response> {
//!     Box::pin(async move { Response::text(ctx.param("id").unwrap_or_default().to_owned()) })
//! }
//!
//! # fn main() -> Result<(), strata::RouteError> {
//! let mut router = Router::new();
//! router.use_middleware(middleware::trace());
//! {
//!     let mut api = router.group("/api");
//!     api.use_middleware(middleware::request_id());
//!     api.get("/users/:id", show)?;
//! }
//! let app = router.build();
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::app::App;
use crate::config::Config;
use crate::context::Context;
use crate::error::RouteError;
use crate::handler::{BoxFuture, Stage, endpoint};
use crate::middleware::{self, Layer, Middleware};
use crate::path::Pattern;
use crate::pipeline::{Outcome, Strategy};
use crate::response::Reply;
use crate::tree::RouteTree;

/// Handle to a registered route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RouteId(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ScopeId(usize);

const ROOT: ScopeId = ScopeId(0);

pub(crate) struct Scope {
    /// Full prefix, ancestors included.
    prefix: String,
    parent: Option<ScopeId>,
    middleware: Vec<Middleware>,
}

pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) pattern: Pattern,
    pub(crate) name: Arc<str>,
    scope: ScopeId,
    middleware: Vec<Middleware>,
    pub(crate) handler: Stage,
}

/// The application under construction.
pub struct Router {
    tree: RouteTree,
    routes: Vec<Route>,
    scopes: Vec<Scope>,
    recovery: Middleware,
    config: Config,
}

macro_rules! verbs {
    ($($(#[$doc:meta])* $name:ident => $method:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<F, R>(&mut self, pattern: &str, handler: F) -> Result<RouteId, RouteError>
            where
                F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, R> + Send + Sync + 'static,
                R: Reply + Send + 'static,
            {
                self.on(Method::$method, pattern, handler)
            }
        )*
    };
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let root = Scope { prefix: String::new(), parent: None, middleware: Vec::new() };
        Self {
            tree: RouteTree::default(),
            routes: Vec::new(),
            scopes: vec![root],
            recovery: middleware::recover(),
            config,
        }
    }

    /// Overrides the configured execution strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds global middleware, run for every matched route.
    pub fn use_middleware(&mut self, mw: Middleware) -> &mut Self {
        self.scopes[ROOT.0].middleware.push(mw);
        self
    }

    pub fn wrap(&mut self, layer: impl Layer) -> &mut Self {
        self.use_middleware(Middleware::wrap(layer))
    }

    pub fn step<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.use_middleware(Middleware::step(f))
    }

    /// Replaces the recovery point, the outermost entry of every pipeline.
    pub fn recover(&mut self, mw: Middleware) -> &mut Self {
        self.recovery = mw;
        self
    }

    /// Opens a scope whose routes share `prefix` and middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        let scope = self.open_scope(ROOT, prefix);
        Group { router: self, scope }
    }

    /// Starts a route that carries its own middleware.
    pub fn route(&mut self, method: Method, pattern: &str) -> RouteBuilder<'_> {
        RouteBuilder::new(self, ROOT, method, pattern)
    }

    /// Registers `handler` for `method` + `pattern`.
    ///
    /// Fails on an invalid pattern or on a second registration of the same
    /// method and (canonical) pattern. The application must not start if
    /// this fails.
    pub fn on<F, R>(&mut self, method: Method, pattern: &str, handler: F) -> Result<RouteId, RouteError>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, R> + Send + Sync + 'static,
        R: Reply + Send + 'static,
    {
        self.register(ROOT, method, pattern, Vec::new(), endpoint(handler))
    }

    verbs! {
        get => GET,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
    }

    /// Freezes the registrations and composes every pipeline.
    pub fn build(self) -> App {
        App::new(self)
    }

    fn open_scope(&mut self, parent: ScopeId, prefix: &str) -> ScopeId {
        let prefix = Pattern::join(&self.scopes[parent.0].prefix, prefix);
        self.scopes.push(Scope { prefix, parent: Some(parent), middleware: Vec::new() });
        ScopeId(self.scopes.len() - 1)
    }

    fn register(
        &mut self,
        scope: ScopeId,
        method: Method,
        pattern: &str,
        middleware: Vec<Middleware>,
        handler: Stage,
    ) -> Result<RouteId, RouteError> {
        let full = Pattern::join(&self.scopes[scope.0].prefix, pattern);
        let pattern = Pattern::parse(&full)?;
        let id = RouteId(self.routes.len());
        self.tree.insert(&method, &pattern, id)?;

        debug!(%method, pattern = pattern.as_str(), "route registered");
        self.routes.push(Route {
            name: Arc::from(pattern.as_str()),
            method,
            pattern,
            scope,
            middleware,
            handler,
        });
        Ok(id)
    }

    pub(crate) fn into_parts(self) -> (RouteTree, Vec<Route>, Vec<Scope>, Middleware, Config) {
        (self.tree, self.routes, self.scopes, self.recovery, self.config)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// The middleware list a route runs, outermost first: the recovery point,
/// each enclosing scope from the root inwards, then the route's own.
pub(crate) fn chain_for(route: &Route, scopes: &[Scope], recovery: &Middleware) -> Vec<Middleware> {
    let mut lineage = Vec::new();
    let mut cursor = Some(route.scope);
    while let Some(id) = cursor {
        let scope = &scopes[id.0];
        lineage.push(scope);
        cursor = scope.parent;
    }

    let mut chain = vec![recovery.clone()];
    for scope in lineage.into_iter().rev() {
        chain.extend(scope.middleware.iter().cloned());
    }
    chain.extend(route.middleware.iter().cloned());
    chain
}

// ── Group ─────────────────────────────────────────────────────────────────────

/// A scope: a prefix plus middleware shared by the routes registered
/// through it, including those of nested groups.
pub struct Group<'r> {
    router: &'r mut Router,
    scope: ScopeId,
}

impl Group<'_> {
    pub fn use_middleware(&mut self, mw: Middleware) -> &mut Self {
        self.router.scopes[self.scope.0].middleware.push(mw);
        self
    }

    pub fn wrap(&mut self, layer: impl Layer) -> &mut Self {
        self.use_middleware(Middleware::wrap(layer))
    }

    pub fn step<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.use_middleware(Middleware::step(f))
    }

    /// Opens a scope nested in this one.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        let scope = self.router.open_scope(self.scope, prefix);
        Group { router: &mut *self.router, scope }
    }

    pub fn route(&mut self, method: Method, pattern: &str) -> RouteBuilder<'_> {
        RouteBuilder::new(&mut *self.router, self.scope, method, pattern)
    }

    pub fn on<F, R>(&mut self, method: Method, pattern: &str, handler: F) -> Result<RouteId, RouteError>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, R> + Send + Sync + 'static,
        R: Reply + Send + 'static,
    {
        self.router.register(self.scope, method, pattern, Vec::new(), endpoint(handler))
    }

    verbs! {
        get => GET,
        post => POST,
        put => PUT,
        patch => PATCH,
        delete => DELETE,
    }
}

// ── RouteBuilder ──────────────────────────────────────────────────────────────

/// A route being registered with its own middleware.
///
/// ```rust
/// # use strata::{BoxFuture, Context, Middleware, Response, Router};
/// # fn admin(_: &mut Context) -> BoxFuture<'_, Response> { Box::pin(async { Response::text("") }) }
/// # fn main() -> Result<(), strata::RouteError> {
/// let mut router = Router::new();
/// router
///     .route(http::Method::GET, "/admin")
///     .step(|ctx| Box::pin(async move { ctx.next().await }))
///     .to(admin)?;
/// # Ok(())
/// # }
/// ```
pub struct RouteBuilder<'r> {
    router: &'r mut Router,
    scope: ScopeId,
    method: Method,
    pattern: String,
    middleware: Vec<Middleware>,
}

impl<'r> RouteBuilder<'r> {
    fn new(router: &'r mut Router, scope: ScopeId, method: Method, pattern: &str) -> Self {
        Self { router, scope, method, pattern: pattern.to_owned(), middleware: Vec::new() }
    }

    pub fn with(mut self, mw: Middleware) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn wrap(self, layer: impl Layer) -> Self {
        self.with(Middleware::wrap(layer))
    }

    pub fn step<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.with(Middleware::step(f))
    }

    /// Registers the route with `handler` as its terminal.
    pub fn to<F, R>(self, handler: F) -> Result<RouteId, RouteError>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, R> + Send + Sync + 'static,
        R: Reply + Send + 'static,
    {
        let Self { router, scope, method, pattern, middleware } = self;
        router.register(scope, method, &pattern, middleware, endpoint(handler))
    }
}
