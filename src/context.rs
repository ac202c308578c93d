//! The per-request context and its reuse pool.
//!
//! A [`Context`] is the only thing handlers and middleware see. It carries
//! the request (method, URI, headers, body), the bound path parameters, the
//! response sink, the cancellation signal, and the execution state the
//! pipeline needs to know where it is.
//!
//! Contexts are recycled through a [`ContextPool`]. Reuse is explicit: the
//! pool resets a context both when it hands it out and when it takes it back,
//! so nothing from one request can be observed by the next.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::FutureExt;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, Method, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{error, warn};

use crate::body::Body;
use crate::error::Fault;
use crate::handler::{BoxFuture, Stage};
use crate::path::Params;
use crate::pipeline::Outcome;
use crate::response::Response;
use crate::sink::ResponseSink;

// ── Execution state ───────────────────────────────────────────────────────────

/// Where the running pipeline is. Reset for every request.
#[derive(Default)]
pub(crate) struct Flow {
    mode: Mode,
    pub(crate) aborted: bool,
    pub(crate) reached_terminal: bool,
}

#[derive(Default)]
enum Mode {
    #[default]
    Idle,
    /// Wrapping strategy: the stage a step middleware continues into when it
    /// calls `next`. Taken on use, so a second call finds nothing.
    Nested { continuation: Option<Stage> },
    /// Cursor strategy: the flattened chain and the index of the entry the
    /// next `advance` will run.
    Cursor { chain: Arc<[Stage]>, next: usize },
}

impl Flow {
    pub(crate) fn enter_nested(&mut self) {
        self.mode = Mode::Nested { continuation: None };
    }

    pub(crate) fn enter_cursor(&mut self, chain: Arc<[Stage]>) {
        self.mode = Mode::Cursor { chain, next: 0 };
    }

    pub(crate) fn leave(&mut self) {
        self.mode = Mode::Idle;
    }

    /// Installs the continuation for a step middleware, returning the one it
    /// replaces.
    pub(crate) fn hand_off(&mut self, next: Stage) -> Option<Stage> {
        match &mut self.mode {
            Mode::Nested { continuation } => continuation.replace(next),
            _ => {
                self.mode = Mode::Nested { continuation: Some(next) };
                None
            }
        }
    }

    pub(crate) fn restore(&mut self, previous: Option<Stage>) {
        if let Mode::Nested { continuation } = &mut self.mode {
            *continuation = previous;
        }
    }

    fn advance(&mut self) -> Option<Stage> {
        match &mut self.mode {
            Mode::Idle => None,
            Mode::Nested { continuation } => continuation.take(),
            Mode::Cursor { chain, next } => {
                let stage = chain.get(*next).cloned();
                if stage.is_some() {
                    *next += 1;
                }
                stage
            }
        }
    }

    fn cursor(&self) -> Option<usize> {
        match &self.mode {
            Mode::Cursor { next, .. } => Some(*next),
            _ => None,
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything one request needs, owned by the task serving it.
pub struct Context {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Option<Body>,
    query: Vec<(String, String)>,
    params: Params,
    route: Option<Arc<str>>,
    extensions: Extensions,
    response: ResponseSink,
    cancel: CancellationToken,
    pub(crate) flow: Flow,
}

impl Context {
    /// A standalone context for `request`, detached from any host.
    ///
    /// Useful for driving a [`Pipeline`](crate::Pipeline) directly; flushed
    /// bytes stay in the sink's buffer.
    pub fn new(request: http::Request<Body>) -> Self {
        let (parts, body) = request.into_parts();
        let mut ctx = Self::blank();
        ctx.bind(parts, body, None, ResponseSink::detached(), CancellationToken::new());
        ctx
    }

    fn blank() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::default(),
            version: Version::default(),
            headers: HeaderMap::new(),
            body: None,
            query: Vec::new(),
            params: Params::new(),
            route: None,
            extensions: Extensions::new(),
            response: ResponseSink::detached(),
            cancel: CancellationToken::new(),
            flow: Flow::default(),
        }
    }

    /// Loads a request into a reset context. Params are bound separately,
    /// before this call, through [`params_mut`](Self::params_mut).
    pub(crate) fn bind(
        &mut self,
        parts: http::request::Parts,
        body: Body,
        route: Option<Arc<str>>,
        response: ResponseSink,
        cancel: CancellationToken,
    ) {
        self.method = parts.method;
        self.uri = parts.uri;
        self.version = parts.version;
        self.headers = parts.headers;
        self.extensions = parts.extensions;
        self.body = Some(body);
        if let Some(query) = self.uri.query() {
            self.query.extend(
                url::form_urlencoded::parse(query.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }
        self.route = route;
        self.response = response;
        self.cancel = cancel;
    }

    /// Clears every trace of the previous request.
    pub(crate) fn reset(&mut self) {
        self.method = Method::GET;
        self.uri = Uri::default();
        self.version = Version::default();
        self.headers.clear();
        self.body = None;
        self.query.clear();
        self.params.clear();
        self.route = None;
        self.extensions.clear();
        self.response = ResponseSink::detached();
        self.cancel = CancellationToken::new();
        self.flow = Flow::default();
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query-string parameter, form-decoded.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// A named path parameter.
    ///
    /// For a route `/users/:id`, `ctx.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// The matched route pattern, e.g. `/users/:id`.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Takes the request body stream. Later calls return `None`.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Reads the whole request body, giving up if the request is cancelled.
    /// Returns empty bytes if the body was already taken.
    pub async fn body_bytes(&mut self) -> Result<Bytes, Fault> {
        let Some(body) = self.body.take() else {
            return Ok(Bytes::new());
        };
        tokio::select! {
            collected = body.collect() => collected.map(|c| c.to_bytes()).map_err(Fault::body),
            () = self.cancel.cancelled() => Err(Fault::cancelled()),
        }
    }

    /// Per-request typed state shared between middleware and handlers.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    // ── Response ──────────────────────────────────────────────────────────────

    pub fn response(&self) -> &ResponseSink {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseSink {
        &mut self.response
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn is_committed(&self) -> bool {
        self.response.is_committed()
    }

    /// Sets the status. Ignored (and logged once) after commit.
    pub fn set_status(&mut self, status: StatusCode) {
        if let Err(err) = self.response.set_status(status) {
            self.response.report(err);
        }
    }

    /// Sets a response header, replacing earlier values. Ignored (and logged
    /// once) after commit; invalid names or values are dropped with a warning.
    pub fn set_header<K, V>(&mut self, name: K, value: V)
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        let Some((name, value)) = header_pair(name, value) else {
            return;
        };
        if let Err(err) = self.response.set_header(name, value) {
            self.response.report(err);
        }
    }

    pub fn append_header<K, V>(&mut self, name: K, value: V)
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        let Some((name, value)) = header_pair(name, value) else {
            return;
        };
        if let Err(err) = self.response.append_header(name, value) {
            self.response.report(err);
        }
    }

    /// Buffers body bytes. Discarded once the request is cancelled.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.response.write(bytes.as_ref());
    }

    /// Applies a [`Response`] value: status, headers, then body.
    pub fn respond(&mut self, response: Response) {
        response.apply(self);
    }

    /// Commits the head and pushes buffered bytes to the client.
    ///
    /// Fails with a cancellation fault if the request was cancelled or the
    /// client went away, in which case the request is cancelled too.
    pub async fn flush(&mut self) -> Result<(), Fault> {
        if self.cancel.is_cancelled() {
            return Err(Fault::cancelled());
        }
        let result = tokio::select! {
            result = self.response.flush() => result,
            () = self.cancel.cancelled() => Err(Fault::cancelled()),
        };
        if result.is_err() {
            self.cancel.cancel();
        }
        result
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    /// The request's cancellation token. Fires on client disconnect or when
    /// the configured deadline passes. Clone it into background work.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the request is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `task` detached from this request.
    ///
    /// The task cannot borrow the context; copy out what it needs. Its
    /// failures and panics are logged and go no further.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), Fault>> + Send + 'static,
    {
        let route = self.route.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(fault)) => error!(route = route.as_deref(), %fault, "background task failed"),
                Err(payload) => {
                    let fault = Fault::panic(payload);
                    error!(route = route.as_deref(), %fault, "background task panicked");
                }
            }
        })
    }

    // ── Flow control ──────────────────────────────────────────────────────────

    /// Continues into the rest of the pipeline and waits for it to unwind.
    ///
    /// Under the cursor strategy this is the advance primitive: it moves the
    /// cursor forward and runs the entry found there. Under the wrapping
    /// strategy it runs the continuation handed to the current step
    /// middleware. Either way it checks the abort flag first, and calling it
    /// when nothing is left to run returns [`Outcome::Continued`] without
    /// doing anything.
    pub fn next(&mut self) -> BoxFuture<'_, Outcome> {
        Box::pin(async move {
            if self.flow.aborted {
                return Outcome::ShortCircuited;
            }
            match self.flow.advance() {
                Some(stage) => stage.call(self).await,
                None => Outcome::Continued,
            }
        })
    }

    /// Stops the pipeline: no stage further in will start, even if the caller
    /// goes on to call [`next`](Self::next). Stages already running unwind
    /// normally.
    pub fn abort(&mut self) {
        self.flow.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.flow.aborted
    }

    /// The cursor strategy's position: the index of the next entry to run.
    /// `None` under the wrapping strategy or outside a pipeline.
    pub fn cursor(&self) -> Option<usize> {
        self.flow.cursor()
    }
}

fn header_pair<K, V>(name: K, value: V) -> Option<(HeaderName, HeaderValue)>
where
    HeaderName: TryFrom<K>,
    HeaderValue: TryFrom<V>,
{
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            warn!("invalid response header dropped");
            None
        }
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// A bounded free list of contexts.
///
/// Contexts are reset on [`acquire`](Self::acquire) and again on
/// [`release`](Self::release); a context is never handed out dirty.
pub struct ContextPool {
    idle: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    pub fn new(capacity: usize) -> Self {
        Self { idle: Mutex::new(Vec::with_capacity(capacity.min(64))), capacity }
    }

    pub fn acquire(&self) -> Context {
        let recycled = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut ctx = recycled.unwrap_or_else(Context::blank);
        ctx.reset();
        ctx
    }

    pub fn release(&self, mut ctx: Context) {
        ctx.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(ctx);
        }
    }

    /// Contexts waiting to be reused.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body;

    fn request(uri: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(uri)
            .header("x-token", "abc")
            .body(body::full("payload"))
            .unwrap()
    }

    #[test]
    fn released_context_comes_back_clean() {
        let pool = ContextPool::new(4);
        let mut ctx = pool.acquire();
        let (parts, body) = request("/users/7?page=2").into_parts();
        ctx.params_mut().push("id", "7".into());
        ctx.bind(parts, body, Some(Arc::from("/users/:id")), ResponseSink::detached(), CancellationToken::new());
        ctx.extensions_mut().insert(42_u32);
        ctx.flow.enter_cursor(Arc::from(vec![Stage::new(|ctx| ctx.next())]));
        ctx.flow.advance();
        ctx.abort();
        ctx.set_status(StatusCode::IM_A_TEAPOT);
        ctx.write("left over");
        ctx.cancellation().cancel();
        pool.release(ctx);
        assert_eq!(pool.idle(), 1);

        let ctx = pool.acquire();
        assert!(ctx.params().is_empty());
        assert_eq!(ctx.query("page"), None);
        assert_eq!(ctx.header("x-token"), None);
        assert_eq!(ctx.route(), None);
        assert!(ctx.extensions().get::<u32>().is_none());
        assert_eq!(ctx.cursor(), None);
        assert!(!ctx.is_aborted());
        assert!(!ctx.flow.reached_terminal);
        assert_eq!(ctx.status(), StatusCode::OK);
        assert!(ctx.response().buffered().is_empty());
        assert!(!ctx.is_cancelled());
        assert_eq!(pool.idle(), 0);
    }

    proptest::proptest! {
        #[test]
        fn reacquired_contexts_carry_nothing_over(
            params in proptest::collection::vec(("[a-z]{1,6}", "[a-z0-9]{0,6}"), 0..6),
            chain_len in 1usize..6,
            advances in 0usize..8,
            abort in proptest::bool::ANY,
        ) {
            let pool = ContextPool::new(1);
            let mut ctx = pool.acquire();
            for (name, value) in &params {
                ctx.params_mut().push(name, value.clone());
            }
            let chain: Vec<Stage> = (0..chain_len).map(|_| Stage::new(|ctx| ctx.next())).collect();
            ctx.flow.enter_cursor(chain.into());
            for _ in 0..advances {
                ctx.flow.advance();
            }
            if abort {
                ctx.abort();
            }
            pool.release(ctx);

            let ctx = pool.acquire();
            proptest::prop_assert!(ctx.params().is_empty());
            proptest::prop_assert_eq!(ctx.cursor(), None);
            proptest::prop_assert!(!ctx.is_aborted());
        }
    }

    #[test]
    fn pool_keeps_at_most_capacity() {
        let pool = ContextPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn reads_query_headers_and_params() {
        let mut ctx = Context::new(request("/search?q=caf%C3%A9+noir&page=2&q=ignored"));
        ctx.params_mut().push("id", "7".into());
        assert_eq!(ctx.path(), "/search");
        assert_eq!(ctx.query("q"), Some("café noir"));
        assert_eq!(ctx.query("page"), Some("2"));
        assert_eq!(ctx.header("X-Token"), Some("abc"));
        assert_eq!(ctx.param("id"), Some("7"));
    }

    #[tokio::test]
    async fn body_is_read_once() {
        let mut ctx = Context::new(request("/"));
        assert_eq!(&ctx.body_bytes().await.unwrap()[..], b"payload");
        assert!(ctx.body_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_writes_and_flushes() {
        let mut ctx = Context::new(request("/"));
        ctx.write("before ");
        ctx.cancellation().cancel();
        ctx.write("after");
        assert_eq!(ctx.response().buffered(), b"before ");
        assert_eq!(ctx.flush().await.unwrap_err().kind(), crate::FaultKind::Cancelled);
        assert!(!ctx.is_committed());
    }

    #[tokio::test]
    async fn late_status_changes_are_suppressed() {
        let mut ctx = Context::new(request("/"));
        ctx.set_status(StatusCode::ACCEPTED);
        ctx.flush().await.unwrap();
        ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        ctx.set_header("x-late", "1");
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
        assert!(ctx.response().headers().get("x-late").is_none());
    }

    #[tokio::test]
    async fn background_faults_stay_in_their_task() {
        async fn fails() -> Result<(), Fault> {
            Err(Fault::new("nope"))
        }
        async fn panics() -> Result<(), Fault> {
            panic!("background boom")
        }

        let ctx = Context::new(request("/"));
        let failing = ctx.spawn(fails());
        let panicking = ctx.spawn(panics());
        // Both handles resolve normally: the failures were caught and logged.
        failing.await.unwrap();
        panicking.await.unwrap();
    }
}
