mod common;

use http::StatusCode;
use strata::{Context, Outcome, Response, RouteId, Router, Strategy};

use common::{Log, STRATEGIES, get, read_text, step_tracer, wrap_tracer};

fn handler(log: &Log) -> impl for<'a> Fn(&'a mut Context) -> strata::BoxFuture<'a, Response> + Send + Sync + 'static {
    let log = log.clone();
    move |_ctx| {
        let log = log.clone();
        Box::pin(async move {
            log.push("h");
            Response::text("done")
        })
    }
}

/// global → /api group → /api/v1 group → route middleware → handler.
fn layered(strategy: Strategy, log: &Log) -> (strata::App, RouteId) {
    let mut router = Router::new().with_strategy(strategy);
    let id = {
        let mut api = router.group("/api");
        let mut v1 = api.group("/v1");
        let id = v1
            .route(http::Method::GET, "/items/:id")
            .with(step_tracer("route", log))
            .to(handler(log))
            .unwrap();
        // Scope middleware registered after the route still applies to it.
        v1.use_middleware(wrap_tracer("v1", log));
        id
    };
    router.group("/api").use_middleware(step_tracer("unrelated", log));
    router.use_middleware(wrap_tracer("global", log));
    let app = router.build();
    (app, id)
}

#[tokio::test]
async fn outer_scopes_run_fully_outside_inner_ones() {
    for strategy in STRATEGIES {
        let log = Log::default();
        let (app, _) = layered(strategy, &log);

        let response = app.serve(get("/api/v1/items/7")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_text(response).await, "done");
        assert_eq!(
            log.take(),
            ["enter(global)", "enter(v1)", "enter(route)", "h", "exit(route)", "exit(v1)", "exit(global)"],
            "{strategy:?}"
        );
    }
}

#[tokio::test]
async fn sibling_scopes_do_not_leak_into_each_other() {
    let log = Log::default();
    let mut router = Router::new();
    {
        let mut admin = router.group("/admin");
        admin.use_middleware(step_tracer("admin", &log));
        admin.get("/stats", handler(&log)).unwrap();
    }
    {
        let mut public = router.group("/public");
        public.use_middleware(step_tracer("public", &log));
        public.get("/stats", handler(&log)).unwrap();
    }
    let app = router.build();

    app.serve(get("/public/stats")).await;
    assert_eq!(log.take(), ["enter(public)", "h", "exit(public)"]);
}

#[tokio::test]
async fn cached_and_fresh_pipelines_trace_identically() {
    for strategy in STRATEGIES {
        let log = Log::default();
        let (app, id) = layered(strategy, &log);

        let cached = app.pipeline(id).unwrap();
        let fresh = app.compose(id).unwrap();
        assert_eq!(cached.len(), fresh.len());

        let mut ctx = Context::new(get("/api/v1/items/7"));
        assert!(cached.run(&mut ctx).await.is_continued());
        let first = log.take();

        let mut ctx = Context::new(get("/api/v1/items/7"));
        assert!(fresh.run(&mut ctx).await.is_continued());
        assert_eq!(first, log.take());
        assert_eq!(ctx.response().buffered(), b"done");
    }
}

#[tokio::test]
async fn a_short_circuit_skips_everything_further_in() {
    for strategy in STRATEGIES {
        let log = Log::default();
        let mut router = Router::new().with_strategy(strategy);
        router.use_middleware(wrap_tracer("outer", &log));
        router.step({
            let log = log.clone();
            move |ctx| {
                let log = log.clone();
                Box::pin(async move {
                    log.push("enter(auth)");
                    if ctx.header("authorization").is_none() {
                        ctx.set_status(StatusCode::UNAUTHORIZED);
                        ctx.write("who are you?");
                        log.push("exit(auth)");
                        return Outcome::ShortCircuited;
                    }
                    let outcome = ctx.next().await;
                    log.push("exit(auth)");
                    outcome
                })
            }
        });
        router.use_middleware(wrap_tracer("inner", &log));
        router.get("/secret", handler(&log)).unwrap();
        let app = router.build();

        let response = app.serve(get("/secret")).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_text(response).await, "who are you?");
        assert_eq!(log.take(), ["enter(outer)", "enter(auth)", "exit(auth)", "exit(outer)"], "{strategy:?}");
    }
}

#[tokio::test]
async fn aborting_then_continuing_still_stops_downstream() {
    for strategy in STRATEGIES {
        let log = Log::default();
        let mut router = Router::new().with_strategy(strategy);
        router.use_middleware(step_tracer("outer", &log));
        router.step(|ctx| {
            Box::pin(async move {
                ctx.set_status(StatusCode::FORBIDDEN);
                ctx.write("stop here");
                ctx.abort();
                ctx.next().await
            })
        });
        router.use_middleware(wrap_tracer("inner", &log));
        router.get("/", handler(&log)).unwrap();
        let app = router.build();

        let response = app.serve(get("/")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(read_text(response).await, "stop here");
        assert_eq!(log.take(), ["enter(outer)", "exit(outer)"], "{strategy:?}");
    }
}

#[tokio::test]
async fn writing_then_continuing_appends() {
    for strategy in STRATEGIES {
        let mut router = Router::new().with_strategy(strategy);
        router.step(|ctx| {
            Box::pin(async move {
                ctx.write("header;");
                ctx.next().await
            })
        });
        router.get("/", |ctx| Box::pin(async move { ctx.write("body") })).unwrap();
        let app = router.build();

        let response = app.serve(get("/")).await;
        assert_eq!(read_text(response).await, "header;body");
    }
}
