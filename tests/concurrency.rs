mod common;

use std::collections::HashSet;

use strata::{Config, Response, Router, Strategy};

use common::{STRATEGIES, get, read_text};

#[derive(Clone)]
struct Token(String);

fn app(strategy: Strategy) -> strata::App {
    // A pool much smaller than the number of requests in flight, so contexts
    // are recycled while others are still busy.
    let config = Config { strategy, pool_capacity: 2, ..Config::default() };
    let mut router = Router::with_config(config);
    router.step(|ctx| {
        Box::pin(async move {
            assert!(ctx.extensions().get::<Token>().is_none(), "extension leaked from a previous request");
            let token = ctx.param("token").unwrap_or_default().to_owned();
            ctx.extensions_mut().insert(Token(token));
            tokio::task::yield_now().await;
            ctx.next().await
        })
    });
    router
        .get("/echo/:token", |ctx| {
            Box::pin(async move {
                tokio::task::yield_now().await;
                let stored = ctx.extensions().get::<Token>().map(|t| t.0.clone()).unwrap_or_default();
                let param = ctx.param("token").unwrap_or_default();
                assert_eq!(ctx.params().len(), 1);
                Response::text(format!("{stored}|{param}"))
            })
        })
        .unwrap();
    router.build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_see_each_other() {
    for strategy in STRATEGIES {
        let app = app(strategy);

        let requests = (0..256).map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let token = format!("t{i}");
                let response = app.serve(get(&format!("/echo/{token}"))).await;
                (token, read_text(response).await)
            })
        });
        let results = futures_util::future::join_all(requests).await;

        let mut seen = HashSet::new();
        for result in results {
            let (token, body) = result.unwrap();
            assert_eq!(body, format!("{token}|{token}"), "{strategy:?}");
            assert!(seen.insert(token));
        }
        assert_eq!(seen.len(), 256);
        assert!(app.pool().idle() <= 2);
    }
}
