//! CRUD-style JSON endpoints, a scoped admin area and health checks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl -X POST http://localhost:3000/api/users -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/api/users/42
//!   curl -H 'authorization: secret' http://localhost:3000/api/admin/stats
//!   curl http://localhost:3000/static/css/site.css
//!   curl http://localhost:3000/healthz

use http::StatusCode;
use strata::{BoxFuture, Config, Context, Fault, Outcome, Response, Router, Server, health, middleware};

#[tokio::main]
async fn main() -> Result<(), strata::Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let server = Server::from_config(&config)?;

    let mut router = Router::with_config(config);
    router.use_middleware(middleware::trace());
    router.use_middleware(middleware::request_id());
    router.get("/healthz", health::liveness)?;
    router.get("/readyz", health::readiness)?;
    router.get("/static/*path", serve_static)?;

    {
        let mut api = router.group("/api");
        api.get("/users/:id", get_user)?;
        api.post("/users", create_user)?;
        api.delete("/users/:id", delete_user)?;

        let mut admin = api.group("/admin");
        admin.step(|ctx| {
            Box::pin(async move {
                if ctx.header("authorization") != Some("secret") {
                    ctx.respond(Response::status(StatusCode::UNAUTHORIZED));
                    return Outcome::ShortCircuited;
                }
                ctx.next().await
            })
        });
        admin.get("/stats", stats)?;
    }

    server.serve(router.build()).await
}

// GET /api/users/:id
fn get_user(ctx: &mut Context) -> BoxFuture<'_, Response> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or("unknown");
        Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
    })
}

// POST /api/users
fn create_user(ctx: &mut Context) -> BoxFuture<'_, Result<Response, Fault>> {
    Box::pin(async move {
        let body = ctx.body_bytes().await?;
        if body.is_empty() {
            return Ok(Response::status(StatusCode::BAD_REQUEST));
        }
        Ok(Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/api/users/99")
            .json(r#"{"id":"99","name":"new_user"}"#.as_bytes().to_vec()))
    })
}

// DELETE /api/users/:id → 204 No Content
fn delete_user(_ctx: &mut Context) -> BoxFuture<'_, StatusCode> {
    Box::pin(async { StatusCode::NO_CONTENT })
}

// GET /api/admin/stats, streamed in two chunks.
fn stats(ctx: &mut Context) -> BoxFuture<'_, Result<(), Fault>> {
    Box::pin(async move {
        ctx.set_header("content-type", "text/plain; charset=utf-8");
        ctx.write("requests: 1\n");
        ctx.flush().await?;
        ctx.write("errors: 0\n");
        Ok(())
    })
}

// GET /static/*path
fn serve_static(ctx: &mut Context) -> BoxFuture<'_, String> {
    Box::pin(async move { format!("would serve {}", ctx.param("path").unwrap_or_default()) })
}
