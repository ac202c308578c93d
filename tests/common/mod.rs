#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::Method;
use http_body_util::BodyExt;
use strata::{Body, Middleware, Stage, Strategy, body};

pub const STRATEGIES: [Strategy; 2] = [Strategy::Wrapping, Strategy::Cursor];

/// Shared, append-only record of what ran.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// A wrap-shaped middleware logging `enter(name)` and `exit(name)`.
pub fn wrap_tracer(name: &'static str, log: &Log) -> Middleware {
    let log = log.clone();
    Middleware::wrap(move |next: Stage| {
        let log = log.clone();
        Stage::new(move |ctx| {
            let (log, next) = (log.clone(), next.clone());
            Box::pin(async move {
                log.push(format!("enter({name})"));
                let outcome = next.call(ctx).await;
                log.push(format!("exit({name})"));
                outcome
            })
        })
    })
}

/// A step-shaped middleware logging `enter(name)` and `exit(name)`.
pub fn step_tracer(name: &'static str, log: &Log) -> Middleware {
    let log = log.clone();
    Middleware::step(move |ctx| {
        let log = log.clone();
        Box::pin(async move {
            log.push(format!("enter({name})"));
            let outcome = ctx.next().await;
            log.push(format!("exit({name})"));
            outcome
        })
    })
}

pub fn request(method: Method, uri: &str) -> http::Request<Body> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(body::empty())
        .unwrap()
}

pub fn get(uri: &str) -> http::Request<Body> {
    request(Method::GET, uri)
}

pub async fn read_body(response: http::Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn read_text(response: http::Response<Body>) -> String {
    String::from_utf8(read_body(response).await.to_vec()).unwrap()
}
