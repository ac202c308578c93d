//! The response sink: where handlers write, and where commit happens.
//!
//! A response is *uncommitted* until its head (status + headers) is handed to
//! the host. Until then everything is buffered and can be rewritten, which is
//! what lets the recovery point replace a half-built response with a 500.
//! The first [`flush`](ResponseSink::flush) commits: the head goes out, the
//! buffered body follows as a chunk, and from then on status and headers are
//! frozen. Later changes fail with [`WriteAfterCommit`].
//!
//! ```text
//!   handler task                         host (App::serve)
//!   ─────────────                        ─────────────────
//!   write / set_status   (buffered)
//!   flush ──── head ───── oneshot ─────▶ PendingResponse::wait → http::Response
//!         ──── chunk ──── mpsc(bounded) ▶ response body stream
//!   finish ─── rest, then drop senders ▶ body ends
//! ```

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::body::Body;
use crate::error::{BoxError, Fault, WriteAfterCommit};

/// Status line and headers, sent once at commit.
#[derive(Debug)]
pub(crate) struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

enum Outlet {
    /// No host attached; flushed bytes stay in the buffer. Used by pooled
    /// contexts between requests and by [`Context::new`](crate::Context::new).
    Detached,
    Channel {
        head: Option<oneshot::Sender<Head>>,
        body: Option<mpsc::Sender<Bytes>>,
    },
}

/// The per-request response writer owned by a [`Context`](crate::Context).
pub struct ResponseSink {
    status: StatusCode,
    headers: HeaderMap,
    buffer: BytesMut,
    committed: bool,
    violation_logged: bool,
    outlet: Outlet,
}

/// The host's end of a [`ResponseSink`] created by [`channel`].
pub(crate) struct PendingResponse {
    head: oneshot::Receiver<Head>,
    body: mpsc::Receiver<Bytes>,
}

/// A sink wired to the host, with at most `capacity` unsent chunks in flight.
pub(crate) fn channel(capacity: usize) -> (ResponseSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(capacity.max(1));
    let sink = ResponseSink {
        outlet: Outlet::Channel { head: Some(head_tx), body: Some(body_tx) },
        ..ResponseSink::detached()
    };
    (sink, PendingResponse { head: head_rx, body: body_rx })
}

impl ResponseSink {
    pub(crate) fn detached() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            buffer: BytesMut::new(),
            committed: false,
            violation_logged: false,
            outlet: Outlet::Detached,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Bytes written but not yet flushed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn set_status(&mut self, status: StatusCode) -> Result<(), WriteAfterCommit> {
        if self.committed {
            return Err(WriteAfterCommit { what: "status" });
        }
        self.status = status;
        Ok(())
    }

    /// Replaces any existing values for `name`.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriteAfterCommit> {
        if self.committed {
            return Err(WriteAfterCommit { what: "header" });
        }
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), WriteAfterCommit> {
        if self.committed {
            return Err(WriteAfterCommit { what: "header" });
        }
        self.headers.append(name, value);
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Logs a suppressed write-after-commit, once per response.
    pub(crate) fn report(&mut self, err: WriteAfterCommit) {
        if !self.violation_logged {
            self.violation_logged = true;
            warn!(status = self.status.as_u16(), "{err}");
        }
    }

    /// Drops whatever was built so far. Only possible before commit; returns
    /// whether the response could be reset.
    pub(crate) fn discard(&mut self) -> bool {
        if self.committed {
            return false;
        }
        self.status = StatusCode::OK;
        self.headers.clear();
        self.buffer.clear();
        true
    }

    /// Commits the head if needed and sends the buffered body.
    ///
    /// Fails with a cancellation fault when the host side is gone.
    pub async fn flush(&mut self) -> Result<(), Fault> {
        self.commit()?;
        let Outlet::Channel { body: Some(tx), .. } = &self.outlet else {
            return Ok(());
        };
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        tx.send(chunk).await.map_err(|_| Fault::cancelled())
    }

    fn commit(&mut self) -> Result<(), Fault> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;
        if let Outlet::Channel { head, .. } = &mut self.outlet {
            if let Some(tx) = head.take() {
                let head = Head { status: self.status, headers: self.headers.clone() };
                tx.send(head).map_err(|_| Fault::cancelled())?;
            }
        }
        Ok(())
    }

    /// Sends everything that is left and closes the body stream.
    ///
    /// An unflushed response gets an exact `content-length`.
    pub(crate) async fn finish(&mut self) {
        if !self.committed && carries_body(self.status) && !self.headers.contains_key(CONTENT_LENGTH) {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(self.buffer.len()));
        }
        // The host may have gone away; nothing left to tell it.
        let _ = self.flush().await;
        if let Outlet::Channel { head, body } = &mut self.outlet {
            head.take();
            body.take();
        }
    }

    /// A sender clone whose `closed()` resolves once the host drops the
    /// response. Must be dropped before [`finish`](Self::finish) returns, or
    /// the body stream never ends.
    pub(crate) fn disconnect_signal(&self) -> Option<mpsc::Sender<Bytes>> {
        match &self.outlet {
            Outlet::Channel { body, .. } => body.clone(),
            Outlet::Detached => None,
        }
    }
}

fn carries_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

impl PendingResponse {
    /// Waits for the head. `None` means the sink was dropped uncommitted,
    /// which only happens when the request task died.
    pub(crate) async fn wait(self) -> Option<http::Response<Body>> {
        let head = self.head.await.ok()?;
        let frames = ReceiverStream::new(self.body).map(|chunk| Ok::<_, BoxError>(Frame::data(chunk)));
        let mut response = http::Response::new(StreamBody::new(frames).boxed());
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        Some(response)
    }
}
