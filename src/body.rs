//! Body type shared by requests and responses.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::BoxError;

/// A boxed byte stream. Requests arrive as one, responses leave as one.
///
/// Hosts convert their native body with
/// `body.map_err(Into::into).boxed()` from [`http_body_util::BodyExt`].
pub type Body = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// A complete, in-memory body.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}
