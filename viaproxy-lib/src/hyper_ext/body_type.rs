use http_body_util::{combinators::UnsyncBoxBody, BodyExt};
use hyper::body::{Body, Bytes};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased request body forwarded to the upstream
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// helper function to erase the inbound body type
pub(crate) fn boxed<B>(body: B) -> RequestBody
where
  B: Body<Data = Bytes> + Send + 'static,
  B::Error: Into<BoxError>,
{
  body.map_err(Into::into).boxed_unsync()
}

#[cfg(test)]
/// helper function to build a empty body
pub(crate) fn empty() -> RequestBody {
  http_body_util::Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}
