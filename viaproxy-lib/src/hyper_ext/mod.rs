mod body;
mod body_type;
mod rewind;

pub(crate) use body::BodySender;
pub use body::ResponseBody;
pub(crate) use body_type::boxed;
#[cfg(test)]
pub(crate) use body_type::empty;
pub use body_type::{BoxError, RequestBody};
pub use rewind::Rewind;
