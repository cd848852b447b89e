mod outbound;

pub(crate) use outbound::{AbortHandle, OutboundRequest};
