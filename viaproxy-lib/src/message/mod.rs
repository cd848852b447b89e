mod canonical_address;
mod http_log;
mod utils_headers;

pub use canonical_address::ToCanonical;
pub(crate) use http_log::HttpMessageLog;
pub(crate) use utils_headers::{
  append_header_entry_with_comma, build_outbound_headers, is_websocket_upgrade, loop_detected, strip_hop_headers,
};
