pub const LISTEN_ADDRESSES_V4: &[&str] = &["0.0.0.0"];
pub const LISTEN_ADDRESSES_V6: &[&str] = &["[::]"];
pub const TCP_LISTEN_BACKLOG: u32 = 1024;
pub const MAX_CLIENTS: usize = 512;

/// Largest request head inspected before handing the connection to the http server
pub const SNIFF_MAX_HEAD_SIZE: usize = 16 * 1024;
/// Max number of headers parsed while sniffing for an upgrade
pub const SNIFF_MAX_HEADERS: usize = 100;
