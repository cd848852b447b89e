/// Port used when the target port is not given
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;
/// Max number of inert handler instances kept per handler kind
pub const HANDLER_POOL_CAPACITY: usize = 1024;
/// Initial capacity of the scratch buffer for the `101 Switching Protocols` head
pub const UPGRADE_HEAD_BUF_SIZE: usize = 512;

/// Max bytes read ahead from an upgrade client while the upstream handshake is pending
pub const CLIENT_READ_AHEAD_LIMIT: usize = 64 * 1024;

/// Value of the upgrade protocol accepted at the upgrade entry point
pub const WEBSOCKET: &str = "websocket";

/// Logging event name
pub mod log_event_names {
  /// access log
  pub const ACCESS_LOG: &str = "viaproxy::access";
}
