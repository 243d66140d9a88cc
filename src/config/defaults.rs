//! Default configuration values
//!
//! This module centralizes the default values applied when a fresh options
//! container or global state is constructed. Every listener inherits a copy
//! of whatever the global options hold at the moment the listener is
//! declared, so these values only matter until the configuration overrides
//! them.

use crate::config::opts::SslProto;

/// Divert mode is the default operation mode
pub const DIVERT: bool = true;

/// SSL/TLS compression is enabled unless turned off
pub const SSL_COMPRESSION: bool = true;

/// Strip the HTTP Referer header by default
pub const REMOVE_HTTP_REFERER: bool = true;

/// Verify upstream peer certificates by default
pub const VERIFY_PEER: bool = true;

/// User authentication idle timeout in seconds
pub const USER_TIMEOUT: u32 = 300;

/// Maximum accepted HTTP request header size in bytes
pub const MAX_HTTP_HEADER_SIZE: u32 = 8192;

/// Lowest protocol offered during auto-negotiation
pub const MIN_SSL_PROTO: SslProto = SslProto::Tls10;

/// Highest protocol offered during auto-negotiation
pub const MAX_SSL_PROTO: SslProto = SslProto::Tls13;

/// RSA key size for forged leaf certificates
pub const LEAFKEY_RSABITS: u32 = 2048;

/// Seconds a connection may stay idle before it is expired
pub const CONN_IDLE_TIMEOUT: u32 = 120;

/// Seconds between expired-connection sweeps
pub const EXPIRED_CONN_CHECK_PERIOD: u32 = 10;

/// Seconds between statistics log lines
pub const STATS_PERIOD: u32 = 1;

/// Upper bound on user list entries per directive
pub const MAX_USERS: usize = 50;

/// Default log level for the binary
pub const LOG_LEVEL: &str = "info";
