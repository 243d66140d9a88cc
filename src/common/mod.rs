//! Common utilities shared across the crate
//!
//! Contains the error type, logging setup, and network address helpers.

pub mod error;
pub mod log;
pub mod net;

pub use error::{ProxyError, Result};
pub use log::init_logger;
pub use net::{get_af, parse_sockaddr, AddrFamily};
