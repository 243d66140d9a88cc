//! Intercept Proxy: transparent SSL/TLS interception policy engine
//!
//! This library implements the configuration, proxy-specification and
//! filtering-rule subsystem of a transparent interception proxy for TLS/SSL
//! and several clear-text protocols (HTTP, POP3, SMTP). It parses the
//! textual policy, expands filter macros into concrete rules, and compiles
//! the rules into the layered lookup filter the connection engine queries
//! per connection. The engine itself (event loop, TLS termination,
//! certificate forging, protocol rewriting) consumes the structures built
//! here.
//!
//! # Example
//!
//! ```no_run
//! use intercept_proxy::config::{Global, TmpGlobalOpts};
//! use intercept_proxy::Result;
//!
//! fn main() -> Result<()> {
//!     let mut global = Global::new();
//!     let mut natengine = intercept_proxy::config::nat::default_engine().to_string();
//!     let mut tmp = TmpGlobalOpts::default();
//!
//!     global.load_conffile("intercept.conf", &mut natengine, &mut tmp)?;
//!     global.finalize();
//!
//!     for spec in &global.specs {
//!         println!("{}", spec);
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod filter;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use common::{init_logger, ProxyError, Result};
pub use config::{Global, Opts, ProxySpec};
pub use filter::{Filter, FilterRule};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
