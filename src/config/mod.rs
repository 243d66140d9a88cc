//! Configuration module
//!
//! This module turns the textual policy (command line plus hierarchical
//! configuration file) into the runtime data structures the proxy engine
//! queries per connection:
//!
//! - [`opts::Opts`]: the per-scope options container (global, listener,
//!   filter rule),
//! - [`global::Global`]: the process-wide state owning the top-level
//!   options and the listener list,
//! - [`spec::ProxySpec`]: one listener declaration,
//! - [`parser`]: the line tokenizer, file loader and global dispatcher,
//! - [`nat`]: the NAT engine name registry.
//!
//! Parsing is single-threaded; the resulting structures are frozen after
//! [`global::Global::finalize`] and may be shared across threads.

pub mod defaults;
pub mod error;
pub mod global;
pub mod nat;
pub mod opts;
pub mod parser;
pub mod spec;

pub use error::ConfigError;
pub use global::Global;
pub use opts::{Opts, SslProto, TmpGlobalOpts};
pub use parser::{get_name_value, load_conffile, set_cmdline_option};
pub use spec::ProxySpec;
