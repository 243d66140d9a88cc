//! Logging utilities
//!
//! Thin wrapper around `env_logger` so the binary and tests initialize the
//! log system the same way.

/// Initialize the logger
///
/// `level` is used as the default filter unless `RUST_LOG` is set.
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    let _ = env_logger::Builder::from_env(env).try_init();
}
