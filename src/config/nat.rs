//! NAT engine registry
//!
//! The platform NAT state-table adapters themselves live with the proxy
//! engine; the configuration subsystem only needs to know which engine
//! names are valid and which one is the default for listeners that do not
//! name an explicit target.

use once_cell::sync::Lazy;

static ENGINES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["netfilter", "tproxy"]);

/// Whether a NAT engine with this name is available
pub fn exists(name: &str) -> bool {
    ENGINES.iter().any(|e| *e == name)
}

/// The NAT engine used when a proxyspec gives neither a target address nor
/// an engine name
pub fn default_engine() -> &'static str {
    ENGINES[0]
}
