//! Connection filtering
//!
//! This module turns the textual filtering policy into the runtime lookup
//! structure the proxy engine queries per connection:
//!
//! - [`macros`]: named token lists (`Define $name ...`) expanded inside rule
//!   texts,
//! - [`rule`]: the one-line rule parser producing [`rule::FilterRule`]
//!   records,
//! - [`compile`]: the compiler folding all rules of an options container
//!   into the layered [`compile::Filter`] and the connection-time lookup.

pub mod compile;
pub mod macros;
pub mod rule;

pub use compile::{compile, ConnQuery, Filter, MergedAction};
pub use macros::MacroTable;
pub use rule::{rules_str, Channel, FilterAction, FilterRule, LogSpec, RuleOutcome};
