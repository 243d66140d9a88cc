//! Filter macro table
//!
//! Macros are parser-scope named token lists declared with
//! `Define $name value ...` and referenced from filter rule texts. A rule
//! referencing a macro expands into one concrete rule per macro value
//! (cartesian product across all referenced macros). Macros cannot refer to
//! other macros.

use std::fmt;

use log::debug;

use crate::config::error::{ConfigError, Result};

/// One named macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    pub values: Vec<String>,
}

/// Table of macros in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    macros: Vec<Macro>,
}

impl MacroTable {
    /// Parse a `Define` directive value of the form `$name value ...`
    ///
    /// Redefining a macro replaces the previous definition.
    pub fn define(&mut self, value: &str, line: u32) -> Result<()> {
        let mut tokens = value.split_whitespace();

        let name = match tokens.next() {
            Some(n) => n,
            None => {
                return Err(ConfigError::MissingValue {
                    name: "Define".to_string(),
                    line,
                })
            }
        };
        if !name.starts_with('$') || name.len() < 2 {
            return Err(ConfigError::semantic(
                format!("Macro name '{}' does not start with '$'", name),
                line,
            ));
        }
        if name[1..].contains('$') {
            return Err(ConfigError::semantic(
                format!("Invalid macro name '{}'", name),
                line,
            ));
        }

        let values: Vec<String> = tokens.map(str::to_string).collect();
        if values.is_empty() {
            return Err(ConfigError::semantic(
                format!("Macro '{}' requires at least one value", name),
                line,
            ));
        }
        if values.iter().any(|v| v.starts_with('$')) {
            return Err(ConfigError::semantic(
                format!("Macro '{}' refers to another macro", name),
                line,
            ));
        }

        debug!("Macro {}: {}", name, values.join(" "));

        self.macros.retain(|m| m.name != name);
        self.macros.push(Macro {
            name: name.to_string(),
            values,
        });
        Ok(())
    }

    /// Look up a macro by its `$name`
    pub fn lookup(&self, name: &str) -> Option<&[String]> {
        self.macros
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.values.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.iter()
    }
}

impl fmt::Display for MacroTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.macros.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "macro {}: name={}, value={}", i, m.name, m.values.join("|"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_lookup() {
        let mut t = MacroTable::default();
        t.define("$ips 192.168.0.1 192.168.0.2", 0).unwrap();

        assert_eq!(
            t.lookup("$ips").unwrap(),
            &["192.168.0.1".to_string(), "192.168.0.2".to_string()][..]
        );
        assert!(t.lookup("$other").is_none());
    }

    #[test]
    fn test_redefine_replaces() {
        let mut t = MacroTable::default();
        t.define("$m a b", 0).unwrap();
        t.define("$m c", 0).unwrap();

        assert_eq!(t.lookup("$m").unwrap(), &["c".to_string()][..]);
    }

    #[test]
    fn test_bad_definitions() {
        let mut t = MacroTable::default();
        assert!(t.define("noname a b", 1).is_err());
        assert!(t.define("$", 1).is_err());
        assert!(t.define("$empty", 1).is_err());
        // no recursion
        assert!(t.define("$m $other", 1).is_err());
    }
}
