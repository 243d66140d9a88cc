//! Proxy listener specifications
//!
//! A proxyspec binds a listening endpoint to a protocol family and a target
//! resolution policy: an explicit target address, a NAT engine, or an
//! SNI-derived DNS lookup. Specs come in two textual forms, the one-line
//! form
//!
//! ```text
//! <proto> <listen-addr> <listen-port>
//!     [up:<port> [ua:<addr>] [ra:<addr>]]
//!     [<natengine>|<target-addr> <target-port>|sni <port>]
//! ```
//!
//! recognized by a small state machine, and the block form
//! (`ProxySpec { ... }`) setting the same fields one per line.
//!
//! Every spec clones the global options at the moment it is declared.

use std::fmt;
use std::net::SocketAddr;

use log::debug;

use crate::common::net::{get_af, parse_sockaddr, AddrFamily};
use crate::common::{ProxyError, Result as CommonResult};
use crate::config::error::{ConfigError, Result};
use crate::config::nat;
use crate::config::opts::{Opts, TmpGlobalOpts};

const PROTO_KEYWORDS: [&str; 9] = [
    "tcp", "ssl", "http", "https", "autossl", "pop3", "pop3s", "smtp", "smtps",
];

/// One listening endpoint and its address destinations
#[derive(Debug, Clone)]
pub struct ProxySpec {
    pub ssl: bool,
    pub http: bool,
    pub upgrade: bool,
    pub pop3: bool,
    pub smtp: bool,

    pub listen_addr: Option<SocketAddr>,
    pub listen_af: AddrFamily,
    /// Upstream divert address (where diverted connections are sent)
    pub divert_addr: Option<SocketAddr>,
    /// Return address the diverted stream comes back from
    pub return_addr: Option<SocketAddr>,
    /// Explicit target address, mutually exclusive with the NAT engine
    pub target_addr: Option<SocketAddr>,
    /// Destination port for SNI-derived DNS targets
    pub sni_port: Option<u16>,
    /// Target resolution requires DNS
    pub dns: bool,
    pub natengine: Option<String>,

    pub opts: Opts,
}

impl ProxySpec {
    /// Create a spec holding a clone of the current global options
    pub fn new(global_opts: &Opts, tmp: &TmpGlobalOpts) -> CommonResult<Self> {
        Ok(ProxySpec {
            ssl: false,
            http: false,
            upgrade: false,
            pop3: false,
            smtp: false,
            listen_addr: None,
            listen_af: AddrFamily::Unspec,
            divert_addr: None,
            return_addr: None,
            target_addr: None,
            sni_port: None,
            dns: false,
            natengine: None,
            opts: Opts::clone_for_listener(global_opts, tmp)?,
        })
    }

    /// Set the protocol family flags from a protocol keyword
    pub fn set_proto(&mut self, value: &str) -> CommonResult<()> {
        self.ssl = false;
        self.http = false;
        self.upgrade = false;
        self.pop3 = false;
        self.smtp = false;
        match value {
            "tcp" => {}
            "ssl" => self.ssl = true,
            "http" => self.http = true,
            "https" => {
                self.ssl = true;
                self.http = true;
            }
            "autossl" => self.upgrade = true,
            "pop3" => self.pop3 = true,
            "pop3s" => {
                self.ssl = true;
                self.pop3 = true;
            }
            "smtp" => self.smtp = true,
            "smtps" => {
                self.ssl = true;
                self.smtp = true;
            }
            _ => {
                return Err(ProxyError::Config(format!(
                    "Unknown connection type '{}'",
                    value
                )))
            }
        }
        debug!("Proto: {}", value);
        Ok(())
    }

    /// Parse and store the listen address; the default NAT engine applies
    /// until an explicit target or engine replaces it
    pub fn set_listen_addr(
        &mut self,
        addr: &str,
        port: &str,
        natengine: &str,
    ) -> CommonResult<AddrFamily> {
        let (sa, af) = parse_sockaddr(addr, port, get_af(addr))?;
        self.listen_addr = Some(sa);
        self.listen_af = af;
        self.natengine = Some(natengine.to_string());
        debug!("Addr: [{}]:{}, {}", addr, port, natengine);
        Ok(af)
    }

    pub fn set_divert_addr(&mut self, addr: &str, port: &str) -> CommonResult<()> {
        let (sa, _) = parse_sockaddr(addr, port, AddrFamily::Inet)?;
        self.divert_addr = Some(sa);
        debug!("DivertAddr: [{}]:{}", addr, port);
        Ok(())
    }

    pub fn set_return_addr(&mut self, addr: &str) -> CommonResult<()> {
        let (sa, _) = parse_sockaddr(addr, "0", AddrFamily::Inet)?;
        self.return_addr = Some(sa);
        debug!("ReturnAddr: [{}]", addr);
        Ok(())
    }

    /// Explicit target address; clears any NAT engine
    pub fn set_target_addr(&mut self, addr: &str, port: &str, af: AddrFamily) -> CommonResult<()> {
        let (sa, _) = parse_sockaddr(addr, port, af)?;
        self.target_addr = Some(sa);
        self.natengine = None;
        debug!("TargetAddr: [{}]:{}", addr, port);
        Ok(())
    }

    /// SNI-derived target port; only valid for ssl/https listeners
    pub fn set_sni_port(&mut self, port: &str) -> CommonResult<()> {
        if !self.ssl {
            return Err(ProxyError::Config(
                "SNI hostname lookup only works for ssl and https proxyspecs".to_string(),
            ));
        }
        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ProxyError::Config(format!("Invalid port '{}'", port)))?;
        self.sni_port = Some(port);
        self.dns = true;
        self.natengine = None;
        debug!("SNIPort: {}", port);
        Ok(())
    }

    pub fn set_natengine(&mut self, name: &str) -> CommonResult<()> {
        if !nat::exists(name) {
            return Err(ProxyError::Config(format!("No such nat engine '{}'", name)));
        }
        self.natengine = Some(name.to_string());
        debug!("NatEngine: {}", name);
        Ok(())
    }

    /// Resolve the effective divert mode
    ///
    /// Global split mode wins over everything; without a divert address the
    /// listener cannot divert either; otherwise the listener's own Divert
    /// setting stands.
    pub fn set_divert_mode(&mut self, split: bool) {
        if split || self.divert_addr.is_none() {
            self.opts.divert = false;
            debug!("Divert: no");
        }
    }
}

impl fmt::Display for ProxySpec {
    /// Text representation of the spec for display to the user
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lh, lp) = match self.listen_addr {
            Some(sa) => (sa.ip().to_string(), sa.port().to_string()),
            None => ("?".to_string(), "?".to_string()),
        };
        write!(
            f,
            "listen=[{}]:{} {}{}{}{}{}",
            lh,
            lp,
            if self.ssl { "ssl" } else { "tcp" },
            if self.upgrade { "|autossl" } else { "" },
            if self.http { "|http" } else { "" },
            if self.pop3 { "|pop3" } else { "" },
            if self.smtp { "|smtp" } else { "" },
        )?;

        if let Some(natengine) = &self.natengine {
            write!(f, " {}", natengine)?;
        } else if let Some(sa) = self.target_addr {
            write!(f, " \nconnect= [{}]:{}", sa.ip(), sa.port())?;
        } else if let Some(port) = self.sni_port {
            write!(f, " \nsni {}", port)?;
        }
        if let Some(sa) = self.divert_addr {
            write!(f, "\nparent dst addr= [{}]:{}", sa.ip(), sa.port())?;
        }
        if let Some(sa) = self.return_addr {
            write!(f, "\nchild src addr= [{}]:{}", sa.ip(), sa.port())?;
        }
        write!(f, "\n{}", self.opts)?;
        if !self.opts.divert && self.divert_addr.is_some() {
            write!(f, "\nWARNING: Divert address specified in split mode")?;
        }
        Ok(())
    }
}

/// States of the one-line proxyspec recognizer
enum SpecState {
    /// Expecting a protocol keyword, which opens a new spec
    Proto,
    /// Expecting the listen address
    Addr,
    /// Expecting the listen port
    Port { addr: String },
    /// One-token window where `up:<port>` may appear
    Divert,
    /// Expecting a NAT engine, target address, `sni`, or the next proto
    Target,
    /// Expecting the explicit target port
    TargetPort { addr: String },
    /// Expecting the SNI destination port
    Sni,
}

/// Parse one-line proxyspec tokens, appending the new specs to `specs`
///
/// Several specs may be declared in sequence; a protocol keyword in target
/// position closes the current spec and opens the next. Newly created specs
/// are prepended, mirroring the declaration-order-reversed listener list.
pub fn parse_proxyspec_tokens(
    tokens: &[&str],
    natengine: &str,
    global_opts: &Opts,
    specs: &mut Vec<ProxySpec>,
    tmp: &TmpGlobalOpts,
    line: u32,
) -> Result<()> {
    let mut state = SpecState::Proto;
    let mut created = 0usize;
    let mut i = 0;

    let err = |msg: String| ConfigError::semantic(msg, line);

    while i < tokens.len() {
        let token = tokens[i];
        match state {
            SpecState::Proto => {
                let mut spec =
                    ProxySpec::new(global_opts, tmp).map_err(|e| err(e.to_string()))?;
                spec.set_proto(token).map_err(|e| err(e.to_string()))?;
                specs.insert(0, spec);
                created += 1;
                state = SpecState::Addr;
                i += 1;
            }
            SpecState::Addr => {
                state = SpecState::Port {
                    addr: token.to_string(),
                };
                i += 1;
            }
            SpecState::Port { addr } => {
                specs[0]
                    .set_listen_addr(&addr, token, natengine)
                    .map_err(|e| err(e.to_string()))?;
                state = SpecState::Divert;
                i += 1;
            }
            SpecState::Divert => {
                if let Some(divert_port) = token.strip_prefix("up:") {
                    let mut divert_addr = "127.0.0.1";
                    let mut return_addr = "127.0.0.1";
                    // ua: and ra: are optional; ua: comes first if both given
                    if let Some(ua) = tokens.get(i + 1).and_then(|t| t.strip_prefix("ua:")) {
                        divert_addr = ua;
                        i += 1;
                    }
                    if let Some(ra) = tokens.get(i + 1).and_then(|t| t.strip_prefix("ra:")) {
                        return_addr = ra;
                        i += 1;
                    }
                    specs[0]
                        .set_divert_addr(divert_addr, divert_port)
                        .map_err(|e| err(e.to_string()))?;
                    specs[0]
                        .set_return_addr(return_addr)
                        .map_err(|e| err(e.to_string()))?;
                    state = SpecState::Target;
                    i += 1;
                } else {
                    // No divert part; reclassify this token as a target
                    state = SpecState::Target;
                }
            }
            SpecState::Target => {
                if PROTO_KEYWORDS.contains(&token) {
                    // implicit default natengine; token opens the next spec
                    state = SpecState::Proto;
                } else if token == "sni" {
                    state = SpecState::Sni;
                    i += 1;
                } else if nat::exists(token) {
                    specs[0]
                        .set_natengine(token)
                        .map_err(|e| err(e.to_string()))?;
                    state = SpecState::Proto;
                    i += 1;
                } else {
                    state = SpecState::TargetPort {
                        addr: token.to_string(),
                    };
                    i += 1;
                }
            }
            SpecState::TargetPort { addr } => {
                let af = specs[0].listen_af;
                specs[0]
                    .set_target_addr(&addr, token, af)
                    .map_err(|e| err(e.to_string()))?;
                state = SpecState::Proto;
                i += 1;
            }
            SpecState::Sni => {
                specs[0]
                    .set_sni_port(token)
                    .map_err(|e| err(e.to_string()))?;
                state = SpecState::Proto;
                i += 1;
            }
        }
    }

    match state {
        SpecState::Proto | SpecState::Divert | SpecState::Target => {}
        _ => return Err(err("Incomplete proxyspec!".to_string())),
    }

    // An empty line creates no spec
    for spec in specs.iter_mut().take(created) {
        spec.set_divert_mode(tmp.split);
    }
    Ok(())
}

/// Address strings collected while parsing a structured proxyspec
///
/// `Addr` must precede `Port` and `TargetAddr` must precede `TargetPort`;
/// the strings are held here until their port arrives.
#[derive(Debug, Default)]
pub struct SpecAddrs {
    pub af: AddrFamily,
    pub addr: Option<String>,
    pub divert_addr: Option<String>,
    pub target_addr: Option<String>,
}

/// Outcome of one structured-proxyspec line
#[derive(Debug, PartialEq, Eq)]
pub enum SpecOption {
    Continue,
    /// The closing brace was consumed and the spec is complete
    CloseBrace,
}

/// Dispatch one line inside a `ProxySpec { ... }` block
pub fn set_spec_option(
    spec: &mut ProxySpec,
    name: &str,
    value: &str,
    natengine: &mut String,
    addrs: &mut SpecAddrs,
    line: u32,
) -> Result<SpecOption> {
    // The closing brace is the only option without a value
    if value.is_empty() && name != "}" {
        return Err(ConfigError::MissingValue {
            name: name.to_string(),
            line,
        });
    }

    match name {
        "Proto" => {
            spec.set_proto(value)
                .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
        }
        "Addr" => addrs.addr = Some(value.to_string()),
        "Port" => match &addrs.addr {
            Some(addr) => {
                addrs.af = spec
                    .set_listen_addr(addr, value, natengine)
                    .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
            }
            None => {
                return Err(ConfigError::semantic("ProxySpec Port without Addr", line));
            }
        },
        "DivertAddr" => addrs.divert_addr = Some(value.to_string()),
        "DivertPort" => {
            let addr = addrs.divert_addr.as_deref().unwrap_or("127.0.0.1");
            spec.set_divert_addr(addr, value)
                .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
        }
        "ReturnAddr" => {
            spec.set_return_addr(value)
                .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
        }
        "TargetAddr" => addrs.target_addr = Some(value.to_string()),
        "TargetPort" => match &addrs.target_addr {
            Some(addr) => {
                spec.set_target_addr(addr, value, addrs.af)
                    .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
            }
            None => {
                return Err(ConfigError::semantic(
                    "ProxySpec TargetPort without TargetAddr",
                    line,
                ));
            }
        },
        "SNIPort" => {
            spec.set_sni_port(value)
                .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
        }
        "NatEngine" => {
            spec.set_natengine(value)
                .map_err(|e| ConfigError::semantic(e.to_string(), line))?;
        }
        "}" => {
            debug!("ProxySpec }} on line {}", line);
            if addrs.addr.is_none() || addrs.af == AddrFamily::Unspec {
                return Err(ConfigError::semantic("Incomplete ProxySpec", line));
            }
            return Ok(SpecOption::CloseBrace);
        }
        _ => {
            spec.opts.set_option(name, value, line, natengine, None)?;
        }
    }
    Ok(SpecOption::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(line: &str) -> Result<Vec<ProxySpec>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut specs = Vec::new();
        let opts = Opts::default();
        let tmp = TmpGlobalOpts::default();
        parse_proxyspec_tokens(&tokens, "netfilter", &opts, &mut specs, &tmp, 1)?;
        Ok(specs)
    }

    #[test]
    fn test_one_line_divert_spec() {
        let specs = parse_line("https 127.0.0.1 8443 up:8080").unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert!(spec.ssl && spec.http);
        assert_eq!(spec.listen_addr.unwrap().port(), 8443);
        assert_eq!(spec.divert_addr.unwrap().port(), 8080);
        assert_eq!(
            spec.return_addr.unwrap().ip().to_string(),
            "127.0.0.1"
        );
        // divert address present, divert mode stays on
        assert!(spec.opts.divert);
    }

    #[test]
    fn test_one_line_divert_addrs() {
        let specs = parse_line("https 127.0.0.1 8443 up:8080 ua:127.0.0.2 ra:127.0.0.3").unwrap();
        let spec = &specs[0];
        assert_eq!(spec.divert_addr.unwrap().ip().to_string(), "127.0.0.2");
        assert_eq!(spec.return_addr.unwrap().ip().to_string(), "127.0.0.3");
    }

    #[test]
    fn test_explicit_target() {
        let specs = parse_line("ssl 127.0.0.1 8443 10.0.0.1 443").unwrap();
        let spec = &specs[0];
        assert_eq!(spec.target_addr.unwrap().to_string(), "10.0.0.1:443");
        // explicit target clears the natengine
        assert!(spec.natengine.is_none());
        // no divert address forces split mode
        assert!(!spec.opts.divert);
    }

    #[test]
    fn test_sni_requires_ssl() {
        assert!(parse_line("tcp 127.0.0.1 8080 sni 443").is_err());

        let specs = parse_line("ssl 127.0.0.1 8443 sni 443").unwrap();
        assert_eq!(specs[0].sni_port, Some(443));
        assert!(specs[0].dns);
    }

    #[test]
    fn test_multiple_specs_per_line() {
        let specs = parse_line("https 127.0.0.1 8443 up:8080 http 127.0.0.1 8080 up:8080").unwrap();
        assert_eq!(specs.len(), 2);
        // prepend order: the last declared spec is first
        assert!(specs[0].http && !specs[0].ssl);
        assert!(specs[1].http && specs[1].ssl);
    }

    #[test]
    fn test_incomplete_spec() {
        assert!(parse_line("ssl 127.0.0.1").is_err());
    }

    #[test]
    fn test_natengine_target() {
        let specs = parse_line("http 127.0.0.1 8080 tproxy").unwrap();
        assert_eq!(specs[0].natengine.as_deref(), Some("tproxy"));
    }
}
