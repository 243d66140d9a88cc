//! Options container
//!
//! [`Opts`] aggregates the tunable policy of one scope. The global state
//! owns the primary instance; every listener clones the global options at
//! the moment it is declared, so later global mutations never leak into
//! existing listeners. Certificate and key handles are shared between
//! clones by reference counting, everything else is copied.
//!
//! Each configuration directive routes to exactly one setter; the
//! dispatcher in [`Opts::set_option`] is the single source of truth for
//! directive names at this scope.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;

use crate::common::{ProxyError, Result as CommonResult};
use crate::config::defaults;
use crate::config::error::{ConfigError, Result};
use crate::filter::compile::Filter;
use crate::filter::macros::MacroTable;
use crate::filter::rule::FilterRule;
use crate::tls::cert::{self, CertHandle, DhHandle, KeyHandle};

/// SSL/TLS protocol versions accepted by the version directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SslProto {
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl FromStr for SslProto {
    type Err = ProxyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ssl3" => Ok(SslProto::Ssl3),
            "tls10" | "tls1" => Ok(SslProto::Tls10),
            "tls11" => Ok(SslProto::Tls11),
            "tls12" => Ok(SslProto::Tls12),
            "tls13" => Ok(SslProto::Tls13),
            // ssl2 is long gone from OpenSSL
            _ => Err(ProxyError::Config(format!(
                "Unsupported SSL/TLS protocol '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for SslProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SslProto::Ssl3 => "ssl3",
            SslProto::Tls10 => "tls10",
            SslProto::Tls11 => "tls11",
            SslProto::Tls12 => "tls12",
            SslProto::Tls13 => "tls13",
        };
        f.write_str(s)
    }
}

/// String forms of certificate material seen at global scope
///
/// Kept only while parsing the top level, so the PKI inputs can be
/// re-applied when cloning the global options into a listener. Also carries
/// the two parser-wide flags that do not belong to any scope.
#[derive(Debug, Clone, Default)]
pub struct TmpGlobalOpts {
    pub cacrt_str: Option<String>,
    pub cakey_str: Option<String>,
    pub chain_str: Option<String>,
    pub clientcrt_str: Option<String>,
    pub clientkey_str: Option<String>,
    pub leafcrlurl_str: Option<String>,
    pub dh_str: Option<String>,
    /// Global split mode (command line `-n`)
    pub split: bool,
    /// Set while parsing an include file; Include may not nest
    pub include: bool,
}

/// The tunable policy of one scope
#[derive(Clone)]
pub struct Opts {
    pub divert: bool,
    pub sslcomp: bool,

    pub no_ssl3: bool,
    pub no_tls10: bool,
    pub no_tls11: bool,
    pub no_tls12: bool,
    pub no_tls13: bool,

    pub passthrough: bool,
    pub deny_ocsp: bool,

    pub force_sslversion: Option<SslProto>,
    pub min_sslversion: Option<SslProto>,
    pub max_sslversion: Option<SslProto>,

    pub ciphers: Option<String>,
    pub ciphersuites: Option<String>,
    pub ecdhcurve: Option<String>,
    pub leafcrlurl: Option<String>,

    pub cacrt: Option<CertHandle>,
    pub cakey: Option<KeyHandle>,
    pub clientcrt: Option<CertHandle>,
    pub clientkey: Option<KeyHandle>,
    pub chain: Vec<CertHandle>,
    pub dh: Option<DhHandle>,

    pub remove_http_accept_encoding: bool,
    pub remove_http_referer: bool,
    pub verify_peer: bool,
    pub allow_wrong_host: bool,

    pub user_auth: bool,
    pub user_auth_url: Option<String>,
    pub user_timeout: u32,
    pub divert_users: Vec<String>,
    pub pass_users: Vec<String>,

    pub validate_proto: bool,
    pub max_http_header_size: u32,

    pub macros: MacroTable,
    pub filter_rules: Vec<FilterRule>,
    pub filter: Option<Filter>,
}

impl Default for Opts {
    fn default() -> Self {
        Opts {
            divert: defaults::DIVERT,
            sslcomp: defaults::SSL_COMPRESSION,
            no_ssl3: false,
            no_tls10: false,
            no_tls11: false,
            no_tls12: false,
            no_tls13: false,
            passthrough: false,
            deny_ocsp: false,
            force_sslversion: None,
            min_sslversion: Some(defaults::MIN_SSL_PROTO),
            max_sslversion: Some(defaults::MAX_SSL_PROTO),
            ciphers: None,
            ciphersuites: None,
            ecdhcurve: None,
            leafcrlurl: None,
            cacrt: None,
            cakey: None,
            clientcrt: None,
            clientkey: None,
            chain: Vec::new(),
            dh: None,
            remove_http_accept_encoding: false,
            remove_http_referer: defaults::REMOVE_HTTP_REFERER,
            verify_peer: defaults::VERIFY_PEER,
            allow_wrong_host: false,
            user_auth: false,
            user_auth_url: None,
            user_timeout: defaults::USER_TIMEOUT,
            divert_users: Vec::new(),
            pass_users: Vec::new(),
            validate_proto: false,
            max_http_header_size: defaults::MAX_HTTP_HEADER_SIZE,
            macros: MacroTable::default(),
            filter_rules: Vec::new(),
            filter: None,
        }
    }
}

fn is_yesno(value: &str) -> Option<bool> {
    match value {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

pub(crate) fn check_value_yesno(value: &str, name: &str, line: u32) -> Result<bool> {
    is_yesno(value).ok_or_else(|| ConfigError::invalid(name, value, "yes|no", line))
}

pub(crate) fn parse_range(name: &str, value: &str, min: u32, max: u32, line: u32) -> Result<u32> {
    let expected = format!("{}-{}", min, max);
    let n: u32 = value
        .parse()
        .map_err(|_| ConfigError::invalid(name, value, &expected, line))?;
    if n < min || n > max {
        return Err(ConfigError::invalid(name, value, &expected, line));
    }
    Ok(n)
}

impl Opts {
    // --- Certificate material ---

    pub fn set_cacrt(&mut self, value: &str, tmp: Option<&mut TmpGlobalOpts>) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.cacrt_str = Some(value.to_string());
        }
        let path = Path::new(value);
        let crt = Arc::new(cert::load_x509(path)?);
        self.cacrt = Some(crt.clone());
        self.chain.insert(0, crt);
        if self.cakey.is_none() {
            self.cakey = cert::try_load_key(path).map(Arc::new);
        }
        if self.dh.is_none() {
            self.dh = cert::try_load_dh(path).map(Arc::new);
        }
        debug!("CACert: {}", value);
        Ok(())
    }

    pub fn set_cakey(&mut self, value: &str, tmp: Option<&mut TmpGlobalOpts>) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.cakey_str = Some(value.to_string());
        }
        let path = Path::new(value);
        self.cakey = Some(Arc::new(cert::load_key(path)?));
        if self.cacrt.is_none() {
            if let Ok(crt) = cert::load_x509(path) {
                let crt = Arc::new(crt);
                self.cacrt = Some(crt.clone());
                self.chain.insert(0, crt);
            }
        }
        if self.dh.is_none() {
            self.dh = cert::try_load_dh(path).map(Arc::new);
        }
        debug!("CAKey: {}", value);
        Ok(())
    }

    pub fn set_chain(&mut self, value: &str, tmp: Option<&mut TmpGlobalOpts>) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.chain_str = Some(value.to_string());
        }
        let chain = cert::load_chain(Path::new(value))?;
        self.chain.extend(chain.into_iter().map(Arc::new));
        debug!("CAChain: {}", value);
        Ok(())
    }

    pub fn set_clientcrt(
        &mut self,
        value: &str,
        tmp: Option<&mut TmpGlobalOpts>,
    ) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.clientcrt_str = Some(value.to_string());
        }
        self.clientcrt = Some(Arc::new(cert::load_x509(Path::new(value))?));
        debug!("ClientCert: {}", value);
        Ok(())
    }

    pub fn set_clientkey(
        &mut self,
        value: &str,
        tmp: Option<&mut TmpGlobalOpts>,
    ) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.clientkey_str = Some(value.to_string());
        }
        self.clientkey = Some(Arc::new(cert::load_key(Path::new(value))?));
        debug!("ClientKey: {}", value);
        Ok(())
    }

    pub fn set_dh(&mut self, value: &str, tmp: Option<&mut TmpGlobalOpts>) -> CommonResult<()> {
        if let Some(tmp) = tmp {
            tmp.dh_str = Some(value.to_string());
        }
        self.dh = Some(Arc::new(cert::load_dh(Path::new(value))?));
        debug!("DHGroupParams: {}", value);
        Ok(())
    }

    pub fn set_leafcrlurl(&mut self, value: &str, tmp: Option<&mut TmpGlobalOpts>) {
        if let Some(tmp) = tmp {
            tmp.leafcrlurl_str = Some(value.to_string());
        }
        self.leafcrlurl = Some(value.to_string());
        debug!("LeafCRLURL: {}", value);
    }

    pub fn set_ecdhcurve(&mut self, value: &str) -> CommonResult<()> {
        cert::check_curve(value)?;
        self.ecdhcurve = Some(value.to_string());
        debug!("ECDHCurve: {}", value);
        Ok(())
    }

    pub fn set_ciphers(&mut self, value: &str) {
        self.ciphers = Some(value.to_string());
        debug!("Ciphers: {}", value);
    }

    pub fn set_ciphersuites(&mut self, value: &str) {
        self.ciphersuites = Some(value.to_string());
        debug!("CipherSuites: {}", value);
    }

    // --- Protocol versions ---

    pub fn force_proto(&mut self, value: &str) -> CommonResult<()> {
        if self.force_sslversion.is_some() {
            return Err(ProxyError::Config(
                "Cannot use ForceSSLProto multiple times".to_string(),
            ));
        }
        self.force_sslversion = Some(value.parse()?);
        debug!("ForceSSLProto: {}", value);
        Ok(())
    }

    fn proto_flag(&mut self, proto: SslProto) -> &mut bool {
        match proto {
            SslProto::Ssl3 => &mut self.no_ssl3,
            SslProto::Tls10 => &mut self.no_tls10,
            SslProto::Tls11 => &mut self.no_tls11,
            SslProto::Tls12 => &mut self.no_tls12,
            SslProto::Tls13 => &mut self.no_tls13,
        }
    }

    pub fn disable_proto(&mut self, value: &str) -> CommonResult<()> {
        let proto: SslProto = value.parse()?;
        *self.proto_flag(proto) = true;
        debug!("DisableSSLProto: {}", value);
        Ok(())
    }

    pub fn enable_proto(&mut self, value: &str) -> CommonResult<()> {
        let proto: SslProto = value.parse()?;
        *self.proto_flag(proto) = false;
        debug!("EnableSSLProto: {}", value);
        Ok(())
    }

    pub fn set_min_proto(&mut self, value: &str) -> CommonResult<()> {
        self.min_sslversion = Some(value.parse()?);
        debug!("MinSSLProto: {}", value);
        Ok(())
    }

    pub fn set_max_proto(&mut self, value: &str) -> CommonResult<()> {
        self.max_sslversion = Some(value.parse()?);
        debug!("MaxSSLProto: {}", value);
        Ok(())
    }

    // --- User lists ---

    /// Parse a comma/space/tab separated user list, capped at
    /// [`defaults::MAX_USERS`] entries. A configured list replaces any list
    /// inherited from the global scope.
    fn set_userlist(value: &str, line: u32, list: &mut Vec<String>, name: &str) -> Result<()> {
        let users: Vec<String> = value
            .split([',', ' ', '\t'])
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if users.len() > defaults::MAX_USERS {
            return Err(ConfigError::semantic(
                format!(
                    "Too many arguments in user list, max users allowed {}",
                    defaults::MAX_USERS
                ),
                line,
            ));
        }
        if users.is_empty() {
            return Err(ConfigError::semantic(
                format!("{} requires at least one parameter", name),
                line,
            ));
        }
        *list = users;
        Ok(())
    }

    /// Dispatch one directive at options scope
    ///
    /// `natengine` is the parser-wide default NAT engine, which the
    /// `NATEngine` directive replaces. `tmp` is present only while the
    /// top-level scope is parsed. Note the `Divert` ambiguity: a yes/no
    /// value toggles the divert mode, anything else is a one-line Divert
    /// filter rule.
    pub fn set_option(
        &mut self,
        name: &str,
        value: &str,
        line: u32,
        natengine: &mut String,
        mut tmp: Option<&mut TmpGlobalOpts>,
    ) -> Result<()> {
        if value.is_empty() {
            return Err(ConfigError::MissingValue {
                name: name.to_string(),
                line,
            });
        }

        match name {
            "CACert" => self.set_cacrt(value, tmp.as_deref_mut())?,
            "CAKey" => self.set_cakey(value, tmp.as_deref_mut())?,
            "ClientCert" => self.set_clientcrt(value, tmp.as_deref_mut())?,
            "ClientKey" => self.set_clientkey(value, tmp.as_deref_mut())?,
            "CAChain" => self.set_chain(value, tmp.as_deref_mut())?,
            "LeafCRLURL" => self.set_leafcrlurl(value, tmp.as_deref_mut()),
            "DenyOCSP" => {
                self.deny_ocsp = check_value_yesno(value, "DenyOCSP", line)?;
                debug!("DenyOCSP: {}", self.deny_ocsp);
            }
            "Passthrough" => {
                self.passthrough = check_value_yesno(value, "Passthrough", line)?;
                debug!("Passthrough: {}", self.passthrough);
            }
            "DHGroupParams" => self.set_dh(value, tmp.as_deref_mut())?,
            "ECDHCurve" => self.set_ecdhcurve(value)?,
            "SSLCompression" => {
                self.sslcomp = check_value_yesno(value, "SSLCompression", line)?;
                debug!("SSLCompression: {}", self.sslcomp);
            }
            "ForceSSLProto" => self.force_proto(value)?,
            "DisableSSLProto" => self.disable_proto(value)?,
            "EnableSSLProto" => self.enable_proto(value)?,
            "MinSSLProto" => self.set_min_proto(value)?,
            "MaxSSLProto" => self.set_max_proto(value)?,
            "Ciphers" => self.set_ciphers(value),
            "CipherSuites" => self.set_ciphersuites(value),
            "NATEngine" => {
                if !crate::config::nat::exists(value) {
                    return Err(ConfigError::semantic(
                        format!("No such nat engine '{}'", value),
                        line,
                    ));
                }
                *natengine = value.to_string();
                debug!("NATEngine: {}", natengine);
            }
            "UserAuth" => {
                self.user_auth = check_value_yesno(value, "UserAuth", line)?;
                debug!("UserAuth: {}", self.user_auth);
            }
            "UserAuthURL" => {
                self.user_auth_url = Some(value.to_string());
                debug!("UserAuthURL: {}", value);
            }
            "UserTimeout" => {
                self.user_timeout = parse_range("UserTimeout", value, 0, 86400, line)?;
                debug!("UserTimeout: {}", self.user_timeout);
            }
            "DivertUsers" => {
                Self::set_userlist(value, line, &mut self.divert_users, "DivertUsers")?
            }
            "PassUsers" => Self::set_userlist(value, line, &mut self.pass_users, "PassUsers")?,
            "ValidateProto" => {
                self.validate_proto = check_value_yesno(value, "ValidateProto", line)?;
                debug!("ValidateProto: {}", self.validate_proto);
            }
            "MaxHTTPHeaderSize" => {
                self.max_http_header_size =
                    parse_range("MaxHTTPHeaderSize", value, 1024, 65536, line)?;
                debug!("MaxHTTPHeaderSize: {}", self.max_http_header_size);
            }
            "VerifyPeer" => {
                self.verify_peer = check_value_yesno(value, "VerifyPeer", line)?;
                debug!("VerifyPeer: {}", self.verify_peer);
            }
            "AllowWrongHost" => {
                self.allow_wrong_host = check_value_yesno(value, "AllowWrongHost", line)?;
                debug!("AllowWrongHost: {}", self.allow_wrong_host);
            }
            "RemoveHTTPAcceptEncoding" => {
                self.remove_http_accept_encoding =
                    check_value_yesno(value, "RemoveHTTPAcceptEncoding", line)?;
                debug!(
                    "RemoveHTTPAcceptEncoding: {}",
                    self.remove_http_accept_encoding
                );
            }
            "RemoveHTTPReferer" => {
                self.remove_http_referer = check_value_yesno(value, "RemoveHTTPReferer", line)?;
                debug!("RemoveHTTPReferer: {}", self.remove_http_referer);
            }
            "PassSite" => self.set_passsite(value, line)?,
            "Define" => self.set_macro(value, line)?,
            "Split" | "Pass" | "Block" | "Match" => {
                self.set_filter_rule(name, value, line)?;
            }
            "Divert" => match is_yesno(value) {
                Some(on) => {
                    self.divert = on;
                    debug!("Divert: {}", if on { "yes" } else { "no" });
                }
                // Any other value makes this a one-line Divert rule
                None => {
                    self.set_filter_rule(name, value, line)?;
                }
            },
            _ => {
                return Err(ConfigError::UnknownOption {
                    name: name.to_string(),
                    line,
                })
            }
        }
        Ok(())
    }

    /// Clone the global options for a newly declared listener
    ///
    /// Scalars and strings are copied, user lists and the macro table and
    /// rule list are deep-copied, and certificate material is re-applied
    /// from the string forms kept in `tmp` so the clone holds its own
    /// handles.
    pub fn clone_for_listener(global_opts: &Opts, tmp: &TmpGlobalOpts) -> CommonResult<Opts> {
        debug!("Copy global opts");

        let mut opts = Opts {
            divert: global_opts.divert,
            sslcomp: global_opts.sslcomp,
            no_ssl3: global_opts.no_ssl3,
            no_tls10: global_opts.no_tls10,
            no_tls11: global_opts.no_tls11,
            no_tls12: global_opts.no_tls12,
            no_tls13: global_opts.no_tls13,
            passthrough: global_opts.passthrough,
            deny_ocsp: global_opts.deny_ocsp,
            force_sslversion: global_opts.force_sslversion,
            min_sslversion: global_opts.min_sslversion,
            max_sslversion: global_opts.max_sslversion,
            remove_http_accept_encoding: global_opts.remove_http_accept_encoding,
            remove_http_referer: global_opts.remove_http_referer,
            verify_peer: global_opts.verify_peer,
            allow_wrong_host: global_opts.allow_wrong_host,
            user_auth: global_opts.user_auth,
            user_timeout: global_opts.user_timeout,
            validate_proto: global_opts.validate_proto,
            max_http_header_size: global_opts.max_http_header_size,
            ..Opts::default()
        };

        if let Some(s) = &tmp.chain_str {
            opts.set_chain(s, None)?;
        }
        if let Some(s) = &tmp.leafcrlurl_str {
            opts.set_leafcrlurl(s, None);
        }
        if let Some(s) = &tmp.cacrt_str {
            opts.set_cacrt(s, None)?;
        }
        if let Some(s) = &tmp.cakey_str {
            opts.set_cakey(s, None)?;
        }
        if let Some(s) = &tmp.clientcrt_str {
            opts.set_clientcrt(s, None)?;
        }
        if let Some(s) = &tmp.clientkey_str {
            opts.set_clientkey(s, None)?;
        }
        if let Some(s) = &tmp.dh_str {
            opts.set_dh(s, None)?;
        }

        if let Some(curve) = &global_opts.ecdhcurve {
            opts.set_ecdhcurve(curve)?;
        }
        opts.ciphers = global_opts.ciphers.clone();
        opts.ciphersuites = global_opts.ciphersuites.clone();
        opts.user_auth_url = global_opts.user_auth_url.clone();
        opts.divert_users = global_opts.divert_users.clone();
        opts.pass_users = global_opts.pass_users.clone();

        opts.macros = global_opts.macros.clone();
        opts.filter_rules = global_opts.filter_rules.clone();

        Ok(opts)
    }

    /// Compile the accumulated rule list into the lookup filter
    pub fn compile_filter(&mut self) {
        self.filter = Some(crate::filter::compile(&self.filter_rules));
    }

    /// One-line dump of the SSL/TLS protocol configuration
    pub fn proto_dump(&self) -> String {
        let mut s = String::from("SSL/TLS protocol: ");
        match self.force_sslversion {
            Some(v) => s.push_str(&v.to_string()),
            None => s.push_str("negotiate"),
        }
        for (flag, name) in [
            (self.no_ssl3, " -ssl3"),
            (self.no_tls10, " -tls10"),
            (self.no_tls11, " -tls11"),
            (self.no_tls12, " -tls12"),
            (self.no_tls13, " -tls13"),
        ] {
            if flag {
                s.push_str(name);
            }
        }
        if let Some(v) = self.min_sslversion {
            s.push_str(&format!(">={}", v));
        }
        if let Some(v) = self.max_sslversion {
            s.push_str(&format!("<={}", v));
        }
        s
    }
}

impl fmt::Display for Opts {
    /// Textual dump used by the listener dump and the diagnostics output
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opts={}{}{}{}{}{}{}{}{}|{}|{}|{}|{}{}{}{}{}{}|{}|{}|{}|{}{}|{}\n{}",
            if self.divert { "divert" } else { "split" },
            if !self.sslcomp { "|no sslcomp" } else { "" },
            if self.no_ssl3 { "|no_ssl3" } else { "" },
            if self.no_tls10 { "|no_tls10" } else { "" },
            if self.no_tls11 { "|no_tls11" } else { "" },
            if self.no_tls12 { "|no_tls12" } else { "" },
            if self.no_tls13 { "|no_tls13" } else { "" },
            if self.passthrough { "|passthrough" } else { "" },
            if self.deny_ocsp { "|deny_ocsp" } else { "" },
            self.ciphers.as_deref().unwrap_or("no ciphers"),
            self.ciphersuites.as_deref().unwrap_or("no ciphersuites"),
            self.ecdhcurve.as_deref().unwrap_or("no ecdhcurve"),
            self.leafcrlurl.as_deref().unwrap_or("no leafcrlurl"),
            if self.remove_http_accept_encoding {
                "|remove_http_accept_encoding"
            } else {
                ""
            },
            if self.remove_http_referer {
                "|remove_http_referer"
            } else {
                ""
            },
            if self.verify_peer { "|verify_peer" } else { "" },
            if self.allow_wrong_host {
                "|allow_wrong_host"
            } else {
                ""
            },
            if self.user_auth { "|user_auth" } else { "" },
            self.user_auth_url.as_deref().unwrap_or("no user_auth_url"),
            self.user_timeout,
            self.divert_users.join(","),
            self.pass_users.join(","),
            if self.validate_proto {
                "|validate_proto"
            } else {
                ""
            },
            self.max_http_header_size,
            self.proto_dump()
        )?;

        if !self.macros.is_empty() {
            write!(f, "\n{}", self.macros)?;
        }
        if !self.filter_rules.is_empty() {
            write!(f, "\n{}", crate::filter::rules_str(&self.filter_rules))?;
        }
        if let Some(filter) = &self.filter {
            if !filter.is_empty() {
                write!(f, "\n{}", filter)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Opts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn natengine() -> String {
        crate::config::nat::default_engine().to_string()
    }

    #[test]
    fn test_defaults() {
        let opts = Opts::default();
        assert!(opts.divert);
        assert!(opts.sslcomp);
        assert!(opts.remove_http_referer);
        assert!(opts.verify_peer);
        assert_eq!(opts.user_timeout, 300);
        assert_eq!(opts.max_http_header_size, 8192);
        assert_eq!(opts.min_sslversion, Some(SslProto::Tls10));
        assert_eq!(opts.max_sslversion, Some(SslProto::Tls13));
    }

    #[test]
    fn test_yesno_options() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        opts.set_option("DenyOCSP", "yes", 1, &mut ne, None).unwrap();
        assert!(opts.deny_ocsp);
        opts.set_option("DenyOCSP", "no", 2, &mut ne, None).unwrap();
        assert!(!opts.deny_ocsp);
        assert!(opts.set_option("DenyOCSP", "maybe", 3, &mut ne, None).is_err());
    }

    #[test]
    fn test_numeric_ranges() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        opts.set_option("UserTimeout", "1200", 1, &mut ne, None)
            .unwrap();
        assert_eq!(opts.user_timeout, 1200);
        assert!(opts
            .set_option("UserTimeout", "86401", 2, &mut ne, None)
            .is_err());
        assert!(opts
            .set_option("MaxHTTPHeaderSize", "1023", 3, &mut ne, None)
            .is_err());
        assert!(opts
            .set_option("MaxHTTPHeaderSize", "65537", 4, &mut ne, None)
            .is_err());
    }

    #[test]
    fn test_proto_directives() {
        let mut opts = Opts::default();
        opts.disable_proto("tls10").unwrap();
        assert!(opts.no_tls10);
        opts.enable_proto("tls10").unwrap();
        assert!(!opts.no_tls10);

        opts.force_proto("tls12").unwrap();
        assert_eq!(opts.force_sslversion, Some(SslProto::Tls12));
        // forcing twice is rejected
        assert!(opts.force_proto("tls13").is_err());
        assert!(opts.disable_proto("ssl2").is_err());
    }

    #[test]
    fn test_divert_disambiguation() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        opts.set_option("Divert", "no", 1, &mut ne, None).unwrap();
        assert!(!opts.divert);
        assert!(opts.filter_rules.is_empty());

        // a non-yes/no value becomes a filter rule
        opts.set_option("Divert", "*", 2, &mut ne, None).unwrap();
        assert!(!opts.divert);
        assert_eq!(opts.filter_rules.len(), 1);
        assert!(opts.filter_rules[0].action.divert);
    }

    #[test]
    fn test_userlist_cap() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        opts.set_option("DivertUsers", "alice,bob charlie\tdave", 1, &mut ne, None)
            .unwrap();
        assert_eq!(opts.divert_users, ["alice", "bob", "charlie", "dave"]);

        let too_many = (0..51).map(|i| format!("u{}", i)).collect::<Vec<_>>().join(",");
        assert!(opts
            .set_option("DivertUsers", &too_many, 2, &mut ne, None)
            .is_err());
    }

    #[test]
    fn test_unknown_option() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        let err = opts.set_option("NoSuchOption", "x", 42, &mut ne, None);
        match err {
            Err(ConfigError::UnknownOption { line, .. }) => assert_eq!(line, 42),
            other => panic!("expected unknown option error, got {:?}", other),
        }
    }

    #[test]
    fn test_clone_equivalence() {
        let mut opts = Opts::default();
        let mut ne = natengine();
        opts.set_option("UserAuth", "yes", 1, &mut ne, None).unwrap();
        opts.set_option("Ciphers", "HIGH:-aNULL", 2, &mut ne, None)
            .unwrap();
        opts.set_option("Define", "$ips 10.0.0.1 10.0.0.2", 3, &mut ne, None)
            .unwrap();
        opts.set_option("Pass", "from ip $ips", 4, &mut ne, None)
            .unwrap();

        let cloned = opts.clone();
        assert_eq!(opts.to_string(), cloned.to_string());
    }
}
