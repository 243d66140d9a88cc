//! Filter rule parsing
//!
//! One-line rule grammar:
//!
//! ```text
//! (Divert|Split|Pass|Block|Match)
//!     [from (user U [desc D]|desc D|ip IP|*)]
//!     [to (ip S [port P]|sni S|cn S|host S|uri S|port P|*)]
//!     [log (connect|master|cert|content|pcap|mirror|!...|*|!*|$macro)+]
//!     [# comment]
//! ```
//!
//! Site, port, user and keyword tokens ending in `*` are stripped and become
//! substring matches; a bare `*` is the catch-all. A `$macro` reference in a
//! value slot expands into one rule per macro value; a rule referencing
//! several macros yields their cartesian product. Expansion is reported to
//! the caller so the dispatcher can distinguish it from a single parsed
//! rule.

use std::fmt;

use crate::config::error::{ConfigError, Result};
use crate::config::opts::Opts;
use crate::filter::macros::MacroTable;

/// Target channel a site predicate is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    DstIp,
    Sni,
    Cn,
    Host,
    Uri,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::DstIp,
        Channel::Sni,
        Channel::Cn,
        Channel::Host,
        Channel::Uri,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::DstIp => "dstip",
            Channel::Sni => "sni",
            Channel::Cn => "cn",
            Channel::Host => "host",
            Channel::Uri => "uri",
        }
    }
}

/// Set of channels a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyTo {
    pub dstip: bool,
    pub sni: bool,
    pub cn: bool,
    pub host: bool,
    pub uri: bool,
}

impl Default for ApplyTo {
    /// Without a `to` clause a rule applies to every channel
    fn default() -> Self {
        ApplyTo {
            dstip: true,
            sni: true,
            cn: true,
            host: true,
            uri: true,
        }
    }
}

impl ApplyTo {
    pub fn only(channel: Channel) -> Self {
        let mut a = ApplyTo {
            dstip: false,
            sni: false,
            cn: false,
            host: false,
            uri: false,
        };
        a.set(channel);
        a
    }

    pub fn set(&mut self, channel: Channel) {
        match channel {
            Channel::DstIp => self.dstip = true,
            Channel::Sni => self.sni = true,
            Channel::Cn => self.cn = true,
            Channel::Host => self.host = true,
            Channel::Uri => self.uri = true,
        }
    }

    pub fn has(&self, channel: Channel) -> bool {
        match channel {
            Channel::DstIp => self.dstip,
            Channel::Sni => self.sni,
            Channel::Cn => self.cn,
            Channel::Host => self.host,
            Channel::Uri => self.uri,
        }
    }
}

impl fmt::Display for ApplyTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            if self.dstip { "dstip" } else { "" },
            if self.sni { "sni" } else { "" },
            if self.cn { "cn" } else { "" },
            if self.host { "host" } else { "" },
            if self.uri { "uri" } else { "" }
        )
    }
}

/// Action bits plus the rule precedence
///
/// Precedence decides which of several matching leaves wins at connection
/// time; more specific rules carry higher values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterAction {
    pub divert: bool,
    pub split: bool,
    pub pass: bool,
    pub block: bool,
    pub match_: bool,
    pub precedence: u32,
}

impl FilterAction {
    fn from_name(name: &str) -> Option<Self> {
        let mut a = FilterAction::default();
        match name {
            "Divert" => a.divert = true,
            "Split" => a.split = true,
            "Pass" => a.pass = true,
            "Block" => a.block = true,
            "Match" => a.match_ = true,
            _ => return None,
        }
        Some(a)
    }

    /// Name of the (single) action bit a parsed rule carries
    pub fn name(&self) -> &'static str {
        if self.divert {
            "Divert"
        } else if self.split {
            "Split"
        } else if self.pass {
            "Pass"
        } else if self.block {
            "Block"
        } else {
            "Match"
        }
    }

    /// Format only the action bits, `divert|split|pass|block|match`
    pub fn mask_str(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            if self.divert { "divert" } else { "" },
            if self.split { "split" } else { "" },
            if self.pass { "pass" } else { "" },
            if self.block { "block" } else { "" },
            if self.match_ { "match" } else { "" }
        )
    }
}

/// Per-channel log settings, each channel unset, enabled or negated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogSpec {
    pub connect: Option<bool>,
    pub master: Option<bool>,
    pub cert: Option<bool>,
    pub content: Option<bool>,
    pub pcap: Option<bool>,
    pub mirror: Option<bool>,
}

impl LogSpec {
    const NAMES: [&'static str; 6] = ["connect", "master", "cert", "content", "pcap", "mirror"];

    fn slot(&mut self, name: &str) -> Option<&mut Option<bool>> {
        match name {
            "connect" => Some(&mut self.connect),
            "master" => Some(&mut self.master),
            "cert" => Some(&mut self.cert),
            "content" => Some(&mut self.content),
            "pcap" => Some(&mut self.pcap),
            "mirror" => Some(&mut self.mirror),
            _ => None,
        }
    }

    fn set_all(&mut self, on: bool) {
        self.connect = Some(on);
        self.master = Some(on);
        self.cert = Some(on);
        self.content = Some(on);
        self.pcap = Some(on);
        self.mirror = Some(on);
    }

    fn slots(&self) -> [Option<bool>; 6] {
        [
            self.connect,
            self.master,
            self.cert,
            self.content,
            self.pcap,
            self.mirror,
        ]
    }

    pub fn any(&self) -> bool {
        self.slots().iter().any(Option::is_some)
    }

    /// Overwrite every channel the other spec mentions
    pub fn merge_from(&mut self, other: &LogSpec) {
        for (name, setting) in Self::NAMES.iter().copied().zip(other.slots()) {
            if setting.is_some() {
                *self.slot(name).unwrap() = setting;
            }
        }
    }

    /// Tokens in directive syntax (`connect`, `!pcap`, ...)
    fn tokens(&self) -> Vec<String> {
        Self::NAMES
            .iter()
            .zip(self.slots())
            .filter_map(|(name, s)| {
                s.map(|on| if on { name.to_string() } else { format!("!{}", name) })
            })
            .collect()
    }
}

impl fmt::Display for LogSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Self::NAMES
            .iter()
            .zip(self.slots())
            .map(|(name, s)| match s {
                Some(true) => name.to_string(),
                Some(false) => format!("!{}", name),
                None => String::new(),
            })
            .collect();
        write!(f, "{}", parts.join("|"))
    }
}

/// One compiled-from-text filter rule
///
/// Empty predicate strings mean "not constrained"; the `all_*` flags record
/// the explicit catch-alls the rule text used, which decide the bucket the
/// compiler files the rule under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRule {
    pub site: String,
    pub port: String,
    pub ip: String,
    pub user: String,
    pub keyword: String,

    pub exact_site: bool,
    pub exact_port: bool,
    pub exact_ip: bool,
    pub exact_user: bool,
    pub exact_keyword: bool,

    pub all_conns: bool,
    pub all_users: bool,
    pub all_sites: bool,
    pub all_ports: bool,

    pub action: FilterAction,
    pub log: LogSpec,
    pub apply_to: ApplyTo,
}

impl FilterRule {
    fn format_line(&self, f: &mut fmt::Formatter<'_>, idx: usize) -> fmt::Result {
        write!(
            f,
            "filter rule {}: site={}, port={}, ip={}, user={}, keyword={}, \
             exact={}|{}|{}|{}|{}, all={}|{}|{}, action={}, log={}, apply to={}, precedence={}",
            idx,
            self.site,
            self.port,
            self.ip,
            self.user,
            self.keyword,
            if self.exact_site { "site" } else { "" },
            if self.exact_port { "port" } else { "" },
            if self.exact_ip { "ip" } else { "" },
            if self.exact_user { "user" } else { "" },
            if self.exact_keyword { "keyword" } else { "" },
            // all= slots: conns|users|sites|ports
            format!(
                "{}|{}",
                if self.all_conns { "conns" } else { "" },
                if self.all_users { "users" } else { "" }
            ),
            if self.all_sites { "sites" } else { "" },
            if self.all_ports { "ports" } else { "" },
            self.action.mask_str(),
            self.log,
            self.apply_to,
            self.action.precedence
        )
    }

    /// Render the rule back to one-line directive syntax
    ///
    /// The inverse of parsing for rules expressible in the one-line grammar
    /// (i.e. rules applying either to a single channel or to all five).
    pub fn to_rule_line(&self) -> String {
        let mut s = String::from(self.action.name());

        if !self.user.is_empty() {
            s.push_str(" from user ");
            s.push_str(&self.user);
            if !self.exact_user {
                s.push('*');
            }
        } else if self.all_users {
            s.push_str(" from user *");
        } else if !self.ip.is_empty() {
            s.push_str(" from ip ");
            s.push_str(&self.ip);
            if !self.exact_ip {
                s.push('*');
            }
        }
        if !self.keyword.is_empty() {
            if self.user.is_empty() && !self.all_users {
                s.push_str(" from desc ");
            } else {
                s.push_str(" desc ");
            }
            s.push_str(&self.keyword);
            if !self.exact_keyword {
                s.push('*');
            }
        }

        let single = Channel::ALL
            .iter()
            .filter(|c| self.apply_to.has(**c))
            .collect::<Vec<_>>();
        if single.len() == 1 {
            let chan = match single[0] {
                Channel::DstIp => "ip",
                c => c.name(),
            };
            s.push_str(" to ");
            s.push_str(chan);
            s.push(' ');
            if self.site.is_empty() {
                s.push('*');
            } else {
                s.push_str(&self.site);
                if !self.exact_site {
                    s.push('*');
                }
            }
            if self.all_ports || !self.port.is_empty() {
                s.push_str(" port ");
                if self.port.is_empty() {
                    s.push('*');
                } else {
                    s.push_str(&self.port);
                    if !self.exact_port {
                        s.push('*');
                    }
                }
            }
        }

        let log_tokens = self.log.tokens();
        if !log_tokens.is_empty() {
            s.push_str(" log ");
            s.push_str(&log_tokens.join(" "));
        }

        // A directive needs a value; the catch-all stands in for "no clause"
        if !s.contains(' ') {
            s.push_str(" *");
        }
        s
    }
}

/// Format a rule list the way the engine dumps it for diagnostics
pub fn rules_str(rules: &[FilterRule]) -> String {
    struct Lines<'a>(&'a [FilterRule]);
    impl fmt::Display for Lines<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for (i, r) in self.0.iter().enumerate() {
                if i > 0 {
                    writeln!(f)?;
                }
                r.format_line(f, i)?;
            }
            Ok(())
        }
    }
    Lines(rules).to_string()
}

/// Outcome of parsing one rule directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// One concrete rule was appended
    Set,
    /// The rule text referenced at least one macro and was expanded into
    /// multiple concrete rules
    Expanded,
}

fn missing(name: &str, line: u32) -> ConfigError {
    ConfigError::MissingValue {
        name: name.to_string(),
        line,
    }
}

/// Store a predicate token, stripping a trailing `*` into a substring flag
fn set_token(slot: &mut String, exact: &mut bool, token: &str) {
    if let Some(stripped) = token.strip_suffix('*') {
        *slot = stripped.to_string();
        *exact = false;
    } else {
        *slot = token.to_string();
        *exact = true;
    }
}

fn apply_log_token(log: &mut LogSpec, token: &str, line: u32) -> Result<()> {
    match token {
        "*" => {
            log.set_all(true);
            return Ok(());
        }
        "!*" => {
            log.set_all(false);
            return Ok(());
        }
        _ => {}
    }
    let (on, name) = match token.strip_prefix('!') {
        Some(rest) => (false, rest),
        None => (true, token),
    };
    match log.slot(name) {
        Some(slot) => {
            *slot = Some(on);
            Ok(())
        }
        None => Err(ConfigError::semantic(
            format!("Unknown log action '{}'", token),
            line,
        )),
    }
}

/// Recursive descent over the rule tokens
///
/// Returns true if a macro was expanded somewhere below; the expanded rules
/// land in `out` in macro value order, leftmost macro varying slowest.
fn parse_tokens(
    action: FilterAction,
    tokens: &[String],
    user_auth: bool,
    macros: &MacroTable,
    line: u32,
    out: &mut Vec<FilterRule>,
) -> Result<bool> {
    let mut rule = FilterRule {
        action,
        ..FilterRule::default()
    };

    let mut from_user_clause = false;
    let mut to_channel = false;
    let mut has_log = false;

    macro_rules! expand_at {
        ($idx:expr) => {{
            let name = tokens[$idx].as_str();
            let values = macros.lookup(name).ok_or_else(|| {
                ConfigError::semantic(format!("No such macro '{}'", name), line)
            })?;
            for value in values {
                let mut expanded = tokens.to_vec();
                expanded[$idx] = value.clone();
                parse_tokens(action, &expanded, user_auth, macros, line, out)?;
            }
            return Ok(true);
        }};
    }

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i].as_str() {
            "*" => {
                rule.all_conns = true;
                i += 1;
            }
            "from" => {
                i += 1;
                match tokens.get(i).map(String::as_str) {
                    Some("user") => {
                        if !user_auth {
                            return Err(ConfigError::semantic(
                                "User auth is disabled, cannot use user filter",
                                line,
                            ));
                        }
                        from_user_clause = true;
                        i += 1;
                        let v = tokens.get(i).ok_or_else(|| missing("user", line))?;
                        if v == "*" {
                            rule.all_users = true;
                        } else if v.starts_with('$') {
                            expand_at!(i);
                        } else {
                            set_token(&mut rule.user, &mut rule.exact_user, v);
                        }
                        i += 1;
                        if tokens.get(i).map(String::as_str) == Some("desc") {
                            i += 1;
                            let v = tokens.get(i).ok_or_else(|| missing("desc", line))?;
                            if v.starts_with('$') {
                                expand_at!(i);
                            }
                            set_token(&mut rule.keyword, &mut rule.exact_keyword, v);
                            i += 1;
                        }
                    }
                    Some("desc") => {
                        if !user_auth {
                            return Err(ConfigError::semantic(
                                "User auth is disabled, cannot use desc filter",
                                line,
                            ));
                        }
                        from_user_clause = true;
                        i += 1;
                        let v = tokens.get(i).ok_or_else(|| missing("desc", line))?;
                        if v.starts_with('$') {
                            expand_at!(i);
                        }
                        set_token(&mut rule.keyword, &mut rule.exact_keyword, v);
                        i += 1;
                    }
                    Some("ip") => {
                        i += 1;
                        let v = tokens.get(i).ok_or_else(|| missing("ip", line))?;
                        if v == "*" {
                            rule.all_conns = true;
                        } else if v.starts_with('$') {
                            expand_at!(i);
                        } else {
                            set_token(&mut rule.ip, &mut rule.exact_ip, v);
                        }
                        i += 1;
                    }
                    Some("*") => {
                        rule.all_conns = true;
                        i += 1;
                    }
                    Some(other) => {
                        return Err(ConfigError::semantic(
                            format!("Unknown from spec '{}'", other),
                            line,
                        ))
                    }
                    None => return Err(missing("from", line)),
                }
            }
            "to" => {
                i += 1;
                match tokens.get(i).map(String::as_str) {
                    Some(chan @ ("ip" | "sni" | "cn" | "host" | "uri")) => {
                        let channel = match chan {
                            "ip" => Channel::DstIp,
                            "sni" => Channel::Sni,
                            "cn" => Channel::Cn,
                            "host" => Channel::Host,
                            _ => Channel::Uri,
                        };
                        to_channel = true;
                        rule.apply_to = ApplyTo::only(channel);
                        i += 1;
                        let v = tokens.get(i).ok_or_else(|| missing(chan, line))?;
                        if v == "*" {
                            // all sites, substring sentinel
                        } else if v.starts_with('$') {
                            expand_at!(i);
                        } else {
                            set_token(&mut rule.site, &mut rule.exact_site, v);
                        }
                        i += 1;
                        if tokens.get(i).map(String::as_str) == Some("port") {
                            if channel != Channel::DstIp {
                                return Err(ConfigError::semantic(
                                    "Port filter can only be used with ip targets",
                                    line,
                                ));
                            }
                            i += 1;
                            let v = tokens.get(i).ok_or_else(|| missing("port", line))?;
                            if v == "*" {
                                rule.all_ports = true;
                            } else if v.starts_with('$') {
                                expand_at!(i);
                            } else {
                                set_token(&mut rule.port, &mut rule.exact_port, v);
                            }
                            i += 1;
                        }
                    }
                    Some("port") => {
                        // Port constraint without a site; applies to the
                        // destination-address channel only.
                        rule.apply_to = ApplyTo::only(Channel::DstIp);
                        i += 1;
                        let v = tokens.get(i).ok_or_else(|| missing("port", line))?;
                        if v == "*" {
                            rule.all_ports = true;
                        } else if v.starts_with('$') {
                            expand_at!(i);
                        } else {
                            set_token(&mut rule.port, &mut rule.exact_port, v);
                        }
                        i += 1;
                    }
                    Some("*") => {
                        i += 1;
                    }
                    Some(other) => {
                        return Err(ConfigError::semantic(
                            format!("Unknown to spec '{}'", other),
                            line,
                        ))
                    }
                    None => return Err(missing("to", line)),
                }
            }
            "log" => {
                has_log = true;
                i += 1;
                if tokens.get(i).is_none() {
                    return Err(missing("log", line));
                }
                while let Some(v) = tokens.get(i) {
                    if v.starts_with('$') {
                        expand_at!(i);
                    }
                    apply_log_token(&mut rule.log, v, line)?;
                    i += 1;
                }
            }
            other => {
                return Err(ConfigError::semantic(
                    format!("Unknown filter rule field '{}'", other),
                    line,
                ))
            }
        }
    }

    // A rule without a source predicate matches all connections; a rule
    // without a site token matches all sites of its channels.
    if rule.user.is_empty() && !rule.all_users && rule.keyword.is_empty() && rule.ip.is_empty() {
        rule.all_conns = true;
    }
    if rule.site.is_empty() {
        rule.all_sites = true;
    }

    let mut precedence = 0;
    if from_user_clause {
        precedence += 1;
    }
    if !rule.user.is_empty() {
        precedence += 1;
    }
    if !rule.keyword.is_empty() {
        precedence += 1;
    }
    if to_channel {
        precedence += 1;
    }
    if !rule.port.is_empty() || rule.all_ports {
        precedence += 1;
    }
    if has_log {
        precedence += 1;
    }
    rule.action.precedence = precedence;

    out.push(rule);
    Ok(false)
}

/// Parse one rule directive into concrete rules
///
/// `name` is the action keyword, `value` the rest of the line. The returned
/// flag tells whether macro expansion produced the rules.
pub fn parse_rules(
    name: &str,
    value: &str,
    user_auth: bool,
    macros: &MacroTable,
    line: u32,
) -> Result<(Vec<FilterRule>, RuleOutcome)> {
    let action = FilterAction::from_name(name).ok_or_else(|| {
        ConfigError::semantic(format!("Unknown filter action '{}'", name), line)
    })?;

    let mut tokens: Vec<String> = Vec::new();
    for t in value.split_whitespace() {
        if t.starts_with('#') {
            break;
        }
        tokens.push(t.to_string());
    }
    if tokens.is_empty() {
        return Err(missing(name, line));
    }

    let mut rules = Vec::new();
    let expanded = parse_tokens(action, &tokens, user_auth, macros, line, &mut rules)?;
    let outcome = if expanded {
        RuleOutcome::Expanded
    } else {
        RuleOutcome::Set
    };
    Ok((rules, outcome))
}

impl Opts {
    /// Parse a one-line filter rule and append the result to the rule list
    pub fn set_filter_rule(&mut self, name: &str, value: &str, line: u32) -> Result<RuleOutcome> {
        let (rules, outcome) =
            parse_rules(name, value, self.user_auth, &self.macros, line)?;
        self.filter_rules.extend(rules);
        Ok(outcome)
    }

    /// Legacy `PassSite` directive: `PassSite <site> [<ip>|<user>|* [<desc>]]`
    ///
    /// Compiles into a Pass rule matching the site against the SNI and
    /// certificate common-name channels.
    pub fn set_passsite(&mut self, value: &str, line: u32) -> Result<()> {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() > 3 {
            return Err(ConfigError::semantic(
                format!("Malformed PassSite '{}'", value),
                line,
            ));
        }

        let mut rule = FilterRule {
            action: FilterAction {
                pass: true,
                ..FilterAction::default()
            },
            ..FilterRule::default()
        };
        rule.apply_to = ApplyTo::only(Channel::Sni);
        rule.apply_to.set(Channel::Cn);

        if tokens[0] == "*" {
            rule.all_sites = true;
        } else {
            set_token(&mut rule.site, &mut rule.exact_site, tokens[0]);
        }
        if rule.site.is_empty() {
            rule.all_sites = true;
        }

        let mut precedence = 1; // site channel clause
        match tokens.get(1) {
            None => {
                rule.all_conns = true;
            }
            Some(&"*") => {
                if !self.user_auth {
                    return Err(ConfigError::semantic(
                        "User auth is disabled, cannot use user filter",
                        line,
                    ));
                }
                rule.all_users = true;
                precedence += 1;
            }
            Some(arg) if arg.parse::<std::net::IpAddr>().is_ok() => {
                rule.ip = arg.to_string();
                rule.exact_ip = true;
                if tokens.get(2).is_some() {
                    return Err(ConfigError::semantic(
                        "Client description cannot be used with client address",
                        line,
                    ));
                }
            }
            Some(user) => {
                if !self.user_auth {
                    return Err(ConfigError::semantic(
                        "User auth is disabled, cannot use user filter",
                        line,
                    ));
                }
                rule.user = user.to_string();
                rule.exact_user = true;
                precedence += 2;
                if let Some(desc) = tokens.get(2) {
                    rule.keyword = desc.to_string();
                    rule.exact_keyword = true;
                    precedence += 1;
                }
            }
        }
        rule.action.precedence = precedence;

        self.filter_rules.push(rule);
        Ok(())
    }

    /// Define a filter macro (`Define $name value ...`)
    pub fn set_macro(&mut self, value: &str, line: u32) -> Result<()> {
        self.macros.define(value, line)
    }
}
