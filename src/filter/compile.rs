//! Filter compilation and lookup
//!
//! After parsing completes, the accumulated rule list of every options
//! container is folded once into a layered lookup structure which is treated
//! as immutable from then on. The layering follows the source attributes
//! first (user plus description, user, description, all-users, source IP,
//! unconstrained) and the target attributes second (channel, site, port).
//!
//! Entries of every keyed layer are held in descending lexicographic order;
//! the empty-string sentinels for `all_sites`/`all_ports` therefore always
//! sort last in their substring lists.
//!
//! When several rules land on the same leaf, a rule whose precedence is
//! below the leaf's is dropped, otherwise its action bits are OR-ed in, the
//! log channels it mentions overwrite the leaf's and the leaf rises to the
//! rule's precedence. A later `Block` at lower precedence thus never
//! overwrites an earlier higher-precedence decision.

use std::fmt;
use std::fmt::Write as _;

use crate::filter::rule::{Channel, FilterAction, FilterRule, LogSpec};

/// Merged action and log state of one leaf
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergedAction {
    pub action: FilterAction,
    pub log: LogSpec,
}

impl MergedAction {
    fn merge(&mut self, rule: &FilterRule) {
        if rule.action.precedence < self.action.precedence {
            return;
        }
        self.action.divert |= rule.action.divert;
        self.action.split |= rule.action.split;
        self.action.pass |= rule.action.pass;
        self.action.block |= rule.action.block;
        self.action.match_ |= rule.action.match_;
        self.log.merge_from(&rule.log);
        self.action.precedence = rule.action.precedence;
    }

    /// Whether the leaf carries any decision at all
    pub fn is_set(&self) -> bool {
        self.action.divert
            || self.action.split
            || self.action.pass
            || self.action.block
            || self.action.match_
            || self.log.any()
    }
}

/// One port entry below a site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortNode {
    pub port: String,
    pub state: MergedAction,
}

/// One site entry of a channel table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteNode {
    pub site: String,
    pub state: MergedAction,
    pub port_exact: Vec<PortNode>,
    pub port_substr: Vec<PortNode>,
}

/// Exact and substring site tables of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteList {
    pub exact: Vec<SiteNode>,
    pub substr: Vec<SiteNode>,
}

/// Site tables for all five target channels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterList {
    pub dstip: SiteList,
    pub sni: SiteList,
    pub cn: SiteList,
    pub host: SiteList,
    pub uri: SiteList,
}

impl FilterList {
    fn get(&self, channel: Channel) -> &SiteList {
        match channel {
            Channel::DstIp => &self.dstip,
            Channel::Sni => &self.sni,
            Channel::Cn => &self.cn,
            Channel::Host => &self.host,
            Channel::Uri => &self.uri,
        }
    }

    fn get_mut(&mut self, channel: Channel) -> &mut SiteList {
        match channel {
            Channel::DstIp => &mut self.dstip,
            Channel::Sni => &mut self.sni,
            Channel::Cn => &mut self.cn,
            Channel::Host => &mut self.host,
            Channel::Uri => &mut self.uri,
        }
    }

    fn is_empty(&self) -> bool {
        [&self.dstip, &self.sni, &self.cn, &self.host, &self.uri]
            .iter()
            .all(|sl| sl.exact.is_empty() && sl.substr.is_empty())
    }
}

/// Keyword entry of the description layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordNode {
    pub keyword: String,
    pub list: FilterList,
}

/// User entry of the user-plus-description layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserNode {
    pub user: String,
    pub keyword_exact: Vec<KeywordNode>,
    pub keyword_substr: Vec<KeywordNode>,
}

/// Keyed entry of the flat user and source-IP layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedList {
    pub key: String,
    pub list: FilterList,
}

/// The compiled filter of one options container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub userkeyword_exact: Vec<UserNode>,
    pub userkeyword_substr: Vec<UserNode>,
    pub user_exact: Vec<NamedList>,
    pub user_substr: Vec<NamedList>,
    pub keyword_exact: Vec<KeywordNode>,
    pub keyword_substr: Vec<KeywordNode>,
    pub all_user: FilterList,
    pub ip_exact: Vec<NamedList>,
    pub ip_substr: Vec<NamedList>,
    pub all: FilterList,
}

trait Keyed {
    fn key(&self) -> &str;
    fn with_key(key: String) -> Self;
}

impl Keyed for SiteNode {
    fn key(&self) -> &str {
        &self.site
    }
    fn with_key(key: String) -> Self {
        SiteNode {
            site: key,
            ..SiteNode::default()
        }
    }
}

impl Keyed for PortNode {
    fn key(&self) -> &str {
        &self.port
    }
    fn with_key(key: String) -> Self {
        PortNode {
            port: key,
            ..PortNode::default()
        }
    }
}

impl Keyed for KeywordNode {
    fn key(&self) -> &str {
        &self.keyword
    }
    fn with_key(key: String) -> Self {
        KeywordNode {
            keyword: key,
            ..KeywordNode::default()
        }
    }
}

impl Keyed for UserNode {
    fn key(&self) -> &str {
        &self.user
    }
    fn with_key(key: String) -> Self {
        UserNode {
            user: key,
            ..UserNode::default()
        }
    }
}

impl Keyed for NamedList {
    fn key(&self) -> &str {
        &self.key
    }
    fn with_key(key: String) -> Self {
        NamedList {
            key,
            ..NamedList::default()
        }
    }
}

/// Find or insert the entry for `key`, keeping the list sorted in
/// descending lexicographic order.
fn entry<'a, T: Keyed>(list: &'a mut Vec<T>, key: &str) -> &'a mut T {
    if let Some(pos) = list.iter().position(|e| e.key() == key) {
        return &mut list[pos];
    }
    let pos = list
        .iter()
        .position(|e| e.key() < key)
        .unwrap_or(list.len());
    list.insert(pos, T::with_key(key.to_string()));
    &mut list[pos]
}

fn insert_into_sites(sl: &mut SiteList, rule: &FilterRule) {
    let sites = if !rule.site.is_empty() && rule.exact_site {
        &mut sl.exact
    } else {
        &mut sl.substr
    };
    let node = entry(sites, &rule.site);

    if !rule.port.is_empty() || rule.all_ports {
        let ports = if !rule.port.is_empty() && rule.exact_port {
            &mut node.port_exact
        } else {
            &mut node.port_substr
        };
        entry(ports, &rule.port).state.merge(rule);
    } else {
        node.state.merge(rule);
    }
}

/// Fold the rule list into the compiled filter
pub fn compile(rules: &[FilterRule]) -> Filter {
    let mut filter = Filter::default();

    for rule in rules {
        let list: &mut FilterList = if !rule.user.is_empty() && !rule.keyword.is_empty() {
            let bucket = if rule.exact_user {
                &mut filter.userkeyword_exact
            } else {
                &mut filter.userkeyword_substr
            };
            let user = entry(bucket, &rule.user);
            let keywords = if rule.exact_keyword {
                &mut user.keyword_exact
            } else {
                &mut user.keyword_substr
            };
            &mut entry(keywords, &rule.keyword).list
        } else if !rule.user.is_empty() {
            let bucket = if rule.exact_user {
                &mut filter.user_exact
            } else {
                &mut filter.user_substr
            };
            &mut entry(bucket, &rule.user).list
        } else if !rule.keyword.is_empty() {
            let bucket = if rule.exact_keyword {
                &mut filter.keyword_exact
            } else {
                &mut filter.keyword_substr
            };
            &mut entry(bucket, &rule.keyword).list
        } else if rule.all_users {
            &mut filter.all_user
        } else if !rule.ip.is_empty() {
            let bucket = if rule.exact_ip {
                &mut filter.ip_exact
            } else {
                &mut filter.ip_substr
            };
            &mut entry(bucket, &rule.ip).list
        } else {
            &mut filter.all
        };

        for channel in Channel::ALL {
            if rule.apply_to.has(channel) {
                insert_into_sites(list.get_mut(channel), rule);
            }
        }
    }
    filter
}

/// Attributes of one connection-time query
#[derive(Debug, Clone, Copy)]
pub struct ConnQuery<'a> {
    pub user: Option<&'a str>,
    pub desc: Option<&'a str>,
    pub src_ip: &'a str,
    pub channel: Channel,
    pub site: &'a str,
    pub port: Option<&'a str>,
}

fn resolve_site<'a>(site: &'a SiteNode, q: &ConnQuery) -> Option<&'a MergedAction> {
    if let Some(port) = q.port {
        if let Some(p) = site.port_exact.iter().find(|n| n.port == port) {
            return Some(&p.state);
        }
        if let Some(p) = site.port_substr.iter().find(|n| port.contains(&n.port)) {
            return Some(&p.state);
        }
    }
    if site.state.is_set() {
        Some(&site.state)
    } else {
        None
    }
}

fn lookup_list<'a>(list: &'a FilterList, q: &ConnQuery) -> Option<&'a MergedAction> {
    let sl = list.get(q.channel);
    if let Some(state) = sl
        .exact
        .iter()
        .find(|n| n.site == q.site)
        .and_then(|n| resolve_site(n, q))
    {
        return Some(state);
    }
    sl.substr
        .iter()
        .find(|n| q.site.contains(&n.site))
        .and_then(|n| resolve_site(n, q))
}

fn lookup_keywords<'a>(
    exact: &'a [KeywordNode],
    substr: &'a [KeywordNode],
    desc: &str,
    q: &ConnQuery,
) -> Option<&'a MergedAction> {
    if let Some(state) = exact
        .iter()
        .find(|n| n.keyword == desc)
        .and_then(|n| lookup_list(&n.list, q))
    {
        return Some(state);
    }
    substr
        .iter()
        .find(|n| desc.contains(&n.keyword))
        .and_then(|n| lookup_list(&n.list, q))
}

impl Filter {
    /// Find the highest-precedence rule state matching a connection
    ///
    /// The user/description layers are probed first (exact before
    /// substring); the all-users, source-IP and unconstrained layers are
    /// always consulted as well. Ties go to the later candidate, mirroring
    /// declaration-order override semantics.
    pub fn lookup(&self, q: &ConnQuery) -> Option<MergedAction> {
        let mut candidates: Vec<&MergedAction> = Vec::new();

        match (q.user, q.desc) {
            (Some(user), Some(desc)) => {
                let hit = self
                    .userkeyword_exact
                    .iter()
                    .find(|n| n.user == user)
                    .and_then(|n| lookup_keywords(&n.keyword_exact, &n.keyword_substr, desc, q))
                    .or_else(|| {
                        self.userkeyword_substr
                            .iter()
                            .find(|n| user.contains(&n.user))
                            .and_then(|n| {
                                lookup_keywords(&n.keyword_exact, &n.keyword_substr, desc, q)
                            })
                    });
                candidates.extend(hit);
            }
            (Some(user), None) => {
                let hit = self
                    .user_exact
                    .iter()
                    .find(|n| n.key == user)
                    .and_then(|n| lookup_list(&n.list, q))
                    .or_else(|| {
                        self.user_substr
                            .iter()
                            .find(|n| user.contains(&n.key))
                            .and_then(|n| lookup_list(&n.list, q))
                    });
                candidates.extend(hit);
            }
            (None, Some(desc)) => {
                candidates.extend(lookup_keywords(
                    &self.keyword_exact,
                    &self.keyword_substr,
                    desc,
                    q,
                ));
            }
            (None, None) => {}
        }

        candidates.extend(lookup_list(&self.all_user, q));

        let ip_hit = self
            .ip_exact
            .iter()
            .find(|n| n.key == q.src_ip)
            .and_then(|n| lookup_list(&n.list, q))
            .or_else(|| {
                self.ip_substr
                    .iter()
                    .find(|n| q.src_ip.contains(&n.key))
                    .and_then(|n| lookup_list(&n.list, q))
            });
        candidates.extend(ip_hit);

        candidates.extend(lookup_list(&self.all, q));

        candidates
            .into_iter()
            .max_by_key(|m| m.action.precedence)
            .copied()
    }
}

fn write_state(out: &mut String, state: &MergedAction) {
    let _ = write!(
        out,
        "action={}, log={}, precedence={}",
        state.action.mask_str(),
        state.log,
        state.action.precedence
    );
}

fn write_ports(out: &mut String, label: &str, ports: &[PortNode], substr: bool) {
    if ports.is_empty() {
        return;
    }
    let _ = writeln!(out, "        port {}:", label);
    for (i, p) in ports.iter().enumerate() {
        if p.port.is_empty() {
            let _ = write!(out, "          {}:  (all_ports, substring, ", i);
        } else if substr {
            let _ = write!(out, "          {}: {} (substring, ", i, p.port);
        } else {
            let _ = write!(out, "          {}: {} (exact, ", i, p.port);
        }
        write_state(out, &p.state);
        out.push_str(")\n");
    }
}

fn write_sites(out: &mut String, channel: &str, sites: &[SiteNode], substr: bool) {
    if sites.is_empty() {
        return;
    }
    let _ = writeln!(
        out,
        "    {} {}: ",
        channel,
        if substr { "substring" } else { "exact" }
    );
    for (i, s) in sites.iter().enumerate() {
        if s.site.is_empty() {
            let _ = write!(out, "      {}:  (all_sites, substring, ", i);
        } else if substr {
            let _ = write!(out, "      {}: {} (substring, ", i, s.site);
        } else {
            let _ = write!(out, "      {}: {} (exact, ", i, s.site);
        }
        write_state(out, &s.state);
        out.push_str(")\n");
        write_ports(out, "exact", &s.port_exact, false);
        write_ports(out, "substring", &s.port_substr, true);
    }
}

fn write_list(out: &mut String, list: &FilterList) {
    for (name, sl) in [
        ("ip", &list.dstip),
        ("sni", &list.sni),
        ("cn", &list.cn),
        ("host", &list.host),
        ("uri", &list.uri),
    ] {
        write_sites(out, name, &sl.exact, false);
        write_sites(out, name, &sl.substr, true);
    }
}

fn write_keywords(out: &mut String, keywords: &[KeywordNode], substr: bool) {
    for (i, k) in keywords.iter().enumerate() {
        let _ = writeln!(
            out,
            "   keyword {} {} ({})= ",
            i,
            k.keyword,
            if substr { "substring" } else { "exact" }
        );
        write_list(out, &k.list);
    }
}

fn write_userkeywords(out: &mut String, users: &[UserNode], substr: bool) {
    for (i, u) in users.iter().enumerate() {
        let _ = writeln!(
            out,
            " user {} {} ({})=",
            i,
            u.user,
            if substr { "substring" } else { "exact" }
        );
        if !u.keyword_exact.is_empty() {
            out.push_str("  keyword exact:\n");
            write_keywords(out, &u.keyword_exact, false);
        }
        if !u.keyword_substr.is_empty() {
            out.push_str("  keyword substring:\n");
            write_keywords(out, &u.keyword_substr, true);
        }
    }
}

fn write_named(out: &mut String, label: &str, entries: &[NamedList], substr: bool) {
    for (i, e) in entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {} {} {} ({})= ",
            label,
            i,
            e.key,
            if substr { "substring" } else { "exact" }
        );
        write_list(out, &e.list);
    }
}

impl fmt::Display for Filter {
    /// The diagnostic dump of the whole compiled structure
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("filter=>\n");

        out.push_str("userkeyword_filter_exact->\n");
        write_userkeywords(&mut out, &self.userkeyword_exact, false);
        out.push_str("userkeyword_filter_substr->\n");
        write_userkeywords(&mut out, &self.userkeyword_substr, true);

        out.push_str("user_filter_exact->\n");
        write_named(&mut out, "user", &self.user_exact, false);
        out.push_str("user_filter_substr->\n");
        write_named(&mut out, "user", &self.user_substr, true);

        out.push_str("keyword_filter_exact->\n");
        write_keywords(&mut out, &self.keyword_exact, false);
        out.push_str("keyword_filter_substr->\n");
        write_keywords(&mut out, &self.keyword_substr, true);

        out.push_str("all_user_filter->\n");
        write_list(&mut out, &self.all_user);

        out.push_str("ip_filter_exact->\n");
        write_named(&mut out, "ip", &self.ip_exact, false);
        out.push_str("ip_filter_substr->\n");
        write_named(&mut out, "ip", &self.ip_substr, true);

        out.push_str("all_filter->\n");
        write_list(&mut out, &self.all);

        f.write_str(&out)
    }
}

impl Filter {
    /// True when no rule was compiled in
    pub fn is_empty(&self) -> bool {
        self.userkeyword_exact.is_empty()
            && self.userkeyword_substr.is_empty()
            && self.user_exact.is_empty()
            && self.user_substr.is_empty()
            && self.keyword_exact.is_empty()
            && self.keyword_substr.is_empty()
            && self.all_user.is_empty()
            && self.ip_exact.is_empty()
            && self.ip_substr.is_empty()
            && self.all.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::macros::MacroTable;
    use crate::filter::rule::parse_rules;

    fn rules_of(specs: &[(&str, &str)]) -> Vec<FilterRule> {
        let macros = MacroTable::default();
        let mut rules = Vec::new();
        for (name, value) in specs {
            let (mut r, _) = parse_rules(name, value, true, &macros, 0).unwrap();
            rules.append(&mut r);
        }
        rules
    }

    #[test]
    fn test_descending_site_order() {
        let rules = rules_of(&[
            ("Match", "from ip 192.168.0.2 to ip 192.168.0.1"),
            ("Match", "from ip 192.168.0.2 to ip *"),
            ("Match", "from ip 192.168.0.2 to ip 192.168.0.*"),
            ("Match", "from ip 192.168.0.2 to ip 192.168.0.3"),
        ]);
        let filter = compile(&rules);

        let ip = &filter.ip_exact[0];
        assert_eq!(ip.key, "192.168.0.2");
        let exact: Vec<&str> = ip.list.dstip.exact.iter().map(|s| s.site.as_str()).collect();
        assert_eq!(exact, ["192.168.0.3", "192.168.0.1"]);
        let substr: Vec<&str> = ip.list.dstip.substr.iter().map(|s| s.site.as_str()).collect();
        // all_sites sentinel sorts last
        assert_eq!(substr, ["192.168.0.", ""]);
    }

    #[test]
    fn test_lower_precedence_does_not_overwrite() {
        let rules = rules_of(&[
            ("Divert", "from ip 192.168.0.1 to ip 192.168.0.2"),
            (
                "Split",
                "from ip 192.168.0.1 to ip 192.168.0.2 log connect master cert content pcap mirror",
            ),
            ("Pass", "from ip 192.168.0.1 to ip 192.168.0.2 log !connect !cert !pcap"),
            ("Block", "from ip 192.168.0.1 to ip 192.168.0.2"),
        ]);
        let filter = compile(&rules);

        let site = &filter.ip_exact[0].list.dstip.exact[0];
        assert!(site.state.action.divert && site.state.action.split && site.state.action.pass);
        assert!(!site.state.action.block);
        assert_eq!(site.state.action.precedence, 2);
        assert_eq!(site.state.log.connect, Some(false));
        assert_eq!(site.state.log.master, Some(true));
    }

    #[test]
    fn test_lookup_prefers_precedence() {
        let rules = rules_of(&[
            ("Divert", "*"),
            ("Pass", "to sni example.com log connect"),
        ]);
        let filter = compile(&rules);

        let hit = filter
            .lookup(&ConnQuery {
                user: None,
                desc: None,
                src_ip: "10.0.0.1",
                channel: Channel::Sni,
                site: "example.com",
                port: None,
            })
            .unwrap();
        assert!(hit.action.pass);
        assert_eq!(hit.action.precedence, 2);

        let miss = filter
            .lookup(&ConnQuery {
                user: None,
                desc: None,
                src_ip: "10.0.0.1",
                channel: Channel::Sni,
                site: "other.org",
                port: None,
            })
            .unwrap();
        assert!(miss.action.divert);
    }

    #[test]
    fn test_port_fallback_to_site() {
        let rules = rules_of(&[
            ("Match", "from ip 192.168.0.1 to ip 192.168.0.3 log !mirror"),
            ("Match", "from ip 192.168.0.1 to ip 192.168.0.3 port 443"),
        ]);
        let filter = compile(&rules);

        let q = |port| ConnQuery {
            user: None,
            desc: None,
            src_ip: "192.168.0.1",
            channel: Channel::DstIp,
            site: "192.168.0.3",
            port,
        };
        // port matches the port table
        let hit = filter.lookup(&q(Some("443"))).unwrap();
        assert_eq!(hit.log.mirror, None);
        // port miss falls back to the site state
        let fallback = filter.lookup(&q(Some("80"))).unwrap();
        assert_eq!(fallback.log.mirror, Some(false));
    }
}
