//! Filter rule parsing tests
//!
//! Exercises the one-line rule grammar for every action keyword, the
//! user-auth gating of user/desc predicates, and macro expansion including
//! the expansion signal returned to the dispatcher.

use intercept_proxy::config::Opts;
use intercept_proxy::filter::RuleOutcome;

const ACTIONS: [&str; 5] = ["Divert", "Split", "Pass", "Block", "Match"];

fn set(opts: &mut Opts, name: &str, value: &str) -> Result<RuleOutcome, ()> {
    opts.set_filter_rule(name, value, 0).map_err(|_| ())
}

#[test]
fn set_filter_rule_bare_and_clause_catchalls() {
    let mut opts = Opts::default();

    for action in ACTIONS {
        assert_eq!(set(&mut opts, action, "*"), Ok(RuleOutcome::Set));
        assert_eq!(set(&mut opts, action, "from *"), Ok(RuleOutcome::Set));
        assert_eq!(set(&mut opts, action, "to *"), Ok(RuleOutcome::Set));
        assert_eq!(set(&mut opts, action, "log *"), Ok(RuleOutcome::Set));
    }
    assert_eq!(opts.filter_rules.len(), 20);
}

#[test]
fn set_filter_rule_from_ip() {
    let mut opts = Opts::default();

    for action in ACTIONS {
        assert_eq!(set(&mut opts, action, "from ip *"), Ok(RuleOutcome::Set));
        assert_eq!(
            set(&mut opts, action, "from ip 192.168.0.1"),
            Ok(RuleOutcome::Set)
        );
    }

    opts.set_macro("$macro 192.168.0.1 192.168.0.2", 0).unwrap();

    // macro expansion is signalled, not silently conflated with success
    for action in ACTIONS {
        assert_eq!(
            set(&mut opts, action, "from ip $macro"),
            Ok(RuleOutcome::Expanded)
        );
    }
}

#[test]
fn set_filter_rule_user_predicates_gated_by_user_auth() {
    let mut opts = Opts::default();
    opts.set_macro("$macro root daemon", 0).unwrap();

    for action in ACTIONS {
        assert!(set(&mut opts, action, "from user *").is_err());
        assert!(set(&mut opts, action, "from user * desc keyword").is_err());
        assert!(set(&mut opts, action, "from user $macro").is_err());
        assert!(set(&mut opts, action, "from user $macro desc keyword").is_err());
        assert!(set(&mut opts, action, "from user $macro desc $macro").is_err());
    }
    assert!(opts.filter_rules.is_empty());

    opts.user_auth = true;

    for action in ACTIONS {
        assert_eq!(set(&mut opts, action, "from user *"), Ok(RuleOutcome::Set));
        assert_eq!(
            set(&mut opts, action, "from user * desc keyword"),
            Ok(RuleOutcome::Set)
        );
        assert_eq!(
            set(&mut opts, action, "from user $macro"),
            Ok(RuleOutcome::Expanded)
        );
        assert_eq!(
            set(&mut opts, action, "from user $macro desc keyword"),
            Ok(RuleOutcome::Expanded)
        );
        assert_eq!(
            set(&mut opts, action, "from user $macro desc $macro"),
            Ok(RuleOutcome::Expanded)
        );
    }
}

#[test]
fn set_filter_rule_to_site_and_port() {
    let mut opts = Opts::default();

    for action in ACTIONS {
        assert_eq!(set(&mut opts, action, "to ip *"), Ok(RuleOutcome::Set));
        assert_eq!(set(&mut opts, action, "to ip * port *"), Ok(RuleOutcome::Set));
        assert_eq!(
            set(&mut opts, action, "to ip 192.168.0.1"),
            Ok(RuleOutcome::Set)
        );
        assert_eq!(
            set(&mut opts, action, "to ip 192.168.0.1 port *"),
            Ok(RuleOutcome::Set)
        );
        assert_eq!(
            set(&mut opts, action, "to ip * port 443"),
            Ok(RuleOutcome::Set)
        );
        assert_eq!(
            set(&mut opts, action, "to ip 192.168.0.1 port 443"),
            Ok(RuleOutcome::Set)
        );
    }

    opts.set_macro("$macro1 192.168.0.1 192.168.0.2", 0).unwrap();
    opts.set_macro("$macro2 443 444", 0).unwrap();

    for action in ACTIONS {
        assert_eq!(
            set(&mut opts, action, "to ip $macro1 port $macro2"),
            Ok(RuleOutcome::Expanded)
        );
    }
}

#[test]
fn set_filter_rule_to_named_channels() {
    let mut opts = Opts::default();
    opts.set_macro("$macro example.com example*", 0).unwrap();

    for channel in ["sni", "cn", "host", "uri"] {
        for action in ACTIONS {
            assert_eq!(
                set(&mut opts, action, &format!("to {} *", channel)),
                Ok(RuleOutcome::Set)
            );
            assert_eq!(
                set(&mut opts, action, &format!("to {} example.com", channel)),
                Ok(RuleOutcome::Set)
            );
            assert_eq!(
                set(&mut opts, action, &format!("to {} $macro", channel)),
                Ok(RuleOutcome::Expanded)
            );
        }
    }
}

#[test]
fn set_filter_rule_log_actions() {
    let mut opts = Opts::default();

    for action in ACTIONS {
        for log in [
            "connect", "master", "cert", "content", "pcap", "mirror", "!*", "!connect",
            "!master", "!cert", "!content", "!pcap", "!mirror",
        ] {
            assert_eq!(
                set(&mut opts, action, &format!("log {}", log)),
                Ok(RuleOutcome::Set)
            );
        }
    }

    opts.set_macro("$macro connect master cert content pcap mirror", 0)
        .unwrap();
    opts.set_macro("$macro2 !connect !master !cert !content !pcap !mirror", 0)
        .unwrap();
    opts.set_macro("$macro3 connect !master cert !content pcap !mirror", 0)
        .unwrap();

    for action in ACTIONS {
        for m in ["$macro", "$macro2", "$macro3"] {
            assert_eq!(
                set(&mut opts, action, &format!("log {}", m)),
                Ok(RuleOutcome::Expanded)
            );
        }
    }

    assert!(set(&mut opts, "Match", "log nosuchchannel").is_err());
}

#[test]
fn set_filter_rule_rejects_unknown_fields() {
    let mut opts = Opts::default();
    assert!(set(&mut opts, "Divert", "through 192.168.0.1").is_err());
    assert!(set(&mut opts, "Divert", "from port 443").is_err());
    assert!(set(&mut opts, "Divert", "to sni example.com port 443").is_err());
    // missing value after a clause keyword
    assert!(set(&mut opts, "Divert", "from ip").is_err());
    assert!(set(&mut opts, "Divert", "log").is_err());
    // unknown macro
    assert!(set(&mut opts, "Divert", "from ip $nosuch").is_err());
}
