//! Intercept Proxy command line interface
//!
//! Loads the configuration from the command line and configuration file,
//! compiles the per-listener filters, and prints the resulting listener
//! dump. The connection engine picks up the frozen global state from here.

use std::env;
use std::process;

use log::{info, warn};

use intercept_proxy::common::{init_logger, ProxyError, Result};
use intercept_proxy::config::spec::parse_proxyspec_tokens;
use intercept_proxy::config::{nat, set_cmdline_option, Global, TmpGlobalOpts};
use intercept_proxy::{APP_NAME, VERSION};

fn print_help() {
    println!("Usage: {} [OPTIONS] [PROXYSPECS...]", APP_NAME);
    println!();
    println!("A transparent SSL/TLS interception proxy.");
    println!();
    println!("Options:");
    println!("  -f FILE          Load configuration from FILE");
    println!("  -o NAME=VALUE    Set any configuration directive");
    println!("  -n               Split mode: never divert to an inspector");
    println!("  -d               Detach from TTY and run as daemon");
    println!("  -D               Enable debug output");
    println!("  -E               Dump the compiled configuration and exit");
    println!("  -V               Print version information");
    println!("  -h               Print this help message");
    println!();
    println!("Any directive also works as a long option, e.g. --UserTimeout 300");
    println!("or --UserTimeout=300.");
    println!();
    println!("Trailing arguments are parsed as one-line proxyspecs:");
    println!("  <proto> <addr> <port> [up:<port> [ua:<addr>] [ra:<addr>]]");
    println!("      [<natengine>|<target-addr> <target-port>|sni <port>]");
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut global = Global::new();
    let mut natengine = nat::default_engine().to_string();
    let mut tmp = TmpGlobalOpts::default();
    let mut dump = false;
    let mut spec_tokens: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-f" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| ProxyError::Config("-f requires a file argument".to_string()))?;
                global.load_conffile(path, &mut natengine, &mut tmp)?;
            }
            "-o" => {
                i += 1;
                let kv = args
                    .get(i)
                    .ok_or_else(|| ProxyError::Config("-o requires NAME=VALUE".to_string()))?;
                set_cmdline_option(&mut global, kv, &mut natengine, &mut tmp)?;
            }
            "-n" => tmp.split = true,
            "-d" => global.detach = true,
            "-D" => global.debug = true,
            "-E" => dump = true,
            "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                return Ok(());
            }
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            long if long.starts_with("--") => {
                let rest = &long[2..];
                let kv = if rest.contains('=') {
                    rest.to_string()
                } else {
                    i += 1;
                    let value = args.get(i).ok_or_else(|| {
                        ProxyError::Config(format!("--{} requires a value", rest))
                    })?;
                    format!("{}={}", rest, value)
                };
                set_cmdline_option(&mut global, &kv, &mut natengine, &mut tmp)?;
            }
            _ => {
                // First non-option argument starts the proxyspecs
                spec_tokens = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    if !spec_tokens.is_empty() {
        let tokens: Vec<&str> = spec_tokens.iter().map(String::as_str).collect();
        parse_proxyspec_tokens(
            &tokens,
            &natengine,
            &global.opts,
            &mut global.specs,
            &tmp,
            0,
        )?;
    }

    if global.specs.is_empty() {
        return Err(ProxyError::Config(
            "No proxyspec defined; use -f or give proxyspecs on the command line".to_string(),
        ));
    }

    global.finalize();

    if global.has_ssl_spec() && !global.has_cakey_spec() {
        warn!("No CA key configured; TLS connections cannot be intercepted");
    }
    if global.has_userauth_spec() && global.userdb_path.is_none() {
        warn!("User auth enabled but no UserDBPath configured");
    }

    info!(
        "Loaded {} proxyspec(s){}",
        global.specs.len(),
        if global.has_dns_spec() { ", using DNS" } else { "" }
    );

    if dump || global.debug {
        println!("{}", global.specs_str());
    }
    if dump {
        return Ok(());
    }

    // The connection engine takes over the frozen global state from here.
    info!("Configuration OK");
    Ok(())
}

fn main() {
    init_logger(intercept_proxy::config::defaults::LOG_LEVEL);

    if let Err(e) = run() {
        eprintln!("{}: {}", APP_NAME, e);
        process::exit(1);
    }
}
