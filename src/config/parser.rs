//! Configuration file and command line parsing
//!
//! The file parser reads the configuration line by line; blank lines and
//! `#`/`;` comments are skipped, every other line splits into a name and a
//! value at the first run of whitespace. Command-line options reuse the same
//! tokenizer with `=` as the separator and line number 0. `ProxySpec {`
//! hands the reader over to the structured-spec loop until the closing
//! brace; `Include` reads another file in-line and may not nest.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, error};

use crate::config::error::{ConfigError, Result};
use crate::config::global::Global;
use crate::config::opts::{check_value_yesno, parse_range, TmpGlobalOpts};
use crate::config::spec::{
    parse_proxyspec_tokens, set_spec_option, ProxySpec, SpecAddrs, SpecOption,
};

/// Maximum number of tokens in a one-line proxyspec
const MAX_SPEC_TOKENS: usize = 8;

/// Split a line into an option name and value
///
/// The name ends at the first whitespace or separator character; the value
/// is the rest with separators trimmed from both ends. This is the only
/// tokenizer, shared by the file and command-line paths (which differ only
/// in `sep`).
pub fn get_name_value(line: &str, sep: char, line_num: u32) -> Result<(&str, &str)> {
    let is_sep = |c: char| c == ' ' || c == '\t' || c == '\r' || c == '\n' || c == sep;

    let end = line.find(is_sep).unwrap_or(line.len());
    let name = &line[..end];
    if name.is_empty() {
        return Err(ConfigError::semantic("No option name", line_num));
    }
    if end == line.len() {
        debug!("No option separator on line {}", line_num);
        return Ok((name, ""));
    }
    Ok((name, line[end..].trim_matches(is_sep)))
}

fn to_semantic(line: u32) -> impl Fn(crate::common::ProxyError) -> ConfigError {
    move |e| ConfigError::semantic(e.to_string(), line)
}

/// Parse a one-line proxyspec given as the `ProxySpec` directive value
fn load_proxyspec_line(
    global: &mut Global,
    value: &str,
    natengine: &str,
    line_num: u32,
    tmp: &TmpGlobalOpts,
) -> Result<()> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.len() > MAX_SPEC_TOKENS {
        return Err(ConfigError::semantic(
            "Too many arguments in proxyspec",
            line_num,
        ));
    }
    parse_proxyspec_tokens(
        &tokens,
        natengine,
        &global.opts,
        &mut global.specs,
        tmp,
        line_num,
    )
}

/// Parse a `ProxySpec { ... }` block from the configuration file
fn load_proxyspec_struct(
    global: &mut Global,
    natengine: &mut String,
    line_num: &mut u32,
    reader: &mut dyn BufRead,
    tmp: &TmpGlobalOpts,
) -> Result<()> {
    let mut spec =
        ProxySpec::new(&global.opts, tmp).map_err(to_semantic(*line_num))?;
    // Default return address, may be overridden by ReturnAddr
    spec.set_return_addr("127.0.0.1")
        .map_err(to_semantic(*line_num))?;

    let mut addrs = SpecAddrs::default();
    let mut closed = false;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| ConfigError::Other(e.to_string()))?;
        if n == 0 {
            break;
        }
        *line_num += 1;

        let content = line.trim_start_matches([' ', '\t']);
        if content.is_empty() || content.starts_with(['#', ';', '\r', '\n']) {
            continue;
        }

        let (name, value) = get_name_value(content, ' ', *line_num)?;
        if name == "FilterRule" && value == "{" {
            load_filterrule_struct(&mut spec.opts, line_num, reader)?;
            continue;
        }
        match set_spec_option(&mut spec, name, value, natengine, &mut addrs, *line_num)? {
            SpecOption::Continue => {}
            SpecOption::CloseBrace => {
                closed = true;
                break;
            }
        }
    }

    if !closed {
        return Err(ConfigError::semantic(
            "struct ProxySpec has no closing brace '}'",
            *line_num,
        ));
    }

    spec.set_divert_mode(tmp.split);
    global.specs.insert(0, spec);
    Ok(())
}

/// Parse a `FilterRule { ... }` block into the given options container
///
/// The block form populates the same predicate slots as the one-line rule
/// grammar, one per line, and compiles through the same parser (macro
/// references included) when the closing brace is reached.
fn load_filterrule_struct(
    opts: &mut crate::config::opts::Opts,
    line_num: &mut u32,
    reader: &mut dyn BufRead,
) -> Result<()> {
    let mut action: Option<String> = None;
    let mut user: Option<String> = None;
    let mut desc: Option<String> = None;
    let mut srcip: Option<String> = None;
    let mut targets: Vec<(&'static str, String)> = Vec::new();
    let mut dstport: Option<String> = None;
    let mut log: Option<String> = None;
    let mut closed = false;

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| ConfigError::Other(e.to_string()))?;
        if n == 0 {
            break;
        }
        *line_num += 1;

        let content = line.trim_start_matches([' ', '\t']);
        if content.is_empty() || content.starts_with(['#', ';', '\r', '\n']) {
            continue;
        }

        let (name, value) = get_name_value(content, ' ', *line_num)?;
        if name == "}" {
            closed = true;
            break;
        }
        if value.is_empty() {
            return Err(ConfigError::MissingValue {
                name: name.to_string(),
                line: *line_num,
            });
        }
        match name {
            "Action" => match value {
                "Divert" | "Split" | "Pass" | "Block" | "Match" => {
                    action = Some(value.to_string())
                }
                _ => {
                    return Err(ConfigError::invalid(
                        "Action",
                        value,
                        "Divert|Split|Pass|Block|Match",
                        *line_num,
                    ))
                }
            },
            "User" => user = Some(value.to_string()),
            "Desc" => desc = Some(value.to_string()),
            "SrcIp" => srcip = Some(value.to_string()),
            "DstIp" => targets.push(("ip", value.to_string())),
            "SNI" => targets.push(("sni", value.to_string())),
            "CN" => targets.push(("cn", value.to_string())),
            "Host" => targets.push(("host", value.to_string())),
            "URI" => targets.push(("uri", value.to_string())),
            "DstPort" => dstport = Some(value.to_string()),
            "Log" => log = Some(value.to_string()),
            _ => {
                return Err(ConfigError::UnknownOption {
                    name: name.to_string(),
                    line: *line_num,
                })
            }
        }
    }

    if !closed {
        return Err(ConfigError::semantic(
            "struct FilterRule has no closing brace '}'",
            *line_num,
        ));
    }
    let action = action.ok_or_else(|| {
        ConfigError::semantic("FilterRule requires an Action", *line_num)
    })?;
    if (user.is_some() || desc.is_some()) && srcip.is_some() {
        return Err(ConfigError::semantic(
            "FilterRule cannot combine SrcIp with User or Desc",
            *line_num,
        ));
    }
    if targets.len() > 1 {
        return Err(ConfigError::semantic(
            "FilterRule takes at most one target site",
            *line_num,
        ));
    }
    if dstport.is_some() && !matches!(targets.first(), None | Some(("ip", _))) {
        return Err(ConfigError::semantic(
            "DstPort can only be used with DstIp targets",
            *line_num,
        ));
    }

    // Assemble the equivalent one-line rule text
    let mut text = String::new();
    if let Some(user) = &user {
        text.push_str("from user ");
        text.push_str(user);
        if let Some(desc) = &desc {
            text.push_str(" desc ");
            text.push_str(desc);
        }
    } else if let Some(desc) = &desc {
        text.push_str("from desc ");
        text.push_str(desc);
    } else if let Some(ip) = &srcip {
        text.push_str("from ip ");
        text.push_str(ip);
    }
    match (targets.first(), &dstport) {
        (Some((channel, site)), port) => {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str("to ");
            text.push_str(channel);
            text.push(' ');
            text.push_str(site);
            if let Some(port) = port {
                text.push_str(" port ");
                text.push_str(port);
            }
        }
        (None, Some(port)) => {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str("to port ");
            text.push_str(port);
        }
        (None, None) => {}
    }
    if let Some(log) = &log {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str("log ");
        text.push_str(log);
    }
    if text.is_empty() {
        text.push('*');
    }

    opts.set_filter_rule(&action, &text, *line_num)?;
    Ok(())
}

/// Dispatch one directive at global scope
///
/// Directives not known here fall through to the top-level options
/// container. `reader` is present while parsing a file so `ProxySpec {` can
/// consume the block lines.
pub fn set_global_option(
    global: &mut Global,
    name: &str,
    value: &str,
    natengine: &mut String,
    line_num: &mut u32,
    reader: Option<&mut dyn BufRead>,
    tmp: &mut TmpGlobalOpts,
) -> Result<()> {
    if value.is_empty() {
        return Err(ConfigError::MissingValue {
            name: name.to_string(),
            line: *line_num,
        });
    }
    let line = *line_num;

    match name {
        "LeafCertDir" => global.set_leafcertdir(value).map_err(to_semantic(line))?,
        "DefaultLeafCert" => global.set_defaultleafcert(value).map_err(to_semantic(line))?,
        "WriteGenCertsDir" => global.set_certgendir_writegencerts(value),
        "WriteAllCertsDir" => global.set_certgendir_writeall(value),
        "User" => global.set_user(value),
        "Group" => global.set_group(value),
        "Chroot" => global.set_jaildir(value).map_err(to_semantic(line))?,
        "PidFile" => global.set_pidfile(value),
        "ConnectLog" => global.set_connectlog(value).map_err(to_semantic(line))?,
        "ContentLog" => global.set_contentlog(value).map_err(to_semantic(line))?,
        "ContentLogDir" => global.set_contentlogdir(value).map_err(to_semantic(line))?,
        "ContentLogPathSpec" => global
            .set_contentlogpathspec(value)
            .map_err(to_semantic(line))?,
        "LogProcInfo" => {
            global.lprocinfo = check_value_yesno(value, "LogProcInfo", line)?;
            debug!("LogProcInfo: {}", global.lprocinfo);
        }
        "MasterKeyLog" => global.set_masterkeylog(value).map_err(to_semantic(line))?,
        "PcapLog" => global.set_pcaplog(value).map_err(to_semantic(line))?,
        "PcapLogDir" => global.set_pcaplogdir(value).map_err(to_semantic(line))?,
        "PcapLogPathSpec" => global.set_pcaplogpathspec(value).map_err(to_semantic(line))?,
        "MirrorIf" => global.set_mirrorif(value),
        "MirrorTarget" => global.set_mirrortarget(value),
        "Daemon" => {
            global.detach = check_value_yesno(value, "Daemon", line)?;
            debug!("Daemon: {}", global.detach);
        }
        "Debug" => {
            global.debug = check_value_yesno(value, "Debug", line)?;
            debug!("Debug: {}", global.debug);
        }
        "DebugLevel" => global.set_debug_level(value, line)?,
        "UserDBPath" => global.set_userdb_path(value),
        "ProxySpec" => {
            if value == "{" {
                debug!("ProxySpec {{ on line {}", line);
                let reader = reader.ok_or_else(|| {
                    ConfigError::semantic(
                        "Structured ProxySpec requires a configuration file",
                        line,
                    )
                })?;
                load_proxyspec_struct(global, natengine, line_num, reader, tmp)?;
            } else {
                load_proxyspec_line(global, value, natengine, line, tmp)?;
            }
        }
        "FilterRule" => {
            if value != "{" {
                return Err(ConfigError::invalid("FilterRule", value, "{", line));
            }
            debug!("FilterRule {{ on line {}", line);
            let reader = reader.ok_or_else(|| {
                ConfigError::semantic(
                    "Structured FilterRule requires a configuration file",
                    line,
                )
            })?;
            load_filterrule_struct(&mut global.opts, line_num, reader)?;
        }
        "ConnIdleTimeout" => {
            global.conn_idle_timeout = parse_range("ConnIdleTimeout", value, 10, 3600, line)?;
            debug!("ConnIdleTimeout: {}", global.conn_idle_timeout);
        }
        "ExpiredConnCheckPeriod" => {
            global.expired_conn_check_period =
                parse_range("ExpiredConnCheckPeriod", value, 10, 60, line)?;
            debug!("ExpiredConnCheckPeriod: {}", global.expired_conn_check_period);
        }
        "LogStats" => {
            global.statslog = check_value_yesno(value, "LogStats", line)?;
            debug!("LogStats: {}", global.statslog);
        }
        "StatsPeriod" => {
            global.stats_period = parse_range("StatsPeriod", value, 1, 10, line)?;
            debug!("StatsPeriod: {}", global.stats_period);
        }
        "OpenFilesLimit" => {
            global.open_files_limit =
                Some(parse_range("OpenFilesLimit", value, 50, 10000, line)?);
            debug!("OpenFilesLimit: {}", global.open_files_limit.unwrap());
        }
        "LeafKey" => global.set_leafkey(value).map_err(to_semantic(line))?,
        "LeafKeyRSABits" => {
            let bits: u32 = value
                .parse()
                .map_err(|_| ConfigError::invalid("LeafKeyRSABits", value, "1024|2048|3072|4096", line))?;
            if ![1024, 2048, 3072, 4096].contains(&bits) {
                return Err(ConfigError::invalid(
                    "LeafKeyRSABits",
                    value,
                    "1024|2048|3072|4096",
                    line,
                ));
            }
            global.leafkey_rsabits = bits;
            debug!("LeafKeyRSABits: {}", bits);
        }
        "OpenSSLEngine" => global.set_openssl_engine(value),
        "Include" => {
            // Include may appear in the top-level file only
            if tmp.include {
                return Err(ConfigError::NestedInclude {
                    path: value.to_string(),
                    line,
                });
            }
            tmp.include = true;
            let result = load_conffile(global, Path::new(value), natengine, tmp);
            tmp.include = false;
            if let Err(e) = result {
                error!("{}", e);
                return Err(ConfigError::Include {
                    path: value.to_string(),
                    line,
                });
            }
        }
        _ => {
            global
                .opts
                .set_option(name, value, line, natengine, Some(tmp))?;
        }
    }
    Ok(())
}

/// Read and dispatch a configuration file
pub fn load_conffile(
    global: &mut Global,
    path: &Path,
    natengine: &mut String,
    tmp: &mut TmpGlobalOpts,
) -> Result<()> {
    debug!("Conf file: {}", path.display());

    let file =
        File::open(path).map_err(|e| ConfigError::File(path.to_path_buf(), e.to_string()))?;
    let mut reader = BufReader::new(file);
    let mut line_num = 0u32;
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| ConfigError::Other(e.to_string()))?;
        if n == 0 {
            break;
        }
        line_num += 1;

        let content = line.trim_start_matches([' ', '\t']);
        if content.is_empty() || content.starts_with(['#', ';', '\r', '\n']) {
            continue;
        }

        let (name, value) = get_name_value(content, ' ', line_num)?;
        let name = name.to_string();
        let value = value.to_string();
        set_global_option(
            global,
            &name,
            &value,
            natengine,
            &mut line_num,
            Some(&mut reader),
            tmp,
        )?;
    }
    Ok(())
}

/// Dispatch one `Name=Value` option from the command line
pub fn set_cmdline_option(
    global: &mut Global,
    optarg: &str,
    natengine: &mut String,
    tmp: &mut TmpGlobalOpts,
) -> Result<()> {
    // Whitespace is possible before the name if the option was quoted
    let content = optarg.trim_start_matches([' ', '\t']);
    let (name, value) = get_name_value(content, '=', 0)?;
    let mut line_num = 0;
    set_global_option(global, name, value, natengine, &mut line_num, None, tmp)
}
