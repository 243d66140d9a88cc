//! Process-wide configuration state
//!
//! [`Global`] owns everything that exists once per process: paths, log
//! targets, certificate generation settings, the primary options container
//! and the list of proxy listener specs. It is populated during the
//! single-threaded parsing phase and frozen afterwards; [`Global::finalize`]
//! compiles the filter of every options container once parsing is done.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::common::{ProxyError, Result as CommonResult};
use crate::config::error::{ConfigError, Result};
use crate::config::opts::{Opts, TmpGlobalOpts};
use crate::config::spec::ProxySpec;
use crate::tls::cert::{self, Cert, KeyHandle};

/// Process-wide fields plus the top-level options and listener specs
#[derive(Default)]
pub struct Global {
    pub conffile: Option<PathBuf>,
    pub pidfile: Option<String>,

    pub connectlog: Option<PathBuf>,
    pub contentlog: Option<PathBuf>,
    pub contentlog_isdir: bool,
    pub contentlog_isspec: bool,
    pub contentlog_basedir: Option<PathBuf>,
    pub masterkeylog: Option<PathBuf>,
    pub pcaplog: Option<PathBuf>,
    pub pcaplog_isdir: bool,
    pub pcaplog_isspec: bool,
    pub pcaplog_basedir: Option<PathBuf>,
    pub mirrorif: Option<String>,
    pub mirrortarget: Option<String>,
    pub lprocinfo: bool,

    pub detach: bool,
    pub debug: bool,
    pub debug_level: Option<u8>,
    pub statslog: bool,
    pub stats_period: u32,
    pub conn_idle_timeout: u32,
    pub expired_conn_check_period: u32,
    pub open_files_limit: Option<u32>,

    pub dropuser: Option<String>,
    pub dropgroup: Option<String>,
    pub jaildir: Option<PathBuf>,

    pub leafcertdir: Option<PathBuf>,
    pub defaultleafcert: Option<Arc<Cert>>,
    pub leafkey: Option<KeyHandle>,
    pub leafkey_rsabits: u32,
    pub certgendir: Option<String>,
    pub certgen_writeall: bool,

    pub openssl_engine: Option<String>,
    pub userdb_path: Option<String>,

    pub opts: Opts,
    /// Listener specs, most recently declared first
    pub specs: Vec<ProxySpec>,
}

impl Global {
    pub fn new() -> Self {
        Global {
            leafkey_rsabits: crate::config::defaults::LEAFKEY_RSABITS,
            conn_idle_timeout: crate::config::defaults::CONN_IDLE_TIMEOUT,
            expired_conn_check_period: crate::config::defaults::EXPIRED_CONN_CHECK_PERIOD,
            stats_period: crate::config::defaults::STATS_PERIOD,
            opts: Opts::default(),
            ..Global::default()
        }
    }

    // --- Leaf certificate material ---

    pub fn set_leafkey(&mut self, value: &str) -> CommonResult<()> {
        let path = Path::new(value);
        self.leafkey = Some(Arc::new(cert::load_key(path)?));
        if self.opts.dh.is_none() {
            self.opts.dh = cert::try_load_dh(path).map(Arc::new);
        }
        debug!("LeafKey: {}", value);
        Ok(())
    }

    pub fn set_leafcertdir(&mut self, value: &str) -> CommonResult<()> {
        let path = Path::new(value);
        if !path.is_dir() {
            return Err(ProxyError::Config(format!("'{}' is not a directory", value)));
        }
        self.leafcertdir = Some(path.to_path_buf());
        debug!("LeafCertDir: {}", value);
        Ok(())
    }

    pub fn set_defaultleafcert(&mut self, value: &str) -> CommonResult<()> {
        self.defaultleafcert = Some(Arc::new(cert::load_cert_chain_key(Path::new(value))?));
        debug!("DefaultLeafCert: {}", value);
        Ok(())
    }

    pub fn set_certgendir_writegencerts(&mut self, value: &str) {
        self.certgen_writeall = false;
        self.certgendir = Some(value.to_string());
        debug!(
            "WriteGenCertsDir: certgendir={}, writeall={}",
            value, self.certgen_writeall
        );
    }

    pub fn set_certgendir_writeall(&mut self, value: &str) {
        self.certgen_writeall = true;
        self.certgendir = Some(value.to_string());
        debug!(
            "WriteAllCertsDir: certgendir={}, writeall={}",
            value, self.certgen_writeall
        );
    }

    // --- Privilege drop ---

    /// Store the privilege-drop user; resolution against the account
    /// database happens in the privilege-drop step at startup.
    pub fn set_user(&mut self, value: &str) {
        self.dropuser = Some(value.to_string());
        debug!("User: {}", value);
    }

    pub fn set_group(&mut self, value: &str) {
        self.dropgroup = Some(value.to_string());
        debug!("Group: {}", value);
    }

    pub fn set_jaildir(&mut self, value: &str) -> CommonResult<()> {
        let path = Path::new(value);
        if !path.is_dir() {
            return Err(ProxyError::Config(format!("'{}' is not a directory", value)));
        }
        self.jaildir = Some(fs::canonicalize(path)?);
        debug!("Chroot: {}", self.jaildir.as_ref().unwrap().display());
        Ok(())
    }

    pub fn set_pidfile(&mut self, value: &str) {
        self.pidfile = Some(value.to_string());
        debug!("PidFile: {}", value);
    }

    // --- Log targets ---

    /// Canonicalize a log file path; its directory part must exist
    fn realdir(value: &str) -> CommonResult<PathBuf> {
        let path = Path::new(value);
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = path.file_name().ok_or_else(|| {
            ProxyError::Config(format!("Invalid log file path '{}'", value))
        })?;
        let dir = fs::canonicalize(dir).map_err(|e| {
            ProxyError::Config(format!("Directory part of '{}' does not exist: {}", value, e))
        })?;
        Ok(dir.join(file))
    }

    pub fn set_connectlog(&mut self, value: &str) -> CommonResult<()> {
        self.connectlog = Some(Self::realdir(value)?);
        debug!("ConnectLog: {}", self.connectlog.as_ref().unwrap().display());
        Ok(())
    }

    pub fn set_contentlog(&mut self, value: &str) -> CommonResult<()> {
        self.contentlog = Some(Self::realdir(value)?);
        self.contentlog_isdir = false;
        self.contentlog_isspec = false;
        debug!("ContentLog: {}", self.contentlog.as_ref().unwrap().display());
        Ok(())
    }

    pub fn set_contentlogdir(&mut self, value: &str) -> CommonResult<()> {
        let path = Path::new(value);
        if !path.is_dir() {
            return Err(ProxyError::Config(format!("'{}' is not a directory", value)));
        }
        self.contentlog = Some(fs::canonicalize(path)?);
        self.contentlog_isdir = true;
        self.contentlog_isspec = false;
        debug!("ContentLogDir: {}", self.contentlog.as_ref().unwrap().display());
        Ok(())
    }

    /// Split a path spec at its first `%` conversion, create the literal
    /// directory prefix, and store base dir and full spec.
    fn logbasedir(value: &str) -> CommonResult<(PathBuf, PathBuf)> {
        let path = Path::new(value);
        let mut literal = PathBuf::new();
        let mut spec = PathBuf::new();
        let mut in_spec = false;
        for comp in path.components() {
            let s = comp.as_os_str();
            if in_spec || s.to_string_lossy().contains('%') {
                in_spec = true;
                spec.push(s);
            } else {
                literal.push(s);
            }
        }
        if !in_spec {
            return Err(ProxyError::Config(format!(
                "Path spec '{}' contains no conversion",
                value
            )));
        }
        fs::create_dir_all(&literal)?;
        let basedir = fs::canonicalize(&literal)?;
        let log = basedir.join(spec);
        Ok((basedir, log))
    }

    pub fn set_contentlogpathspec(&mut self, value: &str) -> CommonResult<()> {
        let (basedir, log) = Self::logbasedir(value)?;
        debug!(
            "ContentLogPathSpec: basedir={}, {}",
            basedir.display(),
            log.display()
        );
        self.contentlog_basedir = Some(basedir);
        self.contentlog = Some(log);
        self.contentlog_isdir = false;
        self.contentlog_isspec = true;
        Ok(())
    }

    pub fn set_masterkeylog(&mut self, value: &str) -> CommonResult<()> {
        self.masterkeylog = Some(Self::realdir(value)?);
        debug!(
            "MasterKeyLog: {}",
            self.masterkeylog.as_ref().unwrap().display()
        );
        Ok(())
    }

    pub fn set_pcaplog(&mut self, value: &str) -> CommonResult<()> {
        self.pcaplog = Some(Self::realdir(value)?);
        self.pcaplog_isdir = false;
        self.pcaplog_isspec = false;
        debug!("PcapLog: {}", self.pcaplog.as_ref().unwrap().display());
        Ok(())
    }

    pub fn set_pcaplogdir(&mut self, value: &str) -> CommonResult<()> {
        let path = Path::new(value);
        if !path.is_dir() {
            return Err(ProxyError::Config(format!("'{}' is not a directory", value)));
        }
        self.pcaplog = Some(fs::canonicalize(path)?);
        self.pcaplog_isdir = true;
        self.pcaplog_isspec = false;
        debug!("PcapLogDir: {}", self.pcaplog.as_ref().unwrap().display());
        Ok(())
    }

    pub fn set_pcaplogpathspec(&mut self, value: &str) -> CommonResult<()> {
        let (basedir, log) = Self::logbasedir(value)?;
        debug!(
            "PcapLogPathSpec: basedir={}, {}",
            basedir.display(),
            log.display()
        );
        self.pcaplog_basedir = Some(basedir);
        self.pcaplog = Some(log);
        self.pcaplog_isdir = false;
        self.pcaplog_isspec = true;
        Ok(())
    }

    pub fn set_mirrorif(&mut self, value: &str) {
        self.mirrorif = Some(value.to_string());
        debug!("MirrorIf: {}", value);
    }

    pub fn set_mirrortarget(&mut self, value: &str) {
        self.mirrortarget = Some(value.to_string());
        debug!("MirrorTarget: {}", value);
    }

    // --- Runtime knobs ---

    pub fn set_debug_level(&mut self, value: &str, line: u32) -> Result<()> {
        match value {
            "2" | "3" | "4" => {
                self.debug_level = Some(value.parse().unwrap());
                debug!("DebugLevel: {}", value);
                Ok(())
            }
            _ => Err(ConfigError::invalid("DebugLevel", value, "2-4", line)),
        }
    }

    pub fn set_openssl_engine(&mut self, value: &str) {
        self.openssl_engine = Some(value.to_string());
        debug!("OpenSSLEngine: {}", value);
    }

    pub fn set_userdb_path(&mut self, value: &str) {
        self.userdb_path = Some(value.to_string());
        debug!("UserDBPath: {}", value);
    }

    // --- Post-parse ---

    /// Compile every options container's rule list into its lookup filter.
    /// Called once after parsing; the compiled filters are immutable from
    /// then on.
    pub fn finalize(&mut self) {
        self.opts.compile_filter();
        for spec in &mut self.specs {
            spec.opts.compile_filter();
        }
    }

    /// Whether any spec (eventually) uses SSL/TLS
    pub fn has_ssl_spec(&self) -> bool {
        self.specs.iter().any(|s| s.ssl || s.upgrade)
    }

    /// Whether any spec resolves targets through DNS
    pub fn has_dns_spec(&self) -> bool {
        self.specs.iter().any(|s| s.dns)
    }

    /// Whether any spec has user authentication enabled
    pub fn has_userauth_spec(&self) -> bool {
        self.specs.iter().any(|s| s.opts.user_auth)
    }

    /// Whether any spec has a CA key to forge certificates with
    pub fn has_cakey_spec(&self) -> bool {
        self.specs.iter().any(|s| s.opts.cakey.is_some())
    }

    /// Text dump of all listener specs, in declaration order
    pub fn specs_str(&self) -> String {
        self.specs
            .iter()
            .rev()
            .map(|s| format!("proxyspec={}", s))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text dump of the global scope (top-level options plus spec count)
    pub fn dump(&self) -> String {
        format!(
            "conffile={}, pidfile={}, specs={}\nglobal {}",
            self.conffile
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.pidfile.as_deref().unwrap_or("none"),
            self.specs.len(),
            self.opts
        )
    }

    /// Load and parse a configuration file, remembering its path
    pub fn load_conffile(
        &mut self,
        path: &str,
        natengine: &mut String,
        tmp: &mut TmpGlobalOpts,
    ) -> Result<()> {
        self.conffile = Some(PathBuf::from(path));
        crate::config::parser::load_conffile(self, Path::new(path), natengine, tmp)
    }
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let global = Global::new();
        assert_eq!(global.leafkey_rsabits, 2048);
        assert_eq!(global.conn_idle_timeout, 120);
        assert_eq!(global.expired_conn_check_period, 10);
        assert_eq!(global.stats_period, 1);
        assert!(global.specs.is_empty());
    }

    #[test]
    fn test_debug_level_range() {
        let mut global = Global::new();
        assert!(global.set_debug_level("3", 1).is_ok());
        assert_eq!(global.debug_level, Some(3));
        assert!(global.set_debug_level("5", 2).is_err());
        assert!(global.set_debug_level("1", 3).is_err());
    }

    #[test]
    fn test_jaildir_must_exist() {
        let mut global = Global::new();
        assert!(global.set_jaildir("/definitely/not/a/dir").is_err());
        assert!(global.set_jaildir("/tmp").is_ok());
    }
}
