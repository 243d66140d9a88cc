//! Certificate and key material
//!
//! PEM loaders for the certificate material referenced from the
//! configuration (CA cert/key, client cert/key, chains, DH parameters, leaf
//! keys) plus the reference-counted handle types shared between the global
//! options and per-listener clones. Cloning an options container must share
//! the underlying PKI objects rather than re-parse them, hence the `Arc`
//! wrappers.

use std::ffi::CString;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use openssl::dh::Dh;
use openssl::ec::EcGroup;
use openssl::nid::Nid;
use openssl::pkey::{Params, PKey, Private};
use openssl::x509::X509;

use crate::common::{ProxyError, Result};

// Not bound by the installed openssl-sys version, but present in libcrypto.
extern "C" {
    fn OBJ_ln2nid(ln: *const std::os::raw::c_char) -> std::os::raw::c_int;
}

/// Shared X.509 certificate handle
pub type CertHandle = Arc<X509>;

/// Shared private key handle
pub type KeyHandle = Arc<PKey<Private>>;

/// Shared DH parameter handle
pub type DhHandle = Arc<Dh<Params>>;

/// A leaf certificate with its private key and presentation chain, loaded
/// from a single PEM file (used for `DefaultLeafCert`).
#[derive(Clone)]
pub struct Cert {
    pub crt: X509,
    pub key: PKey<Private>,
    pub chain: Vec<X509>,
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        ProxyError::Certificate(format!("Cannot read '{}': {}", path.display(), e))
    })
}

/// Load the first certificate from a PEM file
pub fn load_x509(path: &Path) -> Result<X509> {
    let pem = read_pem(path)?;
    let crt = X509::from_pem(&pem).map_err(|e| {
        ProxyError::Certificate(format!(
            "Failed to load certificate from '{}': {}",
            path.display(),
            e
        ))
    })?;
    debug!("Loaded certificate from {}", path.display());
    Ok(crt)
}

/// Load every certificate from a PEM file, in file order
pub fn load_chain(path: &Path) -> Result<Vec<X509>> {
    let pem = read_pem(path)?;
    let chain = X509::stack_from_pem(&pem).map_err(|e| {
        ProxyError::Certificate(format!(
            "Failed to load certificate chain from '{}': {}",
            path.display(),
            e
        ))
    })?;
    if chain.is_empty() {
        return Err(ProxyError::Certificate(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    debug!("Loaded {} chain certificate(s) from {}", chain.len(), path.display());
    Ok(chain)
}

/// Load a private key from a PEM file
pub fn load_key(path: &Path) -> Result<PKey<Private>> {
    let pem = read_pem(path)?;
    PKey::private_key_from_pem(&pem).map_err(|e| {
        ProxyError::Certificate(format!(
            "Failed to load private key from '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Try to load a private key from a PEM file that may not contain one
///
/// Used by the CACert/CAKey setters which opportunistically pick up the
/// counterpart object when both live in the same file.
pub fn try_load_key(path: &Path) -> Option<PKey<Private>> {
    let pem = fs::read(path).ok()?;
    PKey::private_key_from_pem(&pem).ok()
}

/// Try to load DH parameters from a PEM file that may not contain any
pub fn try_load_dh(path: &Path) -> Option<Dh<Params>> {
    let pem = fs::read(path).ok()?;
    Dh::params_from_pem(&pem).ok()
}

/// Load DH parameters from a PEM file
pub fn load_dh(path: &Path) -> Result<Dh<Params>> {
    let pem = read_pem(path)?;
    Dh::params_from_pem(&pem).map_err(|e| {
        ProxyError::Certificate(format!(
            "Failed to load DH parameters from '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load a cert/chain/key combo from a single PEM file
///
/// The private key must match the leaf certificate.
pub fn load_cert_chain_key(path: &Path) -> Result<Cert> {
    let mut chain = load_chain(path)?;
    let crt = chain.remove(0);
    let key = load_key(path)?;

    let cert_pub = crt.public_key()?;
    if !key.public_eq(&cert_pub) {
        return Err(ProxyError::Certificate(format!(
            "Cert does not match key in PEM file '{}'",
            path.display()
        )));
    }
    Ok(Cert { crt, key, chain })
}

/// Check that a named elliptic curve exists
///
/// Accepts both short names (`prime256v1`) and long names, the same set
/// OpenSSL itself resolves.
pub fn check_curve(name: &str) -> Result<()> {
    let cname = CString::new(name)
        .map_err(|_| ProxyError::Config(format!("Invalid curve name '{}'", name)))?;
    let mut nid = unsafe { openssl_sys::OBJ_sn2nid(cname.as_ptr()) };
    if nid == 0 {
        nid = unsafe { OBJ_ln2nid(cname.as_ptr()) };
    }
    if nid == 0 {
        return Err(ProxyError::Config(format!("Unknown curve '{}'", name)));
    }
    EcGroup::from_curve_name(Nid::from_raw(nid))
        .map_err(|_| ProxyError::Config(format!("Unknown curve '{}'", name)))?;
    Ok(())
}
