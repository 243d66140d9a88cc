//! Crate-wide error type
//!
//! [`ProxyError`] covers the failure surfaces of the policy engine outside
//! the line-oriented parser: address parsing for listener endpoints, PKI
//! material loading, and filesystem access to configured paths. Parse and
//! semantic errors start out as [`crate::config::error::ConfigError`] (which
//! carries file/line context) and are folded into the `Config` variant at
//! the crate boundary.

use std::io;

use thiserror::Error;

/// Top-level error of the policy engine
#[derive(Error, Debug)]
pub enum ProxyError {
    /// A directive, value or combination of options was rejected; parser
    /// errors arrive here with their line context already rendered
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A listen, divert, return or target endpoint could not be parsed
    #[error("invalid address: {0}")]
    Addr(String),

    /// Certificate, key or DH parameter material could not be loaded or
    /// does not fit together
    #[error("cannot use PKI material: {0}")]
    Certificate(String),

    /// OpenSSL rejected an operation on otherwise loadable material
    #[error("openssl: {0}")]
    Pki(#[from] openssl::error::ErrorStack),

    /// Filesystem access to a configured path failed (log directories,
    /// chroot target, include files)
    #[error("file access: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::error::ConfigError;

    #[test]
    fn test_parser_errors_keep_line_context() {
        let parse_err = ConfigError::UnknownOption {
            name: "NoSuchOption".to_string(),
            line: 7,
        };
        let err: ProxyError = parse_err.into();
        match &err {
            ProxyError::Config(msg) => {
                assert!(msg.contains("NoSuchOption"), "{}", msg);
                assert!(msg.contains("line 7"), "{}", msg);
            }
            other => panic!("parser errors must fold into Config, got {:?}", other),
        }
    }

    #[test]
    fn test_openssl_error_stack_converts() {
        // A garbage PEM produces a real ErrorStack to convert
        let stack = openssl::x509::X509::from_pem(b"not a certificate")
            .err()
            .expect("garbage PEM must not parse");
        let err: ProxyError = stack.into();
        assert!(matches!(err, ProxyError::Pki(_)));
        assert!(err.to_string().starts_with("openssl: "));
    }
}
