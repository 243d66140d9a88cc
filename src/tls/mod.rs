//! TLS material handling
//!
//! The configuration subsystem only loads and validates PKI objects; the TLS
//! engine consuming them is a separate component.

pub mod cert;

pub use cert::{Cert, CertHandle, DhHandle, KeyHandle};
