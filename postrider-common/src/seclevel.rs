//! Transport security levels for outbound connections.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How well a connection to a remote host was protected.
///
/// The ordering is meaningful: `Plain < TlsInsecure < TlsSecure`. The
/// domain-info store only ever raises the recorded level for a domain,
/// and the courier refuses to deliver over a connection weaker than what
/// the domain has achieved before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Plaintext connection, no TLS.
    Plain,
    /// TLS established, but the certificate did not validate for the host.
    TlsInsecure,
    /// TLS established with a certificate valid for the host.
    TlsSecure,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain => "PLAIN",
            Self::TlsInsecure => "TLS_INSECURE",
            Self::TlsSecure => "TLS_SECURE",
        })
    }
}
