//! Typed error handling for delivery operations.
//!
//! Every delivery failure is either permanent (the queue should bounce)
//! or temporary (the queue should retry later). The split follows SMTP
//! reply classes: 5xx at a decisive step is permanent, 4xx and anything
//! network-shaped is temporary.

use postrider_common::SecurityLevel;
use postrider_smtp::ClientError;
use thiserror::Error;

use crate::dns::DnsError;

/// Top-level delivery error with a permanent/temporary verdict.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Permanent failure; do not retry.
    #[error("permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure; retry with backoff.
    #[error("temporary failure: {0}")]
    Temporary(#[from] TemporaryError),
}

impl DeliveryError {
    /// Returns `true` if this error should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this error should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }
}

/// Failures that will not go away by retrying.
#[derive(Debug, Clone, Error)]
pub enum PermanentError {
    /// The recipient domain is not a valid hostname.
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// The domain answered DNS but offers no mail servers.
    #[error("no mail servers available for domain: {0}")]
    NoMailServers(String),

    /// The server rejected the message with a 5xx (MAIL FROM, DATA or
    /// greeting).
    #[error("message rejected: {0}")]
    MessageRejected(String),

    /// The server rejected the recipient with a 5xx.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The MDA binary could not be run, or exited with a non-retriable
    /// status.
    #[error("local delivery failed: {0}")]
    LocalDelivery(String),

    /// MDA forwarding is not implemented.
    #[error("forwarding via MDA is not supported")]
    ForwardNotSupported,
}

/// Failures worth retrying.
#[derive(Debug, Clone, Error)]
pub enum TemporaryError {
    /// Could not establish or keep the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server greeted us with something other than a 220.
    #[error("server busy: {0}")]
    ServerBusy(String),

    /// DNS lookup failed in a retriable way.
    #[error("DNS lookup failed: {0}")]
    DnsLookupFailed(String),

    /// An operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The server returned a 4xx.
    #[error("temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS was attempted but the handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// Every MX for the domain was ruled out before connecting.
    #[error("no usable mail server for domain: {0}")]
    NoUsableMx(String),

    /// The achieved security level is below what this domain has reached
    /// before; delivering would be a downgrade.
    #[error("Security level check failed (level:{level})")]
    SecurityDowngrade {
        /// The level this connection achieved.
        level: SecurityLevel,
    },

    /// An enforcing MTA-STS policy demands a validated TLS connection.
    #[error("invalid security level ({level}) for STS policy")]
    StsViolation {
        /// The level this connection achieved.
        level: SecurityLevel,
    },

    /// The MDA exited with EX_TEMPFAIL.
    #[error("local delivery failed temporarily: {0}")]
    LocalDelivery(String),
}

/// Wire errors are all retriable: negative SMTP replies come back as
/// responses, so whatever errors at the client layer is network-shaped.
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Tls(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),
            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "connection closed unexpectedly".to_string(),
            )),
            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }
            err @ (ClientError::Parse(_) | ClientError::Utf8(_)) => {
                Self::Temporary(TemporaryError::SmtpTemporary(format!("protocol error: {err}")))
            }
        }
    }
}

impl From<DnsError> for DeliveryError {
    fn from(error: DnsError) -> Self {
        match error {
            DnsError::InvalidDomain(domain) => {
                Self::Permanent(PermanentError::InvalidDomain(domain))
            }
            DnsError::Lookup(msg) => Self::Temporary(TemporaryError::DnsLookupFailed(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdicts() {
        let err = DeliveryError::Temporary(TemporaryError::ConnectionFailed(
            "connection refused".to_string(),
        ));
        assert!(err.is_temporary());
        assert!(!err.is_permanent());

        let err =
            DeliveryError::Permanent(PermanentError::InvalidRecipient("a@b".to_string()));
        assert!(err.is_permanent());
        assert!(!err.is_temporary());
    }

    #[test]
    fn test_security_messages_are_exact() {
        let err = DeliveryError::Temporary(TemporaryError::SecurityDowngrade {
            level: SecurityLevel::Plain,
        });
        assert!(
            err.to_string()
                .contains("Security level check failed (level:PLAIN)")
        );

        let err = DeliveryError::Temporary(TemporaryError::StsViolation {
            level: SecurityLevel::TlsInsecure,
        });
        assert!(
            err.to_string()
                .contains("invalid security level (TLS_INSECURE) for STS policy")
        );
    }

    #[test]
    fn test_client_error_conversions_are_temporary() {
        for err in [
            ClientError::Tls("handshake failed".to_string()),
            ClientError::ConnectionClosed,
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )),
            ClientError::Parse("garbage".to_string()),
        ] {
            let delivery: DeliveryError = err.into();
            assert!(delivery.is_temporary(), "{delivery}");
        }
    }

    #[test]
    fn test_dns_error_conversions() {
        let delivery: DeliveryError = DnsError::InvalidDomain("bad domain".to_string()).into();
        assert!(delivery.is_permanent());

        let delivery: DeliveryError = DnsError::Lookup("timed out".to_string()).into();
        assert!(delivery.is_temporary());
    }
}
