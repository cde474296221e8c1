//! One SMTP transaction against one mail exchanger.
//!
//! The state machine is `CONNECT → greeting → EHLO → [STARTTLS → EHLO]?
//! → MAIL → RCPT → DATA → body → QUIT`, with a deadline on every step.
//! STARTTLS is opportunistic: when the upgrade fails and no enforcing
//! STS policy is in play, the attempt is redone from scratch over
//! plaintext on a fresh connection (RFC 3207 section 4.1).

use std::time::Duration;

use postrider_common::SecurityLevel;
use postrider_smtp::{ClientError, Response, SmtpClient};
use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::domaininfo::DomainInfo;
use crate::error::{DeliveryError, PermanentError, TemporaryError};
use crate::sts::{Policy, PolicyMode};
use crate::types::SmtpTimeouts;

/// How one plaintext-capable step failed.
enum TxError {
    /// STARTTLS was rejected or the handshake broke; retrying without
    /// TLS on a fresh connection may still deliver.
    TlsFailed(String),
    /// Anything else; mapped straight to the delivery verdict.
    Fatal(DeliveryError),
}

impl From<DeliveryError> for TxError {
    fn from(e: DeliveryError) -> Self {
        Self::Fatal(e)
    }
}

impl From<ClientError> for TxError {
    fn from(e: ClientError) -> Self {
        Self::Fatal(e.into())
    }
}

/// A single delivery attempt to one host.
pub(crate) struct SmtpTransaction<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub data: &'a [u8],
    /// The MX host; also the name certificates are validated against.
    pub host: &'a str,
    pub port: u16,
    pub hello_name: &'a str,
    pub timeouts: &'a SmtpTimeouts,
    pub extra_roots: &'a [CertificateDer<'static>],
    pub policy: Option<&'a Policy>,
    pub dinfo: &'a DomainInfo,
    /// Recipient domain, for the security-level records.
    pub to_domain: &'a str,
}

impl SmtpTransaction<'_> {
    /// Run the transaction, including the plaintext downgrade retry.
    pub(crate) async fn execute(&self) -> Result<(), DeliveryError> {
        match self.run(true).await {
            Ok(()) => Ok(()),
            Err(TxError::Fatal(e)) => Err(e),
            Err(TxError::TlsFailed(reason)) => {
                if self.enforcing_policy() {
                    // The policy forbids delivering without validated
                    // TLS, so there is nothing to fall back to.
                    return Err(TemporaryError::TlsHandshakeFailed(reason).into());
                }
                tracing::info!(
                    host = self.host,
                    "STARTTLS failed ({reason}), retrying without TLS on a fresh connection"
                );
                match self.run(false).await {
                    Ok(()) => Ok(()),
                    Err(TxError::Fatal(e)) => Err(e),
                    Err(TxError::TlsFailed(reason)) => {
                        Err(TemporaryError::TlsHandshakeFailed(reason).into())
                    }
                }
            }
        }
    }

    const fn enforcing_policy(&self) -> bool {
        matches!(
            self.policy,
            Some(Policy {
                mode: PolicyMode::Enforce,
                ..
            })
        )
    }

    /// One full pass over the state machine. `try_tls` is cleared on the
    /// downgrade retry.
    async fn run(&self, try_tls: bool) -> Result<(), TxError> {
        let addr = format!("{}:{}", self.host, self.port);

        let mut client = self
            .step(self.timeouts.connect_secs, "connect", SmtpClient::connect(&addr, self.host))
            .await??;
        if !self.extra_roots.is_empty() {
            client = client.with_extra_roots(self.extra_roots.to_vec());
        }

        let greeting = self
            .step(self.timeouts.greeting_secs, "greeting", client.read_greeting())
            .await??;
        if greeting.code != 220 {
            return Err(classify(
                &greeting,
                TemporaryError::ServerBusy(format!("server greeted with: {}", greeting.message())),
                PermanentError::MessageRejected(format!(
                    "server greeted with: {}",
                    greeting.message()
                )),
            ));
        }

        let ehlo = self
            .step(self.timeouts.ehlo_secs, "EHLO", client.ehlo(self.hello_name))
            .await??;
        if !ehlo.is_success() {
            return Err(classify(
                &ehlo,
                TemporaryError::SmtpTemporary(format!("server rejected EHLO: {}", ehlo.message())),
                PermanentError::MessageRejected(format!(
                    "server rejected EHLO: {}",
                    ehlo.message()
                )),
            ));
        }

        let mut level = SecurityLevel::Plain;
        // Try TLS whenever the server offers it; an enforcing policy
        // makes us try even when it is not advertised.
        if try_tls && (ehlo.has_capability("STARTTLS") || self.enforcing_policy()) {
            match tokio::time::timeout(
                Duration::from_secs(self.timeouts.starttls_secs),
                client.starttls(),
            )
            .await
            {
                Err(_) => return Err(TxError::TlsFailed("STARTTLS timed out".to_string())),
                Ok(Err(ClientError::Tls(reason))) => return Err(TxError::TlsFailed(reason)),
                Ok(Err(other)) => return Err(other.into()),
                Ok(Ok(response)) if !response.is_success() => {
                    return Err(TxError::TlsFailed(format!(
                        "server rejected STARTTLS: {}",
                        response.message()
                    )));
                }
                Ok(Ok(_)) => {
                    level = if client.tls_verified() == Some(true) {
                        SecurityLevel::TlsSecure
                    } else {
                        SecurityLevel::TlsInsecure
                    };
                    tracing::debug!(host = self.host, "STARTTLS established, level {level}");

                    // Capabilities must be re-read over TLS (RFC 3207).
                    let ehlo = self
                        .step(self.timeouts.ehlo_secs, "EHLO", client.ehlo(self.hello_name))
                        .await??;
                    if !ehlo.is_success() {
                        return Err(classify(
                            &ehlo,
                            TemporaryError::SmtpTemporary(format!(
                                "server rejected EHLO after STARTTLS: {}",
                                ehlo.message()
                            )),
                            PermanentError::MessageRejected(format!(
                                "server rejected EHLO after STARTTLS: {}",
                                ehlo.message()
                            )),
                        ));
                    }
                }
            }
        }

        if let Some(policy) = self.policy {
            match policy.mode {
                PolicyMode::Enforce => {
                    if level != SecurityLevel::TlsSecure {
                        return Err(TxError::Fatal(
                            TemporaryError::StsViolation { level }.into(),
                        ));
                    }
                }
                PolicyMode::Testing => {
                    if level != SecurityLevel::TlsSecure {
                        tracing::warn!(
                            host = self.host,
                            domain = self.to_domain,
                            "STS policy violation (testing mode): level {level}"
                        );
                    }
                }
            }
        }

        // Downgrade protection: never complete a delivery below the
        // level this domain has already achieved. Checked before MAIL
        // FROM so a doomed attempt sends no message bytes.
        if !self.dinfo.outgoing_sec_level(self.to_domain, level) {
            return Err(TxError::Fatal(
                TemporaryError::SecurityDowngrade { level }.into(),
            ));
        }

        let response = self
            .step(
                self.timeouts.mail_from_secs,
                "MAIL FROM",
                client.mail_from(self.from),
            )
            .await??;
        if !response.is_success() {
            return Err(classify(
                &response,
                TemporaryError::SmtpTemporary(format!(
                    "server rejected MAIL FROM: {}",
                    response.message()
                )),
                PermanentError::MessageRejected(format!(
                    "server rejected MAIL FROM: {}",
                    response.message()
                )),
            ));
        }

        let response = self
            .step(self.timeouts.rcpt_to_secs, "RCPT TO", client.rcpt_to(self.to))
            .await??;
        if !response.is_success() {
            return Err(classify(
                &response,
                TemporaryError::SmtpTemporary(format!(
                    "server rejected RCPT TO: {}",
                    response.message()
                )),
                PermanentError::InvalidRecipient(format!(
                    "server rejected RCPT TO: {}",
                    response.message()
                )),
            ));
        }

        let response = self
            .step(self.timeouts.data_secs, "DATA", client.data())
            .await??;
        if response.code != 354 {
            return Err(classify(
                &response,
                TemporaryError::SmtpTemporary(format!(
                    "server rejected DATA: {}",
                    response.message()
                )),
                PermanentError::MessageRejected(format!(
                    "server rejected DATA: {}",
                    response.message()
                )),
            ));
        }

        let response = self
            .step(self.timeouts.data_secs, "message data", client.send_data(self.data))
            .await??;
        if !response.is_success() {
            return Err(classify(
                &response,
                TemporaryError::SmtpTemporary(format!(
                    "server rejected message data: {}",
                    response.message()
                )),
                PermanentError::MessageRejected(format!(
                    "server rejected message data: {}",
                    response.message()
                )),
            ));
        }

        // QUIT is best-effort; the message is already accepted.
        if let Ok(Err(e)) = tokio::time::timeout(
            Duration::from_secs(self.timeouts.quit_secs),
            client.quit(),
        )
        .await
        {
            tracing::debug!(host = self.host, "QUIT after delivery failed: {e}");
        }

        self.dinfo.record_outgoing(self.to_domain, level);
        if self.enforcing_policy() {
            self.dinfo.record_sts(self.to_domain);
        }

        Ok(())
    }

    /// Wrap a client operation in its per-step deadline.
    async fn step<T>(
        &self,
        secs: u64,
        what: &str,
        op: impl Future<Output = Result<T, ClientError>> + Send,
    ) -> Result<Result<T, TxError>, TxError> {
        match tokio::time::timeout(Duration::from_secs(secs), op).await {
            Ok(result) => Ok(result.map_err(Into::into)),
            Err(_) => Err(TxError::Fatal(
                TemporaryError::Timeout(format!("{what} timed out after {secs}s")).into(),
            )),
        }
    }
}

/// Map a negative reply to the delivery verdict: 5xx permanent,
/// everything else temporary.
fn classify(response: &Response, temporary: TemporaryError, permanent: PermanentError) -> TxError {
    if response.is_permanent_error() {
        TxError::Fatal(permanent.into())
    } else {
        TxError::Fatal(temporary.into())
    }
}
