//! The outbound SMTP courier: host selection and attempt iteration.

use std::sync::Arc;
use std::time::Duration;

use postrider_common::address;
use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::dns::MxResolver;
use crate::domaininfo::DomainInfo;
use crate::error::{DeliveryError, PermanentError, TemporaryError};
use crate::sts::{PolicyLookup, PolicyMode};
use crate::transaction::SmtpTransaction;
use crate::types::CourierConfig;

/// Delivers messages to remote domains over SMTP.
///
/// One courier serves many concurrent deliveries; each call to
/// [`SmtpCourier::deliver`] owns its own connection. MX discovery and
/// STS policy lookup are injected so tests can drive the courier against
/// local fixtures.
pub struct SmtpCourier {
    config: CourierConfig,
    mx_resolver: Arc<dyn MxResolver>,
    policies: Arc<dyn PolicyLookup>,
    dinfo: Arc<DomainInfo>,
    extra_roots: Vec<CertificateDer<'static>>,
}

impl SmtpCourier {
    /// Create a courier.
    pub fn new(
        config: CourierConfig,
        mx_resolver: Arc<dyn MxResolver>,
        policies: Arc<dyn PolicyLookup>,
        dinfo: Arc<DomainInfo>,
    ) -> Self {
        Self {
            config,
            mx_resolver,
            policies,
            dinfo,
            extra_roots: Vec::new(),
        }
    }

    /// Additional TLS trust roots, on top of the system store.
    #[must_use]
    pub fn with_extra_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.extra_roots = roots;
        self
    }

    /// The domain-info store this courier records into.
    #[must_use]
    pub fn domain_info(&self) -> &DomainInfo {
        &self.dinfo
    }

    /// Deliver `data` from `from` to the single recipient `to`.
    ///
    /// Walks the recipient domain's mail exchangers in preference order
    /// and stops at the first acceptance. The returned error's
    /// [`DeliveryError::is_permanent`] verdict is the queue's retry
    /// signal: permanent only when every attempted host failed
    /// permanently.
    ///
    /// Dropping the returned future aborts the delivery; all I/O is
    /// async and sub-operations carry their own deadlines.
    ///
    /// # Errors
    ///
    /// See [`DeliveryError`].
    pub async fn deliver(&self, from: &str, to: &str, data: &[u8]) -> Result<(), DeliveryError> {
        let (_, domain) = address::split(to);
        let to_domain = address::ascii_domain(domain);

        let policy = self.policies.policy_for(&to_domain).await;
        if let Some(p) = &policy {
            tracing::debug!("STS policy for {to_domain}: {:?} {:?}", p.mode, p.mxs);
        }

        let mxs = self.mx_resolver.lookup_mxs(domain).await?;
        if mxs.is_empty() {
            return Err(PermanentError::NoMailServers(to_domain).into());
        }
        tracing::debug!("delivering {from} -> {to} via {mxs:?}");

        let mut errors: Vec<DeliveryError> = Vec::new();
        for mx in &mxs {
            if let Some(p) = &policy
                && !p.matches_mx(mx)
            {
                match p.mode {
                    PolicyMode::Enforce => {
                        tracing::warn!("skipping MX {mx}: not allowed by STS policy");
                        continue;
                    }
                    PolicyMode::Testing => {
                        tracing::warn!("MX {mx} not allowed by STS policy (testing mode)");
                    }
                }
            }

            let transaction = SmtpTransaction {
                from,
                to,
                data,
                host: mx,
                port: self.config.smtp_port,
                hello_name: &self.config.hello_name,
                timeouts: &self.config.timeouts,
                extra_roots: &self.extra_roots,
                policy: policy.as_ref(),
                dinfo: &self.dinfo,
                to_domain: &to_domain,
            };

            let attempt = tokio::time::timeout(
                Duration::from_secs(self.config.timeouts.total_secs),
                transaction.execute(),
            )
            .await
            .unwrap_or_else(|_| {
                Err(TemporaryError::Timeout(format!(
                    "transaction with {mx} exceeded {}s",
                    self.config.timeouts.total_secs
                ))
                .into())
            });

            match attempt {
                Ok(()) => {
                    tracing::info!("delivered {to} via {mx}");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("attempt via {mx} failed: {e}");
                    errors.push(e);
                }
            }
        }

        // Every host failed (or was ruled out). Permanent only when
        // every actual attempt failed permanently.
        let Some(last) = errors.last() else {
            return Err(TemporaryError::NoUsableMx(to_domain).into());
        };
        if errors.iter().all(DeliveryError::is_permanent) {
            return Err(last.clone());
        }
        let last_transient = errors
            .iter()
            .rev()
            .find(|e| e.is_temporary())
            .unwrap_or(last);
        Err(last_transient.clone())
    }
}
