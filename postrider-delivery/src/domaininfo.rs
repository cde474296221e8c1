//! Per-domain delivery history: the highest security level ever achieved
//! and whether an STS policy was ever enforced.
//!
//! Both records are monotonic. The courier consults the store before
//! delivering and refuses to complete over a connection weaker than what
//! the domain has already demonstrated, which is what stops an attacker
//! who can strip STARTTLS from silently downgrading a peer.

use dashmap::DashMap;
use postrider_common::SecurityLevel;

#[derive(Debug, Clone, Copy, Default)]
struct DomainRecord {
    outgoing: Option<SecurityLevel>,
    sts_seen: bool,
}

/// Monotonic per-domain security records, keyed by recipient domain.
#[derive(Debug, Default)]
pub struct DomainInfo {
    records: DashMap<String, DomainRecord>,
}

impl DomainInfo {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether delivering to `domain` at `level` is acceptable, i.e. the
    /// level is at least what was recorded before. Never modifies the
    /// store.
    #[must_use]
    pub fn outgoing_sec_level(&self, domain: &str, level: SecurityLevel) -> bool {
        self.records
            .get(domain)
            .and_then(|r| r.outgoing)
            .is_none_or(|prev| level >= prev)
    }

    /// Record a successful delivery at `level`. The stored level only
    /// ever goes up; the compare-and-raise runs under the entry lock.
    pub fn record_outgoing(&self, domain: &str, level: SecurityLevel) {
        let mut entry = self.records.entry(domain.to_string()).or_default();
        if entry.outgoing.is_none_or(|prev| level > prev) {
            tracing::info!("{domain}: outgoing security level now {level}");
            entry.outgoing = Some(level);
        }
    }

    /// The level recorded for `domain`, if any delivery succeeded yet.
    #[must_use]
    pub fn outgoing_level(&self, domain: &str) -> Option<SecurityLevel> {
        self.records.get(domain).and_then(|r| r.outgoing)
    }

    /// Record that an enforcing STS policy was applied for `domain`.
    pub fn record_sts(&self, domain: &str) {
        let mut entry = self.records.entry(domain.to_string()).or_default();
        if !entry.sts_seen {
            tracing::info!("{domain}: STS policy enforced");
            entry.sts_seen = true;
        }
    }

    /// Whether an STS policy was ever enforced for `domain`.
    #[must_use]
    pub fn sts_seen(&self, domain: &str) -> bool {
        self.records.get(domain).is_some_and(|r| r.sts_seen)
    }
}
