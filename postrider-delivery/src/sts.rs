//! MTA-STS policy model and MX matching.
//!
//! Policy discovery (the DNS TXT record and the HTTPS fetch) is an outer
//! concern: the courier is handed an already-looked-up [`Policy`]
//! through the [`PolicyLookup`] seam and only enforces it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a policy asks of the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Report violations but deliver anyway.
    Testing,
    /// Require a validated TLS connection to a listed MX.
    Enforce,
}

/// A published MTA-STS policy for a recipient domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Testing or enforce.
    pub mode: PolicyMode,
    /// MX patterns the domain commits to; `*.` prefixes match exactly
    /// one label.
    pub mxs: Vec<String>,
    /// How long the policy may be cached.
    pub max_age: Duration,
}

impl Policy {
    /// Whether `mx` is one of the hosts this policy allows.
    #[must_use]
    pub fn matches_mx(&self, mx: &str) -> bool {
        let mx = mx.trim_end_matches('.').to_lowercase();
        self.mxs.iter().any(|pattern| pattern_matches(pattern, &mx))
    }

    /// Whether the policy, fetched `age` ago, is still usable.
    ///
    /// Cache-backed [`PolicyLookup`] implementations must check this
    /// before handing out a cached policy, and return `None` (forcing
    /// a refetch) once it turns false.
    #[must_use]
    pub const fn is_fresh(&self, age: Duration) -> bool {
        age.as_secs() <= self.max_age.as_secs()
    }
}

/// Match one policy pattern against a (lower-cased) MX host. A leading
/// `*.` stands for exactly one label.
fn pattern_matches(pattern: &str, mx: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        let Some(head) = mx.strip_suffix(suffix) else {
            return false;
        };
        let Some(label) = head.strip_suffix('.') else {
            return false;
        };
        return !label.is_empty() && !label.contains('.');
    }

    pattern == mx
}

/// Where the courier gets policies from.
#[async_trait]
pub trait PolicyLookup: Send + Sync {
    /// The currently applicable policy for `domain`, if any.
    async fn policy_for(&self, domain: &str) -> Option<Policy>;
}

/// A lookup that never finds a policy; the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPolicy;

#[async_trait]
impl PolicyLookup for NoPolicy {
    async fn policy_for(&self, _domain: &str) -> Option<Policy> {
        None
    }
}
