//! Mail exchanger discovery.
//!
//! Implements MX lookups with the RFC 5321 section 5.1 implicit-MX
//! fallback: a domain with no MX records but an A/AAAA presence is its
//! own single mail exchanger. The resulting host list is sorted by
//! preference, shuffled within equal-preference groups, deduplicated,
//! and capped to bound the per-recipient effort.

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use thiserror::Error;

/// Cap on how many exchangers one delivery will ever walk.
const MAX_MX_HOSTS: usize = 5;

/// Errors from MX discovery.
///
/// `InvalidDomain` is the only permanent kind; everything else about DNS
/// can improve by retrying.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    /// The domain does not survive IDNA conversion to a hostname.
    #[error("invalid domain name: {0}")]
    InvalidDomain(String),

    /// The query failed (timeout, server failure, network trouble).
    #[error("DNS lookup failed: {0}")]
    Lookup(String),
}

impl DnsError {
    /// Returns `true` if retrying the lookup might help.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }
}

/// Resolves a recipient domain to an ordered list of mail exchangers.
///
/// A trait so the courier can be driven against fixed host lists in
/// tests; production uses [`DnsResolver`].
#[async_trait]
pub trait MxResolver: Send + Sync {
    /// The hosts to attempt, in order. An empty list means the domain
    /// answered but offers no mail servers.
    async fn lookup_mxs(&self, domain: &str) -> Result<Vec<String>, DnsError>;
}

/// Production MX resolver over the system DNS configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
}

impl DnsResolver {
    /// Create a resolver from the system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be loaded.
    pub fn new() -> Result<Self, DnsError> {
        Self::with_options(ResolverOpts::default())
    }

    /// Create a resolver with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be loaded.
    pub fn with_options(opts: ResolverOpts) -> Result<Self, DnsError> {
        let resolver = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| DnsError::Lookup(format!("failed to read DNS config: {e}")))?
            .with_options(opts)
            .build();
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxResolver for DnsResolver {
    async fn lookup_mxs(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let domain = idna::domain_to_ascii_strict(domain)
            .map_err(|e| DnsError::InvalidDomain(format!("{domain:.64}: {e}")))?;

        match self.resolver.mx_lookup(&domain).await {
            Ok(lookup) => {
                let records: Vec<(u16, String)> = lookup
                    .iter()
                    .map(|mx| (mx.preference(), mx.exchange().to_utf8()))
                    .collect();
                let hosts = prepare_mx_list(records);
                tracing::debug!("MX records for {domain}: {hosts:?}");
                Ok(hosts)
            }
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                // No MX records: the domain itself is the implicit MX.
                // Whether it resolves at all is the connect step's
                // problem.
                tracing::debug!("no MX records for {domain}, using implicit MX");
                Ok(vec![domain])
            }
            Err(err) => Err(DnsError::Lookup(err.to_string())),
        }
    }
}

/// Sort by preference, shuffle equal-preference groups (RFC 5321
/// section 5.1 load distribution), deduplicate by host, and truncate to
/// [`MAX_MX_HOSTS`].
fn prepare_mx_list(mut records: Vec<(u16, String)>) -> Vec<String> {
    records.sort_by_key(|(preference, _)| *preference);
    shuffle_equal_preference(&mut records);

    let mut hosts = Vec::new();
    for (_, host) in records {
        let host = host.trim_end_matches('.').to_lowercase();
        if host.is_empty() || hosts.contains(&host) {
            continue;
        }
        hosts.push(host);
        if hosts.len() == MAX_MX_HOSTS {
            break;
        }
    }
    hosts
}

/// Shuffle hosts within each equal-preference group, preserving the
/// preference order across groups.
fn shuffle_equal_preference(records: &mut [(u16, String)]) {
    use rand::seq::SliceRandom;

    let mut start = 0;
    while start < records.len() {
        let preference = records[start].0;
        let mut end = start + 1;
        while end < records.len() && records[end].0 == preference {
            end += 1;
        }
        if end - start > 1 {
            records[start..end].shuffle(&mut rand::rng());
        }
        start = end;
    }
}
