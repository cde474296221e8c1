//! The alias resolver.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use postrider_common::{Recipient, address};
use tokio::sync::RwLock;

use crate::error::{BoxError, ResolverError};
use crate::{hook, parser};

/// Maximum alias expansion depth. Cycles are also caught by a visited
/// set on the expansion path, but a deep non-cyclic chain hits this.
const RECURSION_LIMIT: usize = 10;

/// Predicate answering "does this user exist on this domain?".
///
/// Called with the canonical (drop- and suffix-stripped, lower-cased)
/// local part. Errors are propagated unmodified out of
/// [`Resolver::resolve`].
#[async_trait]
pub trait UserExistence: Send + Sync {
    /// Whether `user@domain` is a known local user.
    async fn exists(&self, user: &str, domain: &str) -> Result<bool, BoxError>;
}

#[async_trait]
impl<F> UserExistence for F
where
    F: Fn(&str, &str) -> Result<bool, BoxError> + Send + Sync,
{
    async fn exists(&self, user: &str, domain: &str) -> Result<bool, BoxError> {
        self(user, domain)
    }
}

/// Normalisation settings plus the optional external hook.
#[derive(Debug, Clone, Default)]
struct Config {
    drop_chars: String,
    suffix_seps: String,
    hook: Option<PathBuf>,
}

/// One published snapshot of the alias table. Readers clone the `Arc`
/// and never see a half-updated table.
#[derive(Debug, Clone, Default)]
struct Table {
    domains: HashSet<String>,
    aliases: HashMap<String, Vec<Recipient>>,
}

#[derive(Default)]
struct State {
    table: Arc<Table>,
    config: Config,
    /// Files registered via `add_aliases_file`, in registration order.
    files: Vec<(String, PathBuf)>,
    /// Domains registered directly, without a file.
    bare_domains: HashSet<String>,
}

/// Outcome of a single table lookup.
enum Lookup {
    /// Alias targets that still need expansion.
    Aliases(Vec<Recipient>),
    /// No alias matched; deliver to this (canonical) address directly.
    Terminal(String),
}

/// Expands an address into its final delivery targets.
///
/// Addresses on domains the resolver is not authoritative for pass
/// through unchanged. Local addresses go through the alias table, the
/// optional external hook, the user-existence predicate and the
/// per-domain catch-all, recursively, in that order.
pub struct Resolver {
    user_db: Box<dyn UserExistence>,
    state: RwLock<State>,
}

impl Resolver {
    /// Create a resolver over the given user-existence predicate.
    pub fn new(user_db: impl UserExistence + 'static) -> Self {
        Self {
            user_db: Box::new(user_db),
            state: RwLock::new(State::default()),
        }
    }

    /// Mark `domain` as local, so its addresses are eligible for
    /// rewriting and expansion.
    pub async fn add_domain(&self, domain: &str) {
        let domain = address::ascii_domain(domain);
        let mut st = self.state.write().await;
        st.bare_domains.insert(domain.clone());
        let mut table = (*st.table).clone();
        table.domains.insert(domain);
        st.table = Arc::new(table);
    }

    /// Set the characters silently dropped from local parts before
    /// lookup (e.g. `"."` for Gmail-style dots).
    pub async fn set_drop_characters(&self, chars: &str) {
        self.state.write().await.config.drop_chars = chars.to_string();
    }

    /// Set the characters that begin an ignorable local-part suffix
    /// (e.g. `"+-"`).
    pub async fn set_suffix_separators(&self, seps: &str) {
        self.state.write().await.config.suffix_seps = seps.to_string();
    }

    /// Configure the external resolve hook executable.
    pub async fn set_resolve_hook(&self, path: impl Into<PathBuf> + Send) {
        self.state.write().await.config.hook = Some(path.into());
    }

    /// Parse `path` as the aliases file for `domain`, merge its entries
    /// into the table, and register it for [`Resolver::reload`].
    ///
    /// Malformed lines are skipped; only filesystem errors fail the
    /// call. Returns the number of aliases the file contributed.
    ///
    /// # Errors
    ///
    /// Returns `ResolverError::Io` when the file cannot be read.
    pub async fn add_aliases_file(
        &self,
        domain: &str,
        path: impl AsRef<Path> + Send,
    ) -> Result<usize, ResolverError> {
        let path = path.as_ref().to_path_buf();
        let domain = address::ascii_domain(domain);
        let content = tokio::fs::read_to_string(&path).await?;

        let mut st = self.state.write().await;
        let file_map = build_file_map(&domain, &content, &st.config);
        let count = file_map.len();

        let mut table = (*st.table).clone();
        table.domains.insert(domain.clone());
        table.aliases.extend(file_map);
        st.table = Arc::new(table);
        st.files.push((domain, path));

        Ok(count)
    }

    /// Re-parse every registered aliases file and atomically swap in the
    /// result. On any filesystem error the previous table stays.
    ///
    /// # Errors
    ///
    /// Returns `ResolverError::Io` when any registered file cannot be
    /// read.
    pub async fn reload(&self) -> Result<(), ResolverError> {
        let (files, config, bare_domains) = {
            let st = self.state.read().await;
            (
                st.files.clone(),
                st.config.clone(),
                st.bare_domains.clone(),
            )
        };

        // Parse everything outside the lock; fail without touching the
        // published table.
        let mut domains = bare_domains;
        let mut aliases = HashMap::new();
        for (domain, path) in &files {
            let content = tokio::fs::read_to_string(path).await?;
            domains.insert(domain.clone());
            aliases.extend(build_file_map(domain, &content, &config));
        }

        let mut st = self.state.write().await;
        st.table = Arc::new(Table { domains, aliases });
        tracing::info!("reloaded {} aliases from {} files", st.table.aliases.len(), files.len());
        Ok(())
    }

    /// Expand `addr` into its delivery targets.
    ///
    /// Remote addresses come back as a single unchanged email recipient.
    /// Expansion is depth-first in source order and bounded by
    /// [`RECURSION_LIMIT`].
    ///
    /// # Errors
    ///
    /// `RecursionLimitExceeded` on alias loops or over-deep chains;
    /// predicate and hook errors are propagated.
    pub async fn resolve(&self, addr: &str) -> Result<Vec<Recipient>, ResolverError> {
        let (table, config) = self.snapshot().await;

        let mut out = Vec::new();
        let mut stack: Vec<(Recipient, Vec<String>)> =
            vec![(Recipient::Email(addr.to_string()), Vec::new())];

        while let Some((rcpt, ancestors)) = stack.pop() {
            let addr = match rcpt {
                Recipient::Pipe(_) => {
                    out.push(rcpt);
                    continue;
                }
                Recipient::Email(addr) => addr,
            };

            if ancestors.len() >= RECURSION_LIMIT || ancestors.contains(&addr) {
                return Err(ResolverError::RecursionLimitExceeded);
            }

            let (_, domain) = address::split(&addr);
            if !table.domains.contains(&address::ascii_domain(domain)) {
                out.push(Recipient::Email(addr));
                continue;
            }

            match self.lookup(&table, &config, &addr).await? {
                Lookup::Terminal(canonical) => out.push(Recipient::Email(canonical)),
                Lookup::Aliases(rcpts) => {
                    let mut path = ancestors;
                    path.push(addr);
                    for rcpt in rcpts.into_iter().rev() {
                        stack.push((rcpt, path.clone()));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Whether `addr` would resolve to something other than a plain
    /// bounce: an alias, a catch-all, a known user, or a hook answer.
    ///
    /// Never recurses; lookup errors surface as `false`.
    pub async fn exists(&self, addr: &str) -> bool {
        let (table, config) = self.snapshot().await;

        let (user, domain) = address::split(addr);
        let domain_key = address::ascii_domain(domain);
        if !table.domains.contains(&domain_key) {
            return false;
        }

        let (exact, canonical) = lookup_keys(user, &domain_key, &config);
        if table.aliases.contains_key(&exact) || table.aliases.contains_key(&canonical) {
            return true;
        }
        if table.aliases.contains_key(&format!("*@{domain_key}")) {
            return true;
        }

        let (canonical_user, _) = address::split(&canonical);
        if matches!(
            self.user_db.exists(canonical_user, &domain_key).await,
            Ok(true)
        ) {
            return true;
        }

        if let Some(hook_path) = &config.hook
            && let Ok(stdout) = hook::run(hook_path, &canonical).await
            && parser::parse_targets(&domain_key, stdout.trim()).is_some()
        {
            return true;
        }

        false
    }

    async fn snapshot(&self) -> (Arc<Table>, Config) {
        let st = self.state.read().await;
        (Arc::clone(&st.table), st.config.clone())
    }

    /// One level of lookup for a local address: alias table (exact key
    /// first, canonical second), then the hook, then the user predicate,
    /// then the catch-all.
    async fn lookup(
        &self,
        table: &Table,
        config: &Config,
        addr: &str,
    ) -> Result<Lookup, ResolverError> {
        let (user, domain) = address::split(addr);
        let domain_key = address::ascii_domain(domain);
        let (exact, canonical) = lookup_keys(user, &domain_key, config);

        if let Some(rcpts) = table.aliases.get(&exact) {
            return Ok(Lookup::Aliases(rcpts.clone()));
        }
        if let Some(rcpts) = table.aliases.get(&canonical) {
            return Ok(Lookup::Aliases(rcpts.clone()));
        }

        if let Some(hook_path) = &config.hook {
            let stdout = hook::run(hook_path, &canonical).await?;
            let stdout = stdout.trim();
            if !stdout.is_empty()
                && let Some(targets) = parser::parse_targets(&domain_key, stdout)
            {
                tracing::debug!("hook resolved {canonical} to {} targets", targets.len());
                return Ok(Lookup::Aliases(targets));
            }
        }

        let (canonical_user, _) = address::split(&canonical);
        match self.user_db.exists(canonical_user, &domain_key).await {
            Ok(true) => return Ok(Lookup::Terminal(canonical)),
            Ok(false) => {}
            Err(e) => return Err(ResolverError::UserLookup(e)),
        }

        if let Some(rcpts) = table.aliases.get(&format!("*@{domain_key}")) {
            return Ok(Lookup::Aliases(rcpts.clone()));
        }

        Ok(Lookup::Terminal(canonical))
    }

    /// Test hook: install a raw alias table, keys exactly as stored.
    #[cfg(test)]
    async fn set_aliases(&self, entries: Vec<(&str, Vec<Recipient>)>) {
        let mut st = self.state.write().await;
        let mut table = (*st.table).clone();
        table.aliases = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        st.table = Arc::new(table);
    }
}

/// The two lookup keys for a local part: drop characters removed with
/// the suffix kept, and the fully canonical form. The local part is
/// lower-cased the same way the parser lower-cases stored keys.
fn lookup_keys(user: &str, domain_key: &str, config: &Config) -> (String, String) {
    let lowered = format!("{}@{}", user.to_lowercase(), domain_key);
    let exact =
        address::remove_drop_characters(&lowered, &config.drop_chars, &config.suffix_seps);
    let canonical =
        address::remove_drops_and_suffix(&lowered, &config.drop_chars, &config.suffix_seps);
    (exact, canonical)
}

/// Parse one file's content into its table entries, applying key
/// canonicalisation and last-wins for duplicate left-hand sides.
///
/// Targets are stored as written (bare local parts qualified with the
/// file's domain); local-domain targets pick up their canonical form
/// through the recursive resolve path, remote ones stay verbatim.
fn build_file_map(
    domain: &str,
    content: &str,
    config: &Config,
) -> HashMap<String, Vec<Recipient>> {
    let mut map = HashMap::new();
    for (lhs, targets) in parser::parse_file(domain, content) {
        let key = if lhs == "*" {
            format!("*@{domain}")
        } else {
            let (exact, _) = lookup_keys(&lhs, domain, config);
            exact
        };
        map.insert(key, targets);
    }
    map
}
