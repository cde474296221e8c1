//! Error types for alias resolution.

use thiserror::Error;

/// Boxed error type used for caller-supplied predicate failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`crate::Resolver`].
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Alias expansion went deeper than the recursion limit, or looped.
    /// Treated as permanent by the queue.
    #[error("alias recursion limit exceeded")]
    RecursionLimitExceeded,

    /// The user-existence predicate failed; the underlying error is
    /// passed through unmodified.
    #[error("user lookup failed: {0}")]
    UserLookup(#[source] BoxError),

    /// The external resolve hook failed.
    #[error("resolve hook failed: {0}")]
    Hook(#[from] HookError),

    /// Filesystem error reading an aliases file.
    #[error("failed to read aliases file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure modes of the external resolve hook.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook exited with a non-zero status.
    #[error("hook exited with status {status}: {stderr}")]
    Exit {
        /// The raw exit status (or -1 when killed by a signal).
        status: i32,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The hook did not finish within its deadline.
    #[error("hook timed out")]
    TimedOut,

    /// The hook could not be spawned or its output not collected.
    #[error("failed to run hook: {0}")]
    Io(#[from] std::io::Error),
}
