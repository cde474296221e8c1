//! Delivery targets produced by alias resolution.

use serde::{Deserialize, Serialize};

/// A single delivery target.
///
/// Alias resolution turns one envelope recipient into a list of these:
/// either a concrete email address (local or remote), or a command line
/// the message should be piped into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Deliver to this address (remote via SMTP, or local).
    Email(String),
    /// Pipe the message into this command line (program plus arguments).
    Pipe(String),
}

impl Recipient {
    /// The address or command line this recipient carries.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Email(addr) | Self::Pipe(addr) => addr,
        }
    }

    /// Returns `true` for pipe recipients.
    #[must_use]
    pub const fn is_pipe(&self) -> bool {
        matches!(self, Self::Pipe(_))
    }
}
