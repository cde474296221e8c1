//! Outbound delivery for postrider: MX discovery, the SMTP courier, and
//! local delivery through an MDA binary.
//!
//! The courier is handed `(from, to, message-bytes)` by the queue, finds
//! the mail exchangers for the recipient domain, and drives one SMTP
//! transaction per host until one accepts the message. Every failure
//! carries a permanent-or-transient verdict; retry scheduling belongs to
//! the queue, not to this crate.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod courier;
pub mod dns;
pub mod domaininfo;
pub mod error;
pub mod mda;
pub mod sts;
mod transaction;
pub mod types;

pub use courier::SmtpCourier;
pub use dns::{DnsError, DnsResolver, MxResolver};
pub use domaininfo::DomainInfo;
pub use error::{DeliveryError, PermanentError, TemporaryError};
pub use mda::Mda;
pub use sts::{NoPolicy, Policy, PolicyLookup, PolicyMode};
pub use types::{CourierConfig, SmtpTimeouts};
