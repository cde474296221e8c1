//! Alias resolution: mapping an envelope recipient to the list of
//! delivery targets it actually stands for.
//!
//! The resolver owns a table of aliases parsed from per-domain files,
//! normalisation rules (drop characters and suffix separators), a
//! user-existence predicate supplied by the caller, and an optional
//! external hook program. Expansion is depth-bounded; remote addresses
//! pass through untouched.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
mod hook;
pub mod parser;
mod resolver;

pub use error::{BoxError, HookError, ResolverError};
pub use postrider_common::Recipient;
pub use resolver::{Resolver, UserExistence};
