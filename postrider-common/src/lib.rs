//! Shared building blocks for the postrider delivery engine.
//!
//! This crate holds the pieces every other postrider crate agrees on:
//! envelope address handling (splitting, drop-character and suffix
//! normalisation, IDNA folding), the [`Recipient`] type produced by alias
//! resolution, and the [`SecurityLevel`] ordering used by the outbound
//! courier.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod address;
pub mod logging;
pub mod recipient;
pub mod seclevel;

pub use recipient::Recipient;
pub use seclevel::SecurityLevel;
