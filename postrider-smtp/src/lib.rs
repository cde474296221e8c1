//! Outbound SMTP client used by the postrider courier.
//!
//! This crate only speaks the client side of ESMTP: connecting, reading
//! multi-line responses, upgrading via STARTTLS, and streaming dot-stuffed
//! message data. Policy (which hosts to talk to, what security level to
//! demand) lives in `postrider-delivery`; this layer reports what happened
//! on the wire and lets the caller decide.

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod client;

pub use client::{ClientError, Response, SmtpClient};
