//! SMTP client: connection handling, response parsing, STARTTLS.

mod error;
mod response;
#[allow(clippy::module_inception)]
mod client;
mod tls;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
