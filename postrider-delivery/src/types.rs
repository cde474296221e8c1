//! Configuration types for the courier.

use serde::{Deserialize, Serialize};

/// Per-operation SMTP timeouts, carved out of the overall transaction
/// budget. Hung reads at any step fail the attempt as temporary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Connection establishment (default: 30 seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Waiting for the 220 greeting (default: 30 seconds).
    #[serde(default = "default_greeting_timeout")]
    pub greeting_secs: u64,

    /// EHLO, before and after STARTTLS (default: 30 seconds).
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// STARTTLS command plus the TLS handshake (default: 30 seconds).
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// MAIL FROM (default: 30 seconds).
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// RCPT TO (default: 30 seconds).
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// DATA and message transmission; longer to accommodate large
    /// messages (default: 120 seconds).
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// QUIT (default: 10 seconds).
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,

    /// The whole per-host transaction (default: 300 seconds).
    #[serde(default = "default_total_timeout")]
    pub total_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            greeting_secs: default_greeting_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
            total_secs: default_total_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_greeting_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

const fn default_total_timeout() -> u64 {
    300
}

/// Courier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Name announced in EHLO.
    #[serde(default = "default_hello_name")]
    pub hello_name: String,

    /// Port to contact mail exchangers on. 25 in production; tests
    /// point this at a local server.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Per-operation timeouts.
    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            hello_name: default_hello_name(),
            smtp_port: default_smtp_port(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

fn default_hello_name() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    25
}
