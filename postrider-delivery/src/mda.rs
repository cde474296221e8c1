//! Local delivery through an MDA binary.
//!
//! The configured program receives the message on stdin; `%from%`,
//! `%to%`, `%to_user%` and `%to_domain%` in its arguments are replaced
//! with sanitised envelope values. Exit 0 is success, exit 75
//! (EX_TEMPFAIL) is a temporary failure, anything else is permanent.

use std::process::Stdio;
use std::time::Duration;

use postrider_common::address;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{DeliveryError, PermanentError, TemporaryError};

/// sysexits.h EX_TEMPFAIL: the one exit code the queue retries.
const EX_TEMPFAIL: i32 = 75;

/// A mail delivery agent: a binary we hand local mail to.
#[derive(Debug, Clone)]
pub struct Mda {
    /// Program to run.
    pub binary: String,
    /// Arguments, possibly containing substitution tokens.
    pub args: Vec<String>,
    /// How long the program may take before it is killed.
    pub timeout: Duration,
}

impl Mda {
    /// Create an MDA runner.
    #[must_use]
    pub const fn new(binary: String, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary,
            args,
            timeout,
        }
    }

    /// Deliver `data` by piping it into the configured binary.
    ///
    /// The child is killed on timeout or if the caller drops the future.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-`EX_TEMPFAIL` exits are permanent;
    /// timeouts and `EX_TEMPFAIL` are temporary.
    pub async fn deliver(&self, from: &str, to: &str, data: &[u8]) -> Result<(), DeliveryError> {
        let (to_user, to_domain) = address::split(to);
        let from_s = sanitize_for_mda(from);
        let to_s = sanitize_for_mda(to);
        let to_user_s = sanitize_for_mda(to_user);
        let to_domain_s = sanitize_for_mda(to_domain);

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("%from%", &from_s)
                    .replace("%to_user%", &to_user_s)
                    .replace("%to_domain%", &to_domain_s)
                    .replace("%to%", &to_s)
            })
            .collect();

        tracing::debug!("running MDA: {} {args:?}", self.binary);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PermanentError::LocalDelivery(format!("failed to run {:?}: {e}", self.binary))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            DeliveryError::from(PermanentError::LocalDelivery(
                "MDA child has no stdin".to_string(),
            ))
        })?;

        let run = async {
            // A child may exit without reading its input (wrong flags,
            // early sanity check); that shows up as a broken pipe here
            // and the exit code is the verdict that matters.
            let data = data.to_vec();
            let feed = tokio::spawn(async move {
                let _ = stdin.write_all(&data).await;
                let _ = stdin.shutdown().await;
            });
            let output = child.wait_with_output().await;
            let _ = feed.await;
            output
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                tracing::warn!("MDA {:?} timed out", self.binary);
                return Err(TemporaryError::Timeout("local delivery timed out".to_string()).into());
            }
            Ok(Err(e)) => {
                return Err(PermanentError::LocalDelivery(format!(
                    "failed to collect MDA output: {e}"
                ))
                .into());
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.code() == Some(EX_TEMPFAIL) {
            return Err(TemporaryError::LocalDelivery(format!(
                "MDA exited with EX_TEMPFAIL: {stderr}"
            ))
            .into());
        }
        Err(PermanentError::LocalDelivery(format!(
            "MDA exited with {}: {stderr}",
            output.status
        ))
        .into())
    }

    /// Forwarding through the MDA. Not supported; always a permanent
    /// error.
    ///
    /// # Errors
    ///
    /// Always `PermanentError::ForwardNotSupported`.
    pub fn forward(
        &self,
        _from: &str,
        _to: &str,
        _data: &[u8],
        _servers: &[String],
    ) -> Result<(), DeliveryError> {
        Err(PermanentError::ForwardNotSupported.into())
    }
}

/// Strip everything outside letters, digits and `+ - _ ~` from a value
/// interpolated into the MDA command line. Multi-byte letters and
/// digits survive; separators, quotes and shell metacharacters do not.
#[must_use]
pub fn sanitize_for_mda(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '_' | '~'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        let cases = [
            // Unchanged.
            ("thisisfine", "thisisfine"),
            ("ñaca", "ñaca"),
            ("123-456_789", "123-456_789"),
            ("123+456~789", "123+456~789"),
            // Arabic-Indic digits are digits.
            ("١٢٣", "١٢٣"),
            // Problematic characters get dropped.
            ("with spaces", "withspaces"),
            ("with/slash", "withslash"),
            ("quote';andsemicolon", "quoteandsemicolon"),
            ("a;b", "ab"),
            ("\"test\"", "test"),
            ("back`tick`", "backtick"),
            // Punctuation dashes and format characters are outside the
            // allow-list, unlike ASCII '-'.
            ("١٩٩٩–١٢–٣١", "١٩٩٩١٢٣١"),
            ("موزه\u{200c}ها", "موزهها"),
        ];
        for (input, want) in cases {
            assert_eq!(sanitize_for_mda(input), want, "input {input:?}");
        }
    }
}
