//! External resolve hook execution.
//!
//! The hook is an executable that receives the address being resolved as
//! its only argument. Exit 0 with alias-file-style targets on stdout
//! means "use these"; empty stdout means "no opinion"; a non-zero exit
//! fails the resolution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::HookError;

/// How long a hook may run before it is killed.
const HOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the hook for `addr` and return its stdout.
///
/// The child is killed if it outlives [`HOOK_TIMEOUT`] or if the caller
/// drops the future.
pub(crate) async fn run(path: &Path, addr: &str) -> Result<String, HookError> {
    let mut child = Command::new(path)
        .arg(addr)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Nothing to feed the hook; close stdin so it doesn't block reading.
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.shutdown().await;
    }

    let output = match tokio::time::timeout(HOOK_TIMEOUT, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            tracing::warn!(hook = %path.display(), "resolve hook timed out");
            return Err(HookError::TimedOut);
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::warn!(
            hook = %path.display(),
            status = ?output.status,
            "resolve hook failed: {stderr}"
        );
        return Err(HookError::Exit {
            status: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
