//! Line-oriented aliases file parser.
//!
//! Format, one alias per line:
//!
//! ```text
//! local-part: target[, target]*
//! ```
//!
//! `#` starts a comment; blank and comment-only lines are skipped.
//! Targets are either `|command` (pipe the message into `command`) or an
//! email address; a bare local part means an address on the file's
//! domain. Malformed lines are dropped, never fatal: this parser gets
//! fed arbitrary bytes by a fuzz target and must only ever skip.

use postrider_common::Recipient;

/// Parse a whole aliases file for `domain`.
///
/// Returns `(local_part, targets)` entries in file order, duplicates
/// included; the caller applies last-wins and key canonicalisation.
#[must_use]
pub fn parse_file(domain: &str, content: &str) -> Vec<(String, Vec<Recipient>)> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");
        let Some((lhs, rhs)) = line.split_once(':') else {
            continue;
        };

        let lhs = lhs.trim();
        if lhs.is_empty() {
            continue;
        }
        // The left-hand side is a bare local part; a full address here
        // is a mistake and the line is dropped.
        if lhs.contains('@') {
            tracing::warn!("ignoring alias with '@' in the left-hand side: {lhs:?}");
            continue;
        }

        let Some(targets) = parse_targets(domain, rhs) else {
            continue;
        };

        entries.push((lhs.to_string(), targets));
    }

    entries
}

/// Parse the right-hand side of an alias: a comma-separated list of
/// targets. Also used for resolve-hook output.
///
/// Returns `None` when the list is empty or contains an invalid pipe
/// target, in which case the whole alias is discarded.
#[must_use]
pub fn parse_targets(domain: &str, rhs: &str) -> Option<Vec<Recipient>> {
    let mut targets = Vec::new();

    for target in rhs.split(',') {
        let target = target.trim();
        if target.is_empty() {
            // Tolerate a trailing comma.
            continue;
        }

        if let Some(command) = target.strip_prefix('|') {
            let command = command.trim();
            if command.is_empty() {
                return None;
            }
            targets.push(Recipient::Pipe(command.to_string()));
        } else if target.contains('@') {
            targets.push(Recipient::Email(target.to_string()));
        } else {
            targets.push(Recipient::Email(format!("{target}@{domain}")));
        }
    }

    if targets.is_empty() {
        return None;
    }
    Some(targets)
}
