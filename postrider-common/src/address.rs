//! Envelope address utilities.
//!
//! Addresses here are bare `user@domain` strings as they appear in SMTP
//! envelopes, not RFC 5322 header mailboxes. The normalisation helpers
//! implement the lookup form used by the alias resolver: configurable
//! "drop characters" are removed from the local part, and a configurable
//! set of "suffix separators" marks the start of an ignorable tag
//! (`user+tag@domain`).
//!
//! All local-part handling operates on code points, never bytes, so
//! multi-byte UTF-8 local parts survive untouched.

/// Split an address into `(local, domain)` at the **last** `@`.
///
/// An address without an `@` is treated as a bare local part with an
/// empty domain.
#[must_use]
pub fn split(addr: &str) -> (&str, &str) {
    addr.rsplit_once('@').unwrap_or((addr, ""))
}

/// Remove drop characters from the local part of `addr`.
///
/// Only occurrences *before* the first suffix separator are removed;
/// everything from the separator on (including further drop characters)
/// is kept verbatim. The domain is not touched.
///
/// This is idempotent: applying it twice yields the same result.
#[must_use]
pub fn remove_drop_characters(addr: &str, drop_chars: &str, suffix_seps: &str) -> String {
    let (user, domain) = split(addr);

    let mut cleaned = String::with_capacity(user.len());
    let mut in_suffix = false;
    for c in user.chars() {
        if !in_suffix && suffix_seps.contains(c) {
            in_suffix = true;
        }
        if in_suffix || !drop_chars.contains(c) {
            cleaned.push(c);
        }
    }

    rejoin(addr, &cleaned, domain)
}

/// Reduce `addr` to its canonical lookup form: drop characters removed,
/// the local part truncated at the first suffix separator, and the domain
/// lower-cased and IDNA-folded to its ASCII form.
///
/// The local part's case is preserved; callers that need a
/// case-insensitive key fold it themselves. A domain that fails IDNA
/// conversion is left lower-cased as-is (this helper is pure; the courier
/// treats IDNA failure on the delivery path as a permanent error).
#[must_use]
pub fn remove_drops_and_suffix(addr: &str, drop_chars: &str, suffix_seps: &str) -> String {
    let (user, domain) = split(addr);

    let cleaned: String = user
        .chars()
        .take_while(|c| !suffix_seps.contains(*c))
        .filter(|c| !drop_chars.contains(*c))
        .collect();

    rejoin(addr, &cleaned, &ascii_domain(domain))
}

/// Lower-case and IDNA-fold a domain, falling back to plain lower-casing
/// when the domain is not valid IDNA.
#[must_use]
pub fn ascii_domain(domain: &str) -> String {
    idna::domain_to_ascii(domain).unwrap_or_else(|_| domain.to_lowercase())
}

fn rejoin(original: &str, user: &str, domain: &str) -> String {
    if original.contains('@') {
        format!("{user}@{domain}")
    } else {
        user.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        assert_eq!(split("a@b"), ("a", "b"));
        assert_eq!(split("a@b@c"), ("a@b", "c"));
        assert_eq!(split("bare"), ("bare", ""));
        assert_eq!(split("@dom"), ("", "dom"));
    }

    #[test]
    fn test_remove_drop_characters() {
        let cases = [
            ("abc@def", "abc@def"),
            ("abc+blah@def", "abc+blah@def"),
            ("a.b@def", "ab@def"),
            ("a.b+c@def", "ab+c@def"),
            ("a.b+c.d@def", "ab+c.d@def"),
            ("a@def", "a@def"),
            ("a+b@def", "a+b@def"),
            // UTF-8 local parts, to make sure we index by code point.
            ("ñoño@def", "ñoño@def"),
            ("ñoño+blah@def", "ñoño+blah@def"),
            ("ño.ño@def", "ñoño@def"),
            ("ño.ño+blah@def", "ñoño+blah@def"),
            ("ño.ño+ña.ca@def", "ñoño+ña.ca@def"),
            ("ño.ño+ña.ña@def", "ñoño+ña.ña@def"),
            // The "other" drop char and separator must work too.
            ("a_b@def", "ab@def"),
            ("a_b-c@def", "ab-c@def"),
            ("a_b-c.d@def", "ab-c.d@def"),
            ("ño_ño-ña.ña@def", "ñoño-ña.ña@def"),
        ];
        for (addr, want) in cases {
            assert_eq!(
                remove_drop_characters(addr, "._", "-+"),
                want,
                "address {addr:?}"
            );
        }
    }

    #[test]
    fn test_remove_drops_and_suffix() {
        let cases = [
            ("abc@def", "abc@def"),
            ("abc+blah@def", "abc@def"),
            ("a.b~c@def", "abc@def"),
            ("a.bc+blah@def", "abc@def"),
            ("x.yz@def", "xyz@def"),
            ("x.yz@d.ef", "xyz@d.ef"),
            ("abc@DEF", "abc@def"),
        ];
        for (addr, want) in cases {
            assert_eq!(
                remove_drops_and_suffix(addr, ".~", "-+"),
                want,
                "address {addr:?}"
            );
        }
    }

    #[test]
    fn test_remove_drops_and_suffix_is_idempotent() {
        for addr in ["a.b~c-x.y@def", "ño.ño+tag@def", "plain@dom", "x@y"] {
            let once = remove_drops_and_suffix(addr, ".~", "-+");
            let twice = remove_drops_and_suffix(&once, ".~", "-+");
            assert_eq!(once, twice, "address {addr:?}");
        }
    }

    #[test]
    fn test_ascii_domain() {
        assert_eq!(ascii_domain("EXAMPLE.com"), "example.com");
        assert_eq!(ascii_domain("ñandú.com.ar"), "xn--and-6ma2c.com.ar");
        assert_eq!(ascii_domain(""), "");
    }

    #[test]
    fn test_no_at_sign() {
        assert_eq!(remove_drop_characters("a.b", ".", "+"), "ab");
        assert_eq!(remove_drops_and_suffix("a.b+c", ".", "+"), "ab");
    }
}
