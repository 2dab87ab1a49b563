// src/fingerprint.rs
// Content fingerprint: the dedup key for articles and the classification
// cache key. Whitespace-normalized, case-preserved, so trivial re-fetches of
// identical content hash identically.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// SHA-256 over `title + "\n" + body` with whitespace runs collapsed to
/// single spaces and ends trimmed. Returns 64 lowercase hex chars.
pub fn fingerprint(title: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collapse_ws(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(collapse_ws(body).as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_under_whitespace_noise() {
        let a = fingerprint("Acme launches  Foo", "Body text here.");
        let b = fingerprint("Acme launches Foo", "  Body\n\ttext   here. ");
        assert_eq!(a, b);
    }

    #[test]
    fn case_is_preserved() {
        let a = fingerprint("Acme launches Foo", "body");
        let b = fingerprint("acme launches foo", "body");
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_64_hex_chars() {
        let fp = fingerprint("t", "b");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn title_body_boundary_matters() {
        let a = fingerprint("ab", "c");
        let b = fingerprint("a", "bc");
        assert_ne!(a, b);
    }
}
