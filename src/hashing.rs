//! Content hashing for attribute maps (the audit chain's raw material).
//!
//! Two rules live here and nowhere else:
//!
//! 1. **Canonicalization.** An attribute map serializes to a single JSON
//!    object with keys sorted bytewise, nested object keys sorted the same
//!    way, numbers in their shortest round-trip decimal form, booleans as
//!    bare `true`/`false`, and strings normalized to Unicode NFC. No
//!    whitespace anywhere.
//! 2. **Chaining.** `new_hash = SHA256(prev_hash || "\n" || canonical)`,
//!    hex-lowercase. The very first link uses the empty string as
//!    `prev_hash`, still joined with the separator. The seed is frozen:
//!    deployments must never alter it after the first row is written.
//!
//! Any auditor holding the attribute history can replay the chain from the
//! empty seed and compare the result against the stored `content_hash`.
//!
//! # Examples
//!
//! ```rust
//! use gatewright::hashing::{canonical_attributes, chain_hash, EMPTY_SEED};
//! use serde_json::json;
//! use std::collections::BTreeMap;
//!
//! let mut attrs = BTreeMap::new();
//! attrs.insert("amount".to_string(), json!(100));
//! attrs.insert("risk".to_string(), json!(0.25));
//!
//! let canonical = canonical_attributes(&attrs);
//! assert_eq!(canonical, r#"{"amount":100,"risk":0.25}"#);
//!
//! let first = chain_hash(EMPTY_SEED, &canonical);
//! let second = chain_hash(&first, &canonical);
//! assert_ne!(first, second);
//! ```

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// The frozen seed for the first chain link: the empty string.
pub const EMPTY_SEED: &str = "";

/// Serialize an attribute map to its canonical JSON form.
///
/// The input is a `BTreeMap` on purpose: callers hand over a map that is
/// already key-sorted, and nested objects are re-sorted recursively here.
pub fn canonical_attributes(attrs: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(attrs.len() * 16 + 2);
    out.push('{');
    let mut first = true;
    for (key, value) in attrs {
        if !first {
            out.push(',');
        }
        first = false;
        write_canonical_string(key, &mut out);
        out.push(':');
        write_canonical_value(value, &mut out);
    }
    out.push('}');
    out
}

/// Compute the next chain link from the previous hash and a canonical
/// attribute serialization.
pub fn chain_hash(prev_hash: &str, canonical_attrs: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_attrs.as_bytes());
    hex_lower(&hasher.finalize())
}

fn write_canonical_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json renders numbers with itoa/ryu: shortest round-trip form.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_canonical_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            let mut first = true;
            for (key, item) in sorted {
                if !first {
                    out.push(',');
                }
                first = false;
                write_canonical_string(key, out);
                out.push(':');
                write_canonical_value(item, out);
            }
            out.push('}');
        }
    }
}

fn write_canonical_string(s: &str, out: &mut String) {
    let normalized: String = s.nfc().collect();
    // serde_json's escaping of a bare string is deterministic; reuse it
    // rather than maintaining a second escaper.
    match serde_json::to_string(&normalized) {
        Ok(escaped) => out.push_str(&escaped),
        // Strings cannot fail to serialize; keep the chain total anyway.
        Err(_) => out.push_str("\"\""),
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn keys_sorted_and_compact() {
        let map = attrs(&[("zeta", json!(1)), ("alpha", json!(true))]);
        assert_eq!(canonical_attributes(&map), r#"{"alpha":true,"zeta":1}"#);
    }

    #[test]
    fn nested_objects_resorted() {
        let map = attrs(&[("outer", json!({"b": 2, "a": 1}))]);
        assert_eq!(canonical_attributes(&map), r#"{"outer":{"a":1,"b":2}}"#);
    }

    #[test]
    fn numbers_shortest_roundtrip() {
        let map = attrs(&[("f", json!(0.5)), ("i", json!(100))]);
        assert_eq!(canonical_attributes(&map), r#"{"f":0.5,"i":100}"#);
    }

    #[test]
    fn nfc_normalization_applies() {
        // U+0065 U+0301 (e + combining acute) normalizes to U+00E9.
        let decomposed = attrs(&[("caf\u{0065}\u{0301}", json!(1))]);
        let composed = attrs(&[("caf\u{00e9}", json!(1))]);
        assert_eq!(
            canonical_attributes(&decomposed),
            canonical_attributes(&composed)
        );
    }

    #[test]
    fn chain_is_order_sensitive() {
        let a = canonical_attributes(&attrs(&[("k", json!(1))]));
        let b = canonical_attributes(&attrs(&[("k", json!(2))]));
        let ab = chain_hash(&chain_hash(EMPTY_SEED, &a), &b);
        let ba = chain_hash(&chain_hash(EMPTY_SEED, &b), &a);
        assert_ne!(ab, ba);
    }

    #[test]
    fn empty_seed_still_separated() {
        // SHA256("\n" + "{}"), not SHA256("{}").
        let canonical = canonical_attributes(&BTreeMap::new());
        let chained = chain_hash(EMPTY_SEED, &canonical);
        let mut plain = Sha256::new();
        plain.update(canonical.as_bytes());
        assert_ne!(chained, hex_lower(&plain.finalize()));
    }
}
