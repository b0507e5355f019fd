//! Canonical JSON serialization.
//!
//! Semantically identical JSON documents must hash identically, so every
//! payload is rendered through one deterministic serializer before it
//! reaches SHA-256:
//!
//! - Object keys sorted lexicographically by byte order.
//! - Numbers in minimal representation (no trailing zeros).
//! - Strings with minimal escaping (only `"`, `\`, and control bytes).
//! - Arrays in original order.
//! - No insignificant whitespace.
//!
//! ## Example
//!
//! ```rust
//! use kiwi_integrity::canonical_json;
//! use serde_json::json;
//!
//! let obj1 = json!({"b": 1, "a": 2});
//! let obj2 = json!({"a": 2, "b": 1});
//!
//! assert_eq!(canonical_json(&obj1).unwrap(), canonical_json(&obj2).unwrap());
//! assert_eq!(canonical_json(&obj1).unwrap(), r#"{"a":2,"b":1}"#);
//! ```

use crate::error::IntegrityError;
use sha2::{Digest, Sha256};

/// Serializes a JSON value to its canonical string form.
///
/// # Errors
///
/// Returns [`IntegrityError::Canonical`] when the value contains a number
/// with no finite JSON representation.
pub fn canonical_json(value: &serde_json::Value) -> Result<String, IntegrityError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Computes the SHA-256 hex digest of a canonicalized JSON value.
///
/// This is the primary entry point for integrity hashing: the value is
/// canonicalized first, then hashed, so key order in the input never
/// affects the digest.
///
/// # Example
///
/// ```rust
/// use kiwi_integrity::hash_canonical;
/// use serde_json::json;
///
/// let a = hash_canonical(&json!({"b": 1, "a": 2})).unwrap();
/// let b = hash_canonical(&json!({"a": 2, "b": 1})).unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn hash_canonical(value: &serde_json::Value) -> Result<String, IntegrityError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn write_value(value: &serde_json::Value, out: &mut String) -> Result<(), IntegrityError> {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(true) => out.push_str("true"),
        serde_json::Value::Bool(false) => out.push_str("false"),
        serde_json::Value::Number(n) => write_number(n, out)?,
        serde_json::Value::String(s) => write_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            // Keys sorted by byte order. The payload keys produced by this
            // kernel are ASCII identifiers, where byte order and code-point
            // order coincide.
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));

            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(val, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Numbers serialize in minimal form: integers without a fraction part,
/// floats through Rust's shortest round-trip formatting.
fn write_number(n: &serde_json::Number, out: &mut String) -> Result<(), IntegrityError> {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                out.push_str(&(f as i64).to_string());
            } else {
                out.push_str(&format!("{}", f));
            }
            Ok(())
        }
        _ => Err(IntegrityError::Canonical(format!(
            "number {} has no canonical form",
            n
        ))),
    }
}

/// Minimal escaping: `"`, `\`, the short control escapes, and `\uXXXX`
/// for the remaining control bytes. Forward slashes and non-ASCII
/// characters pass through unescaped.
fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\x0C' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\x20' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
