//! One-way fingerprint of invocation parameters for the audit trail

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of the fingerprint in hex characters
pub const FINGERPRINT_LEN: usize = 16;

/// SHA-256 of the canonical JSON form of `params`, truncated to
/// [`FINGERPRINT_LEN`] hex characters.
///
/// Object keys are sorted recursively, so two maps with the same entries
/// produce the same fingerprint regardless of insertion order.
pub fn fingerprint_params(params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
