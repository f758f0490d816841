//! Canonical JSON and SHA-256 digests for formulas.
//!
//! Object keys are sorted and integer-valued floats are written as integers,
//! so two formulas that evaluate identically hash identically regardless of
//! how their JSON was produced.

use sha2::{Digest, Sha256};

use crate::domain::error::Result;
use crate::formula::Formula;

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                serde_json::Value::Number(serde_json::Number::from(f as i64))
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}

/// Compact canonical JSON text for a value.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value))?)
}

/// SHA-256 hex digest of the formula's canonical JSON.
pub fn formula_digest(formula: &Formula) -> Result<String> {
    let value = serde_json::to_value(formula)?;
    let canonical = canonical_json(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
