//! Canonical key encoding
//!
//! Turns a scalar or flat composite key into a stable string identity. Scalars are
//! type tagged (`s3:abc`, `n:42`, `b:true`) and strings are length prefixed, so a
//! composite such as `["x", "y"]` (`c2[s1:x|s1:y]`) can never collide with
//! `["x,y"]` (`c1[s3:x,y]`) and the string `"1"` never collides with the number `1`.

use crate::{LoaderError, LoaderResult};
use serde_json::Value;
use std::fmt;

/// Stable, comparable identity of a lookup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Encode a key, see [`encode`]
    pub fn new(key: &Value) -> LoaderResult<Self> {
        encode(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether the key was built from an ordered sequence of scalars
    pub fn is_composite(&self) -> bool {
        self.0.starts_with('c')
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode a scalar or flat composite key
///
/// Strings, numbers and booleans are scalars. Arrays of scalars are composite keys.
/// `null`, objects, empty arrays and nested arrays are rejected with
/// [`LoaderError::InvalidKey`].
pub fn encode(key: &Value) -> LoaderResult<CanonicalKey> {
    let mut out = String::new();
    match key {
        Value::Array(parts) => {
            if parts.is_empty() {
                return Err(LoaderError::InvalidKey(
                    "composite key must have at least one component".into(),
                ));
            }
            out.push('c');
            out.push_str(&parts.len().to_string());
            out.push('[');
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push('|');
                }
                encode_scalar(part, &mut out).map_err(|reason| {
                    LoaderError::InvalidKey(format!("component {} of {}: {}", i, key, reason))
                })?;
            }
            out.push(']');
        }
        scalar => {
            encode_scalar(scalar, &mut out)
                .map_err(|reason| LoaderError::InvalidKey(format!("{}: {}", key, reason)))?;
        }
    }
    Ok(CanonicalKey(out))
}

/// Encode every key, failing on the first one that cannot be canonicalized
pub fn encode_many(keys: &[Value]) -> LoaderResult<Vec<CanonicalKey>> {
    keys.iter().map(encode).collect()
}

fn encode_scalar(value: &Value, out: &mut String) -> Result<(), &'static str> {
    match value {
        Value::String(s) => {
            out.push('s');
            out.push_str(&s.len().to_string());
            out.push(':');
            out.push_str(s);
        }
        Value::Number(n) => {
            out.push_str("n:");
            out.push_str(&n.to_string());
        }
        Value::Bool(b) => {
            out.push_str(if *b { "b:true" } else { "b:false" });
        }
        Value::Null => return Err("null is not a valid key"),
        Value::Array(_) => return Err("nested composite keys are not supported"),
        Value::Object(_) => return Err("objects are not valid keys"),
    }
    Ok(())
}
