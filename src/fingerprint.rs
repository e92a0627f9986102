//! Cache key derivation for calls.
//!
//! A [`Fingerprint`] identifies a call by `(service, operation, params)`.
//! Service and operation are written as JSON string literals, params as
//! canonical compact JSON with object keys sorted at every depth, and the
//! three parts are joined with `'\n'`. JSON never emits a raw newline, so
//! the separator cannot occur inside a component:
//!
//! ```text
//! "dynamodb"
//! "GetItem"
//! {"Key":{"id":1},"TableName":"users"}
//! ```
//!
//! Building a fingerprint never fails. Params that serde cannot turn into
//! JSON (e.g. maps with non-string keys) fall back to their `Debug` text
//! behind a `~` marker, which no JSON document starts with.

use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

const SEPARATOR: char = '\n';

/// Prefix marking a params component rendered via `Debug`.
const FALLBACK_MARKER: char = '~';

/// Deterministic cache key derived from a call's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build the fingerprint for a call.
    ///
    /// Structurally identical params produce byte-identical fingerprints
    /// regardless of field order. `()`, `None` and `Value::Null` all
    /// serialize to the token `null`.
    pub fn build<P>(service: &str, operation: &str, params: &P) -> Self
    where
        P: Serialize + fmt::Debug + ?Sized,
    {
        let mut key = String::new();
        write_json_str(service, &mut key);
        key.push(SEPARATOR);
        write_json_str(operation, &mut key);
        key.push(SEPARATOR);

        match serde_json::to_value(params) {
            Ok(value) => write_canonical(&value, &mut key),
            Err(e) => {
                debug!(service, operation, error = %e, "params not serializable, using debug form");
                key.push(FALLBACK_MARKER);
                key.push_str(&format!("{params:?}").replace(SEPARATOR, "\\n"));
            }
        }

        Self(key)
    }

    /// The fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Fingerprint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn write_json_str(s: &str, out: &mut String) {
    // Display on a string Value yields the quoted, escaped literal.
    out.push_str(&Value::from(s).to_string());
}

/// Write `value` as compact JSON with object keys sorted recursively.
///
/// Sorting here rather than relying on `serde_json::Map` ordering keeps the
/// output stable even when `preserve_order` is enabled elsewhere in the
/// dependency graph.
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
                write_json_str(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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
