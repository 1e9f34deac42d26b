//! SHA-256 helpers shared by trace ids, integrity digests and input summaries

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Field separator fed to the hasher between fields (ASCII unit separator)
const FIELD_SEPARATOR: &[u8] = &[0x1f];

/// Hash arbitrary bytes and return the lowercase hex digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Returns true if `value` looks like a hex-encoded SHA-256 digest
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Incremental hasher that separates fields so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[derive(Clone, Default)]
pub struct FieldHasher {
    inner: Sha256,
}

impl FieldHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one field
    pub fn field(&mut self, value: impl AsRef<[u8]>) -> &mut Self {
        let bytes = value.as_ref();
        self.inner.update((bytes.len() as u64).to_be_bytes());
        self.inner.update(bytes);
        self.inner.update(FIELD_SEPARATOR);
        self
    }

    /// Feed an optional field; `None` and `Some("")` hash differently
    pub fn optional_field(&mut self, value: Option<impl AsRef<[u8]>>) -> &mut Self {
        match value {
            Some(v) => {
                self.inner.update([1u8]);
                self.field(v)
            }
            None => {
                self.inner.update([0u8]);
                self.inner.update(FIELD_SEPARATOR);
                self
            }
        }
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Canonical JSON serialization (sorted keys, no whitespace)
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let contents: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", Value::String((*k).clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", contents.join(","))
        }
        Value::Array(arr) => {
            let contents: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", contents.join(","))
        }
        // Scalars render through Display, which is serde_json's compact form
        _ => value.to_string(),
    }
}
