use crate::errors::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A persisted payload together with its SHA-256 checksum.
///
/// Checkpoints are written through this envelope so a truncated or
/// hand-edited file is detected on load and ignored instead of seeding a
/// run with corrupt counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumEnvelope {
    /// The payload as a JSON string.
    pub payload: String,
    /// Hex-encoded SHA-256 of `payload`.
    pub checksum: String,
}

impl ChecksumEnvelope {
    pub fn new(payload: String) -> Self {
        let checksum = compute_checksum(&payload);
        Self { payload, checksum }
    }

    /// Serializes `value` to JSON and wraps it.
    pub fn seal<T: Serialize>(value: &T) -> Result<Self, AppError> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn is_valid(&self) -> bool {
        compute_checksum(&self.payload) == self.checksum
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses an envelope, verifies it and decodes the payload.
    ///
    /// Returns `None` for unparsable JSON, a checksum mismatch, or a payload
    /// that does not decode as `T`.
    pub fn open<T: DeserializeOwned>(serialized: &str) -> Option<T> {
        let envelope: ChecksumEnvelope = serde_json::from_str(serialized).ok()?;

        if !envelope.is_valid() {
            tracing::warn!(
                "Integrity check failed: checksum mismatch. Expected: {}, payload length: {}",
                envelope.checksum,
                envelope.payload.len()
            );
            return None;
        }

        match serde_json::from_str(&envelope.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Integrity check passed but payload did not decode: {}", e);
                None
            }
        }
    }
}

fn compute_checksum(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counters {
        processed: u64,
        last_id: String,
    }

    fn counters() -> Counters {
        Counters {
            processed: 42,
            last_id: "c-42".to_string(),
        }
    }

    #[test]
    fn test_seal_and_open() {
        let json = ChecksumEnvelope::seal(&counters()).unwrap().to_json().unwrap();
        assert_eq!(ChecksumEnvelope::open::<Counters>(&json), Some(counters()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let mut envelope = ChecksumEnvelope::seal(&counters()).unwrap();
        envelope.payload = envelope.payload.replace("42", "4200");
        assert!(!envelope.is_valid());

        let json = envelope.to_json().unwrap();
        assert_eq!(ChecksumEnvelope::open::<Counters>(&json), None);
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(ChecksumEnvelope::open::<Counters>("{not json"), None);
        assert_eq!(ChecksumEnvelope::open::<Counters>(""), None);
    }

    #[test]
    fn test_checksum_consistency() {
        let a = ChecksumEnvelope::new("same".to_string());
        let b = ChecksumEnvelope::new("same".to_string());
        assert_eq!(a.checksum, b.checksum);
    }
}
