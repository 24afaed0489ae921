//! The envelope exchanged inside each frame: the query (or response)
//! JSON text plus an ordered list of binary blobs.
//!
//! The encoding is bincode's fixed layout: length-prefixed JSON bytes, a
//! blob count, then each blob length-prefixed. Blob order is preserved
//! and the JSON is never interleaved with blob payloads, so the form is
//! stable between client and server.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub json: String,
    pub blobs: Vec<Vec<u8>>,
}

#[derive(Debug, Error)]
#[error("bad envelope: {0}")]
pub struct BadEnvelope(#[from] bincode::Error);

impl Envelope {
    pub fn new(json: impl Into<String>, blobs: Vec<Vec<u8>>) -> Self {
        Envelope {
            json: json.into(),
            blobs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BadEnvelope> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BadEnvelope> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let envelope = Envelope::new(
            r#"[{"FindEntity": {}}]"#,
            vec![vec![0x89, 0x50, 0x4e], vec![], vec![1, 2, 3, 4]],
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Envelope::decode(&[0xff; 3]).is_err());
    }

    #[test]
    fn blob_order_is_preserved() {
        let envelope = Envelope::new("[]", vec![vec![1], vec![2], vec![3]]);
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.blobs, vec![vec![1], vec![2], vec![3]]);
    }
}
