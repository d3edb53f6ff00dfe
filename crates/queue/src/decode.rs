//! Decoding of drained batches.

use utter_transcript::Fragment;

/// A queued entry that could not be decoded.
#[derive(Debug)]
pub struct DecodeFailure {
    /// Position of the entry within the drained batch.
    pub index: usize,
    pub raw: String,
    pub error: serde_json::Error,
}

/// A drained batch split into usable fragments and rejects.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Decoded fragments in arrival order.
    pub fragments: Vec<Fragment>,
    pub failures: Vec<DecodeFailure>,
}

impl DecodedBatch {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.failures.is_empty()
    }
}

/// Decode every entry independently; a malformed entry never affects its
/// neighbours.
pub fn decode_batch(raws: Vec<String>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for (index, raw) in raws.into_iter().enumerate() {
        match Fragment::from_json(&raw) {
            Ok(fragment) => batch.fragments.push(fragment),
            Err(error) => batch.failures.push(DecodeFailure { index, raw, error }),
        }
    }
    batch
}
