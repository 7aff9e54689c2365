//! Canonical, stable content-to-digest function used to detect change and
//! verify integrity (§4.2). Normalization makes the digest independent of key
//! ordering and of incidental fields the caller wants excluded.

mod normalize;

pub use normalize::{canonicalize, NormalizeOptions};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Selectable digest backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

/// Maps arbitrary JSON content (or raw bytes) to a fixed-length hex digest.
#[derive(Debug, Clone)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    options: NormalizeOptions,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::Sha256, NormalizeOptions::default())
    }
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm, options: NormalizeOptions) -> Self {
        Self { algorithm, options }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn digest_bytes(&self, bytes: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha384 => {
                let mut hasher = Sha384::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        }
    }

    /// Hash arbitrary structured content: canonicalize, serialize to a
    /// canonical UTF-8 byte stream, then digest.
    pub fn hash_value(&self, value: &serde_json::Value) -> String {
        let canonical = canonicalize(value, &self.options);
        let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
        self.digest_bytes(&bytes)
    }

    /// Hash binary content directly, with no normalization.
    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        self.digest_bytes(bytes)
    }

    /// Hash many values concurrently, bounded by `concurrency`.
    pub async fn hash_batch(
        self: &Arc<Self>,
        values: Vec<serde_json::Value>,
        concurrency: usize,
    ) -> Vec<String> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut futures = FuturesUnordered::new();
        for (idx, value) in values.into_iter().enumerate() {
            let hasher = Arc::clone(self);
            let permit = Arc::clone(&semaphore);
            futures.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                (idx, hasher.hash_value(&value))
            });
        }
        let mut results: Vec<(usize, String)> = Vec::new();
        while let Some(item) = futures.next().await {
            results.push(item);
        }
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, h)| h).collect()
    }
}
