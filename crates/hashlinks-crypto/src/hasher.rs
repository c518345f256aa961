use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use hashlinks_types::ContentHash;

/// Digest algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// 32-byte BLAKE3.
    #[default]
    #[serde(rename = "blake3")]
    Blake3,
    /// 64 bytes of BLAKE3 extended output.
    #[serde(rename = "blake3-512")]
    Blake3_512,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Blake3 => 32,
            Self::Blake3_512 => 64,
        }
    }

    /// Digest length in lowercase hex characters.
    pub fn hex_len(&self) -> usize {
        self.digest_len() * 2
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Blake3_512 => "blake3-512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HasherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(Self::Blake3),
            "blake3-512" => Ok(Self::Blake3_512),
            other => Err(HasherError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A content digest tagged with the algorithm that produced it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub(crate) fn from_raw(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    /// Parse a hex digest, checking its length against `algorithm`.
    pub fn from_hex(algorithm: HashAlgorithm, s: &str) -> Result<Self, HasherError> {
        if s.len() != algorithm.hex_len() {
            return Err(HasherError::InvalidDigest(format!(
                "expected {} hex characters for {algorithm}, got {}",
                algorithm.hex_len(),
                s.len()
            )));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(HasherError::InvalidDigest(format!(
                "digest is not lowercase hex: {s}"
            )));
        }
        let bytes = hex::decode(s).map_err(|e| HasherError::InvalidDigest(e.to_string()))?;
        Ok(Self { algorithm, bytes })
    }

    /// Compare against a hex digest. Malformed input never matches.
    pub fn matches_hex(&self, expected: &str) -> bool {
        match Self::from_hex(self.algorithm, &expected.to_ascii_lowercase()) {
            Ok(other) => constant_time_eq(&self.bytes, &other.bytes),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Plain content digest with no domain separation.
///
/// This is the digest published alongside resources and modules, so it must
/// be reproducible by any BLAKE3 implementation.
pub fn hash(data: &[u8], algorithm: HashAlgorithm) -> Digest {
    let bytes = match algorithm {
        HashAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        HashAlgorithm::Blake3_512 => {
            let mut out = vec![0u8; 64];
            let mut hasher = blake3::Hasher::new();
            hasher.update(data);
            hasher.finalize_xof().fill(&mut out);
            out
        }
    };
    Digest { algorithm, bytes }
}

/// Recompute the digest of `data` and compare it with `expected` (hex).
pub fn verify_hash(data: &[u8], expected: &str, algorithm: HashAlgorithm) -> bool {
    hash(data, algorithm).matches_hex(expected)
}

/// Domain-separated BLAKE3 hasher for internal keys.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a template body and a Merkle leaf with identical bytes
/// produce different hashes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for template cache keys.
    pub const TEMPLATE: Self = Self {
        domain: "hashlinks-template-v1",
    };
    /// Hasher for Merkle leaves.
    pub const MERKLE_LEAF: Self = Self {
        domain: "hashlinks-merkle-leaf-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    pub fn hash(&self, data: &[u8]) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ContentHash::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    pub fn hash_json<T: Serialize>(&self, value: &T) -> Result<ContentHash, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    pub fn verify(&self, data: &[u8], expected: &ContentHash) -> bool {
        self.hash(data) == *expected
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

// ---------------------------------------------------------------------------
// DigestCache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CachedDigest {
    digest: Digest,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct DigestCacheInner {
    entries: HashMap<(HashAlgorithm, ContentHash), CachedDigest>,
    order: VecDeque<(HashAlgorithm, ContentHash)>,
}

/// TTL- and size-bounded memo of computed digests.
///
/// Keyed by algorithm plus a BLAKE3 fingerprint of the content. Entries older
/// than the TTL are recomputed; once `max_entries` is reached the oldest
/// insertion is dropped.
#[derive(Debug)]
pub struct DigestCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<DigestCacheInner>,
}

impl DigestCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(DigestCacheInner::default()),
        }
    }

    /// Digest of `data`, served from the cache when fresh.
    pub fn hash(&self, data: &[u8], algorithm: HashAlgorithm) -> Digest {
        let key = (algorithm, ContentHash::from_bytes(data));
        {
            let inner = self.inner.lock().expect("lock poisoned");
            if let Some(cached) = inner.entries.get(&key) {
                if cached.inserted_at.elapsed() < self.ttl {
                    return cached.digest.clone();
                }
            }
        }

        let digest = hash(data, algorithm);
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.entries.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }
        while inner.entries.len() >= self.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.entries.insert(
            key,
            CachedDigest {
                digest: digest.clone(),
                inserted_at: Instant::now(),
            },
        );
        inner.order.push_back(key);
        digest
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }
}
