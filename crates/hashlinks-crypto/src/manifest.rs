use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hasher::{hash, HashAlgorithm, HasherError};

/// Verification artifact for an executable module and its metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasmManifest {
    pub code_hash: String,
    pub metadata_hash: String,
    pub combined_hash: String,
    pub algorithm: HashAlgorithm,
    pub timestamp: DateTime<Utc>,
}

fn metadata_bytes(metadata: &serde_json::Value) -> Result<Vec<u8>, HasherError> {
    serde_json::to_vec(metadata).map_err(|e| HasherError::Serialization(e.to_string()))
}

fn combined(code_hash: &str, metadata_hash: &str, algorithm: HashAlgorithm) -> String {
    let mut joined = String::with_capacity(code_hash.len() + metadata_hash.len());
    joined.push_str(code_hash);
    joined.push_str(metadata_hash);
    hash(joined.as_bytes(), algorithm).to_hex()
}

/// Hash a module's code and metadata independently and bind them together.
pub fn create_wasm_manifest(
    code: &[u8],
    metadata: &serde_json::Value,
    algorithm: HashAlgorithm,
) -> Result<WasmManifest, HasherError> {
    let code_hash = hash(code, algorithm).to_hex();
    let metadata_hash = hash(&metadata_bytes(metadata)?, algorithm).to_hex();
    let combined_hash = combined(&code_hash, &metadata_hash, algorithm);
    Ok(WasmManifest {
        code_hash,
        metadata_hash,
        combined_hash,
        algorithm,
        timestamp: Utc::now(),
    })
}

/// Recompute both digests and compare them against `manifest`.
///
/// A code mismatch is reported without looking at the metadata.
pub fn verify_wasm_module(
    code: &[u8],
    metadata: &serde_json::Value,
    manifest: &WasmManifest,
) -> Result<(), IntegrityError> {
    let algorithm = manifest.algorithm;

    let code_digest = hash(code, algorithm);
    if !code_digest.matches_hex(&manifest.code_hash) {
        debug!(expected = %manifest.code_hash, "module code hash mismatch");
        return Err(IntegrityError::CodeHashMismatch {
            expected: manifest.code_hash.clone(),
            actual: code_digest.to_hex(),
        });
    }

    let bytes = metadata_bytes(metadata).map_err(|e| IntegrityError::Malformed(e.to_string()))?;
    let metadata_digest = hash(&bytes, algorithm);
    if !metadata_digest.matches_hex(&manifest.metadata_hash) {
        return Err(IntegrityError::MetadataHashMismatch {
            expected: manifest.metadata_hash.clone(),
            actual: metadata_digest.to_hex(),
        });
    }

    let actual = combined(&code_digest.to_hex(), &metadata_digest.to_hex(), algorithm);
    if actual != manifest.combined_hash.to_ascii_lowercase() {
        return Err(IntegrityError::CombinedHashMismatch {
            expected: manifest.combined_hash.clone(),
            actual,
        });
    }
    Ok(())
}

/// Integrity verification failures.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("code hash mismatch: expected {expected}, got {actual}")]
    CodeHashMismatch { expected: String, actual: String },

    #[error("metadata hash mismatch: expected {expected}, got {actual}")]
    MetadataHashMismatch { expected: String, actual: String },

    #[error("combined hash mismatch: expected {expected}, got {actual}")]
    CombinedHashMismatch { expected: String, actual: String },

    #[error("content hash mismatch for {id}: expected {expected}")]
    ContentHashMismatch { id: String, expected: String },

    #[error("malformed integrity input: {0}")]
    Malformed(String),
}
