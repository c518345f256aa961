//! Integrity toolkit for HashLinks.
//!
//! Provides plain and domain-separated BLAKE3 hashing, a keyed MAC with
//! password-based key derivation, binary Merkle trees with inclusion proofs,
//! digest-sequence verification, and manifests binding a module to its
//! metadata.
//!
//! Every verification function fails closed: malformed input, a length
//! mismatch, or an unknown algorithm never verifies.

pub mod chain;
pub mod hasher;
pub mod mac;
pub mod manifest;
pub mod merkle;

pub use chain::{ChainError, HashChainVerifier};
pub use hasher::{hash, verify_hash, ContentHasher, Digest, DigestCache, HashAlgorithm, HasherError};
pub use mac::{derive_key_from_password, generate_salt, keyed_mac, verify_keyed_mac, KdfError};
pub use manifest::{create_wasm_manifest, verify_wasm_module, IntegrityError, WasmManifest};
pub use merkle::{verify_merkle_proof, MerkleProof, MerkleTree, ProofStep, Side};
