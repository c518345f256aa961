//! Message authentication and password-based key derivation.
//!
//! The MAC is BLAKE3 in keyed mode. It is not RFC 2104 HMAC and its tags
//! do not interoperate with HMAC implementations. Keys of any length are first mapped to
//! a 32-byte BLAKE3 key with `derive_key`. Key derivation follows the PBKDF2
//! construction (RFC 8018 §5.2) with that MAC as the PRF.

use rand::RngCore;

use crate::hasher::{constant_time_eq, Digest, HashAlgorithm};

const MAC_KEY_CONTEXT: &str = "hashlinks 2024 hmac key";

fn mac_key(key: &[u8]) -> [u8; 32] {
    blake3::derive_key(MAC_KEY_CONTEXT, key)
}

fn mac_bytes(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(key, message).as_bytes()
}

/// Keyed BLAKE3 authentication tag for `message` under `key`.
pub fn keyed_mac(key: &[u8], message: &[u8]) -> Digest {
    let tag = mac_bytes(&mac_key(key), message);
    Digest::from_raw(HashAlgorithm::Blake3, tag.to_vec())
}

/// Check a hex tag in constant time. A malformed tag never verifies.
pub fn verify_keyed_mac(key: &[u8], message: &[u8], tag_hex: &str) -> bool {
    let Ok(expected) = hex::decode(tag_hex) else {
        return false;
    };
    let actual = mac_bytes(&mac_key(key), message);
    constant_time_eq(&actual, &expected)
}

/// Derive `output_len` bytes of key material from a password.
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    output_len: usize,
) -> Result<Vec<u8>, KdfError> {
    if iterations == 0 {
        return Err(KdfError::ZeroIterations);
    }
    if salt.is_empty() {
        return Err(KdfError::EmptySalt);
    }
    if output_len == 0 {
        return Err(KdfError::EmptyOutput);
    }

    let prf_key = mac_key(password);
    let mut output = Vec::with_capacity(output_len);
    let mut block_index: u32 = 1;
    while output.len() < output_len {
        let mut first = Vec::with_capacity(salt.len() + 4);
        first.extend_from_slice(salt);
        first.extend_from_slice(&block_index.to_be_bytes());

        let mut u = mac_bytes(&prf_key, &first);
        let mut block = u;
        for _ in 1..iterations {
            u = mac_bytes(&prf_key, &u);
            for (b, x) in block.iter_mut().zip(u.iter()) {
                *b ^= x;
            }
        }

        let take = (output_len - output.len()).min(block.len());
        output.extend_from_slice(&block[..take]);
        block_index = block_index
            .checked_add(1)
            .ok_or(KdfError::OutputTooLong(output_len))?;
    }
    Ok(output)
}

/// Random salt suitable for [`derive_key_from_password`].
pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Errors from key derivation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("iteration count must be at least 1")]
    ZeroIterations,

    #[error("salt must not be empty")]
    EmptySalt,

    #[error("requested output length must be non-zero")]
    EmptyOutput,

    #[error("requested output length {0} is too long")]
    OutputTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_mac_verifies_and_detects_tamper() {
        let tag = keyed_mac(b"secret", b"message").to_hex();
        assert!(verify_keyed_mac(b"secret", b"message", &tag));
        assert!(!verify_keyed_mac(b"secret", b"messagE", &tag));
        assert!(!verify_keyed_mac(b"other", b"message", &tag));
    }

    #[test]
    fn malformed_tag_never_verifies() {
        assert!(!verify_keyed_mac(b"k", b"m", "zz"));
        assert!(!verify_keyed_mac(b"k", b"m", ""));
        let tag = keyed_mac(b"k", b"m").to_hex();
        assert!(!verify_keyed_mac(b"k", b"m", &tag[..62]));
    }

    #[test]
    fn keys_of_any_length_work() {
        let long_key = vec![7u8; 200];
        let tag = keyed_mac(&long_key, b"m");
        assert!(verify_keyed_mac(&long_key, b"m", &tag.to_hex()));
        assert_ne!(keyed_mac(b"", b"m"), tag);
    }

    #[test]
    fn kdf_is_deterministic_and_salt_sensitive() {
        let salt = b"saltsaltsalt";
        let a = derive_key_from_password(b"pw", salt, 10, 48).unwrap();
        let b = derive_key_from_password(b"pw", salt, 10, 48).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);

        let c = derive_key_from_password(b"pw", b"pepperpepper", 10, 48).unwrap();
        assert_ne!(a, c);
        let d = derive_key_from_password(b"pw", salt, 11, 48).unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn kdf_prefix_is_stable_across_lengths() {
        let salt = b"saltsaltsalt";
        let short = derive_key_from_password(b"pw", salt, 3, 16).unwrap();
        let long = derive_key_from_password(b"pw", salt, 3, 64).unwrap();
        assert_eq!(&long[..16], &short[..]);
    }

    #[test]
    fn kdf_rejects_bad_parameters() {
        assert_eq!(
            derive_key_from_password(b"pw", b"saltsalt", 0, 32),
            Err(KdfError::ZeroIterations)
        );
        assert_eq!(
            derive_key_from_password(b"pw", b"", 1, 32),
            Err(KdfError::EmptySalt)
        );
        assert_eq!(
            derive_key_from_password(b"pw", b"saltsalt", 1, 0),
            Err(KdfError::EmptyOutput)
        );
    }

    #[test]
    fn generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
