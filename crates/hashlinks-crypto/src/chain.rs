use crate::hasher::HashAlgorithm;

/// Well-formedness verifier for a published sequence of digests.
///
/// Every element must be a lowercase hex digest of exactly the length the
/// algorithm produces. The first offending element is reported.
pub struct HashChainVerifier;

impl HashChainVerifier {
    pub fn verify_chain<S: AsRef<str>>(
        hashes: &[S],
        algorithm: HashAlgorithm,
    ) -> Result<(), ChainError> {
        for (index, hash) in hashes.iter().enumerate() {
            let hash = hash.as_ref();
            if hash.len() != algorithm.hex_len() {
                return Err(ChainError::InvalidLength {
                    index,
                    expected: algorithm.hex_len(),
                    actual: hash.len(),
                });
            }
            if let Some(position) = hash
                .bytes()
                .position(|b| !matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            {
                return Err(ChainError::InvalidCharacter { index, position });
            }
        }
        Ok(())
    }

    /// Index of the first malformed element, if any.
    pub fn first_invalid<S: AsRef<str>>(hashes: &[S], algorithm: HashAlgorithm) -> Option<usize> {
        Self::verify_chain(hashes, algorithm)
            .err()
            .map(|err| err.index())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("digest at index {index} has length {actual}, expected {expected}")]
    InvalidLength {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("digest at index {index} has a non-hex character at position {position}")]
    InvalidCharacter { index: usize, position: usize },
}

impl ChainError {
    pub fn index(&self) -> usize {
        match self {
            Self::InvalidLength { index, .. } | Self::InvalidCharacter { index, .. } => *index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;

    fn chain(count: usize, algorithm: HashAlgorithm) -> Vec<String> {
        (0..count)
            .map(|i| hash(format!("entry-{i}").as_bytes(), algorithm).to_hex())
            .collect()
    }

    #[test]
    fn empty_chain_is_valid() {
        let empty: Vec<String> = vec![];
        assert!(HashChainVerifier::verify_chain(&empty, HashAlgorithm::Blake3).is_ok());
    }

    #[test]
    fn well_formed_chain_is_valid() {
        let hashes = chain(10, HashAlgorithm::Blake3);
        assert!(HashChainVerifier::verify_chain(&hashes, HashAlgorithm::Blake3).is_ok());
        let wide = chain(3, HashAlgorithm::Blake3_512);
        assert!(HashChainVerifier::verify_chain(&wide, HashAlgorithm::Blake3_512).is_ok());
    }

    #[test]
    fn reports_first_bad_length() {
        let mut hashes = chain(4, HashAlgorithm::Blake3);
        hashes[2].pop();
        hashes[3].pop();
        let err = HashChainVerifier::verify_chain(&hashes, HashAlgorithm::Blake3).unwrap_err();
        assert_eq!(
            err,
            ChainError::InvalidLength {
                index: 2,
                expected: 64,
                actual: 63
            }
        );
    }

    #[test]
    fn reports_non_hex_character() {
        let mut hashes = chain(3, HashAlgorithm::Blake3);
        hashes[1].replace_range(5..6, "Z");
        let err = HashChainVerifier::verify_chain(&hashes, HashAlgorithm::Blake3).unwrap_err();
        assert_eq!(err, ChainError::InvalidCharacter { index: 1, position: 5 });
        assert_eq!(
            HashChainVerifier::first_invalid(&hashes, HashAlgorithm::Blake3),
            Some(1)
        );
    }

    #[test]
    fn algorithm_length_mismatch_is_rejected() {
        let hashes = chain(1, HashAlgorithm::Blake3);
        assert_eq!(
            HashChainVerifier::first_invalid(&hashes, HashAlgorithm::Blake3_512),
            Some(0)
        );
    }
}
