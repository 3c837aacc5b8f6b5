//! Cryptographic algorithm identifiers and the default hashers

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use sha3::{Keccak256, Sha3_256, Sha3_384};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    SHA2_256,
    SHA2_384,
    SHA3_256,
    SHA3_384,
    KMAC128_BLS_BLS12_381,
    KECCAK_256,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::SHA2_256,
        HashAlgorithm::SHA2_384,
        HashAlgorithm::SHA3_256,
        HashAlgorithm::SHA3_384,
        HashAlgorithm::KMAC128_BLS_BLS12_381,
        HashAlgorithm::KECCAK_256,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::SHA2_256 => "SHA2_256",
            HashAlgorithm::SHA2_384 => "SHA2_384",
            HashAlgorithm::SHA3_256 => "SHA3_256",
            HashAlgorithm::SHA3_384 => "SHA3_384",
            HashAlgorithm::KMAC128_BLS_BLS12_381 => "KMAC128_BLS_BLS12_381",
            HashAlgorithm::KECCAK_256 => "KECCAK_256",
        }
    }

    /// Raw value of the enum case
    pub fn raw_value(&self) -> u8 {
        match self {
            HashAlgorithm::SHA2_256 => 1,
            HashAlgorithm::SHA2_384 => 2,
            HashAlgorithm::SHA3_256 => 3,
            HashAlgorithm::SHA3_384 => 4,
            HashAlgorithm::KMAC128_BLS_BLS12_381 => 5,
            HashAlgorithm::KECCAK_256 => 6,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|algorithm| algorithm.name() == name)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashAlgorithm.{}", self.name())
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    ECDSA_P256,
    ECDSA_secp256k1,
    BLS_BLS12_381,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 3] = [
        SignatureAlgorithm::ECDSA_P256,
        SignatureAlgorithm::ECDSA_secp256k1,
        SignatureAlgorithm::BLS_BLS12_381,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignatureAlgorithm::ECDSA_P256 => "ECDSA_P256",
            SignatureAlgorithm::ECDSA_secp256k1 => "ECDSA_secp256k1",
            SignatureAlgorithm::BLS_BLS12_381 => "BLS_BLS12_381",
        }
    }

    pub fn raw_value(&self) -> u8 {
        match self {
            SignatureAlgorithm::ECDSA_P256 => 1,
            SignatureAlgorithm::ECDSA_secp256k1 => 2,
            SignatureAlgorithm::BLS_BLS12_381 => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|algorithm| algorithm.name() == name)
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureAlgorithm.{}", self.name())
    }
}

/// A validated public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyInfo {
    pub public_key: Vec<u8>,
    pub signature_algorithm: SignatureAlgorithm,
}

/// A key attached to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeyInfo {
    pub index: u32,
    pub public_key: PublicKeyInfo,
    pub hash_algorithm: HashAlgorithm,
    /// Weight scaled by 10^8
    pub weight: u64,
    pub is_revoked: bool,
}

/// Hash `data` with the SHA-2, SHA-3 and Keccak families. A non-empty tag is
/// prepended to the data. Returns `None` for algorithms that need a host
/// implementation.
pub fn default_hash(data: &[u8], tag: &str, algorithm: HashAlgorithm) -> Option<Vec<u8>> {
    let mut input = Vec::with_capacity(tag.len() + data.len());
    input.extend_from_slice(tag.as_bytes());
    input.extend_from_slice(data);
    let digest = match algorithm {
        HashAlgorithm::SHA2_256 => Sha256::digest(&input).to_vec(),
        HashAlgorithm::SHA2_384 => Sha384::digest(&input).to_vec(),
        HashAlgorithm::SHA3_256 => Sha3_256::digest(&input).to_vec(),
        HashAlgorithm::SHA3_384 => Sha3_384::digest(&input).to_vec(),
        HashAlgorithm::KECCAK_256 => Keccak256::digest(&input).to_vec(),
        HashAlgorithm::KMAC128_BLS_BLS12_381 => return None,
    };
    Some(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_hashes() {
        let digest = default_hash(b"abc", "", HashAlgorithm::SHA3_256).unwrap();
        assert_eq!(
            hex::encode(digest),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
        let digest = default_hash(b"abc", "", HashAlgorithm::SHA2_256).unwrap();
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(default_hash(b"abc", "", HashAlgorithm::KMAC128_BLS_BLS12_381).is_none());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::from_name("KECCAK_256"), Some(HashAlgorithm::KECCAK_256));
        assert_eq!(SignatureAlgorithm::from_name("ECDSA_P256"), Some(SignatureAlgorithm::ECDSA_P256));
        assert_eq!(HashAlgorithm::SHA3_256.to_string(), "HashAlgorithm.SHA3_256");
    }
}
