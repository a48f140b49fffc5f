//! Salted credential digests
//!
//! Identity records store `hex(hash(salt || secret))` under sha256 or
//! scrypt. Verification recomputes and compares in constant time.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::HashAlgorithm;

// Interactive-login scrypt parameters (N=16384, r=8, p=1, 64-byte key).
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("scrypt parameters rejected: {0}")]
    Params(String),
}

/// Hex digest of `salt || secret` under the identity's algorithm.
pub fn digest(algorithm: HashAlgorithm, secret: &str, salt: &str) -> Result<String, SecretError> {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(salt.as_bytes());
            hasher.update(secret.as_bytes());
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Scrypt => {
            let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_LEN)
                .map_err(|e| SecretError::Params(e.to_string()))?;
            let mut output = [0u8; SCRYPT_LEN];
            scrypt::scrypt(secret.as_bytes(), salt.as_bytes(), &params, &mut output)
                .map_err(|e| SecretError::Params(e.to_string()))?;
            Ok(hex::encode(output))
        }
    }
}

/// Constant-time comparison of a presented secret against the stored digest.
pub fn verify(algorithm: HashAlgorithm, secret: &str, salt: &str, stored_hex: &str) -> bool {
    let Ok(computed_hex) = digest(algorithm, secret, salt) else {
        return false;
    };
    let Ok(stored) = hex::decode(stored_hex.trim()) else {
        return false;
    };
    let Ok(computed) = hex::decode(&computed_hex) else {
        return false;
    };
    computed.ct_eq(&stored).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_round_trip() {
        let hash = digest(HashAlgorithm::Sha256, "secret", "salt").unwrap();
        assert_eq!(hash.len(), 64);
        assert!(verify(HashAlgorithm::Sha256, "secret", "salt", &hash));
        assert!(!verify(HashAlgorithm::Sha256, "wrong", "salt", &hash));
        assert!(!verify(HashAlgorithm::Sha256, "secret", "other-salt", &hash));
    }

    #[test]
    fn scrypt_digest_round_trip() {
        let hash = digest(HashAlgorithm::Scrypt, "secret", "salt").unwrap();
        assert_eq!(hash.len(), SCRYPT_LEN * 2);
        assert!(verify(HashAlgorithm::Scrypt, "secret", "salt", &hash));
        assert!(!verify(HashAlgorithm::Scrypt, "wrong", "salt", &hash));
    }

    #[test]
    fn stored_hex_case_is_ignored() {
        let hash = digest(HashAlgorithm::Sha256, "secret", "salt").unwrap();
        assert!(verify(HashAlgorithm::Sha256, "secret", "salt", &hash.to_uppercase()));
    }

    #[test]
    fn garbage_stored_hash_fails_closed() {
        assert!(!verify(HashAlgorithm::Sha256, "secret", "salt", "not-hex"));
        assert!(!verify(HashAlgorithm::Sha256, "secret", "salt", ""));
    }
}
