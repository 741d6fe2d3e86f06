//! Bundle encryption and one-shot download tokens.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::OnboardingError;

const NONCE_LEN: usize = 12;
const DOWNLOAD_TOKEN_BYTES: usize = 24;

/// AES-256-GCM cipher for join-token and credential-bundle ciphertexts.
/// The wire form is base64(nonce || ciphertext).
pub struct BundleCipher {
    cipher: Aes256Gcm,
}

impl BundleCipher {
    pub fn new(key: &[u8]) -> Result<Self, OnboardingError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            OnboardingError::InvalidRequest(format!(
                "encryption key must be 32 bytes, got {}",
                key.len()
            ))
        })?;
        Ok(BundleCipher { cipher })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, OnboardingError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| OnboardingError::DecryptFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, OnboardingError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| OnboardingError::DecryptFailed)?;
        if raw.len() <= NONCE_LEN {
            return Err(OnboardingError::DecryptFailed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| OnboardingError::DecryptFailed)
    }
}

/// 24 random bytes, base64url without padding.
pub fn generate_download_token() -> String {
    let mut bytes = [0u8; DOWNLOAD_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex of a download token, the only form that is persisted.
pub fn hash_download_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison of a presented token against the stored hash.
pub fn verify_download_token(token: &str, stored_hash: &str) -> bool {
    let presented = hash_download_token(token);
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}
