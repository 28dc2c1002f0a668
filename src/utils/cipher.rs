use aes_gcm::Aes256Gcm;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq)]
pub enum CipherError {
    #[error("cipher key must be 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("index key must not be empty")]
    EmptyIndexKey,
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext is shorter than its nonce")]
    TooShort,
    #[error("ciphertext failed authentication")]
    Authentication,
    #[error("plaintext is not valid utf-8")]
    Utf8,
}

/// Reversible encryption for the national-id fragment plus a deterministic
/// blind index for equality lookups.
///
/// Encryption is AES-256-GCM with a fresh random nonce per call, so two
/// encodings of the same value never compare equal. Lookups therefore go
/// through [`IdCipher::blind_index`], never through the ciphertext.
#[derive(Clone)]
pub struct IdCipher {
    cipher: Aes256Gcm,
    index_mac: HmacSha256,
}

impl std::fmt::Debug for IdCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCipher").finish_non_exhaustive()
    }
}

impl IdCipher {
    pub fn new(key: &[u8], index_key: &[u8]) -> Result<Self, CipherError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::KeyLength(key.len()))?;
        if index_key.is_empty() {
            return Err(CipherError::EmptyIndexKey);
        }
        let index_mac =
            <HmacSha256 as Mac>::new_from_slice(index_key).map_err(|_| CipherError::EmptyIndexKey)?;
        Ok(Self { cipher, index_mac })
    }

    /// `base64(nonce || ciphertext)`
    pub fn encode(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Authentication)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    pub fn decode(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = STANDARD.decode(encoded).map_err(|_| CipherError::Encoding)?;
        if raw.len() < NONCE_LEN {
            return Err(CipherError::TooShort);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Authentication)?;
        String::from_utf8(plain).map_err(|_| CipherError::Utf8)
    }

    /// Hex HMAC-SHA256 of the trimmed plaintext.
    pub fn blind_index(&self, plaintext: &str) -> String {
        let mut mac = self.index_mac.clone();
        mac.update(plaintext.trim().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Ciphertext and blind index for an optional fragment. Blank counts as absent.
    pub fn seal_optional(
        &self,
        plaintext: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), CipherError> {
        match plaintext.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) => Ok((Some(self.encode(p)?), Some(self.blind_index(p)))),
            None => Ok((None, None)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_cipher() -> IdCipher {
    IdCipher::new(b"0123456789abcdef0123456789abcdef", b"index-key").unwrap()
}
