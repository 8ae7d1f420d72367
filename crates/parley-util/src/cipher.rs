// Server-side message sealing (AES-256-GCM, per-key-id HKDF subkeys).

use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use base64::engine::{general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

pub const ALGORITHM: &str = "aes-256-gcm";
/// Master and derived key size in bytes.
pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

const INFO_PREFIX: &str = "parley:server-layer:";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("master key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid base64 in {0}")]
    InvalidEncoding(&'static str),
    #[error("key derivation failed")]
    Derivation,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed (authentication error)")]
    DecryptionFailed,
}

/// Output of [`Keyring::seal`]; every field is standard base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedText {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

/// Holds the server master key and derives one AES key per conversation key id.
#[derive(Clone)]
pub struct Keyring {
    master_key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring").field("master_key", &"<redacted>").finish()
    }
}

impl Keyring {
    pub fn new(master_key: [u8; KEY_SIZE]) -> Self {
        Self { master_key }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::InvalidEncoding("master key"))?;
        let master_key: [u8; KEY_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self::new(master_key))
    }

    fn derive(&self, key_id: &str) -> Result<Aes256Gcm, CipherError> {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut okm = [0u8; KEY_SIZE];
        let info = format!("{INFO_PREFIX}{key_id}");
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|_| CipherError::Derivation)?;
        Aes256Gcm::new_from_slice(&okm).map_err(|_| CipherError::Derivation)
    }

    /// Encrypt `plaintext` under the subkey for `key_id`. The key id is bound
    /// as associated data, so a ciphertext cannot be replayed under another id.
    pub fn seal(&self, key_id: &str, plaintext: &str) -> Result<SealedText, CipherError> {
        let cipher = self.derive(key_id)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(&nonce, key_id.as_bytes(), &mut buffer)
            .map_err(|_| CipherError::EncryptionFailed)?;
        Ok(SealedText {
            ciphertext: STANDARD.encode(&buffer),
            iv: STANDARD.encode(nonce),
            auth_tag: STANDARD.encode(tag),
        })
    }

    pub fn open(&self, key_id: &str, sealed: &SealedText) -> Result<String, CipherError> {
        let iv = STANDARD
            .decode(&sealed.iv)
            .map_err(|_| CipherError::InvalidEncoding("iv"))?;
        let tag = STANDARD
            .decode(&sealed.auth_tag)
            .map_err(|_| CipherError::InvalidEncoding("auth_tag"))?;
        let mut buffer = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|_| CipherError::InvalidEncoding("ciphertext"))?;
        if iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(CipherError::DecryptionFailed);
        }

        let cipher = self.derive(key_id)?;
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                key_id.as_bytes(),
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CipherError::DecryptionFailed)?;
        String::from_utf8(buffer).map_err(|_| CipherError::DecryptionFailed)
    }
}
