use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
const TAG_SIZE: usize = 16;

/// Errors raised by [`CryptoBox`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The token was tampered with, truncated, or sealed under another key.
    #[error("invalid token")]
    InvalidToken,

    /// The supplied key material has the wrong length.
    #[error("invalid key: expected 32 bytes, got {0}")]
    InvalidKey(usize),

    /// The cipher refused to seal the plaintext.
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// A secure key wrapper that ensures the key is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct SecureKey([u8; KEY_SIZE]);

/// Symmetric authenticated encryption for session values.
///
/// Tokens are URL-safe base64 (no padding) of `nonce || ciphertext || tag`,
/// so they can be stored as plain strings inside a session container.
pub struct CryptoBox {
    key: SecureKey,
}

impl CryptoBox {
    /// Creates a new `CryptoBox` from a 32-byte key.
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key: SecureKey(key) }
    }

    /// Creates a new `CryptoBox` from a key slice, rejecting wrong sizes.
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(key.len()))?;
        Ok(Self::new(key))
    }

    /// Creates a `CryptoBox` with a freshly generated random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Returns
    ///
    /// The encoded token.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new((&self.key.0).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypts a token produced by [`CryptoBox::encrypt`].
    ///
    /// Any malformed, truncated, tampered or foreign token fails with
    /// [`CryptoError::InvalidToken`].
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        let sealed = general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CryptoError::InvalidToken)?;

        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidToken);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new((&self.key.0).into());

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::InvalidToken)
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox").finish_non_exhaustive()
    }
}
