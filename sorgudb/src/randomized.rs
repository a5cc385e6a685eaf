//! Randomized authenticated encryption for non-queryable fields.
//!
//! Every encryption draws a fresh nonce, so equal plaintexts produce
//! unrelated ciphertexts and storage learns nothing beyond length.

use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use secrecy::{ExposeSecret, SecretVec};

use crate::context::EncryptionContext;
use crate::error::Error;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 key size.
pub const RANDOMIZED_KEY_SIZE: usize = 32;

/// Randomized cipher producing `[nonce:12][ciphertext+tag]`.
pub struct RandomizedCipher {
    key: SecretVec<u8>,
}

impl RandomizedCipher {
    /// Creates a cipher from a 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is not 32 bytes.
    pub fn new(key: SecretVec<u8>) -> Result<Self, Error> {
        if key.expose_secret().len() != RANDOMIZED_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: RANDOMIZED_KEY_SIZE,
                actual: key.expose_secret().len(),
            });
        }
        Ok(Self { key })
    }

    /// Encrypts plaintext under a random nonce, with the context as AAD.
    ///
    /// # Errors
    ///
    /// Returns `Error::EncodingError` if encryption fails.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        context: &EncryptionContext<'_>,
    ) -> Result<Vec<u8>, Error> {
        let encoding_error = || Error::EncodingError {
            field: context.field().to_string(),
            reason: "ChaCha20-Poly1305 encryption failed",
        };

        let cipher = ChaCha20Poly1305::new_from_slice(self.key.expose_secret())
            .map_err(|_| encoding_error())?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let aad = context.to_string();
        let payload = Payload {
            msg: plaintext,
            aad: aad.as_bytes(),
        };
        let sealed = cipher
            .encrypt(&Nonce::from(nonce_bytes), payload)
            .map_err(|_| encoding_error())?;

        let mut result = Vec::with_capacity(NONCE_SIZE + sealed.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Decrypts a ciphertext produced by [`RandomizedCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns `Error::DecryptionFailed` if the ciphertext is truncated,
    /// tampered with, or bound to another context or key.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext<'_>,
    ) -> Result<Vec<u8>, Error> {
        let decryption_failed = || Error::DecryptionFailed {
            field: context.field().to_string(),
        };

        if ciphertext.len() < NONCE_SIZE {
            return Err(decryption_failed());
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_SIZE);

        let cipher = ChaCha20Poly1305::new_from_slice(self.key.expose_secret())
            .map_err(|_| decryption_failed())?;

        let aad = context.to_string();
        let payload = Payload {
            msg: sealed,
            aad: aad.as_bytes(),
        };
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| decryption_failed())
    }
}
