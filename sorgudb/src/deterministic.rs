//! Deterministic encryption using AES-SIV for equality queries.
//!
//! AES-SIV (Synthetic IV) is a misuse-resistant authenticated encryption mode
//! that produces deterministic output for the same plaintext and context.
//! This enables equality queries on encrypted data without revealing patterns
//! across different fields or key versions.
//!
//! # Security Properties
//!
//! - **Deterministic**: Same plaintext + context → same ciphertext
//! - **Injective**: Distinct plaintexts → distinct ciphertexts
//! - **Authenticated**: Tampering or a wrong key fails decryption
//! - **Context-bound**: The field and key id are associated data
//!
//! # Security Warning
//!
//! Deterministic encryption reveals equality patterns. Use it only for fields
//! that need equality queries.

use aes_siv::{
    aead::{Aead, KeyInit, Payload},
    Aes256SivAead,
};
use secrecy::{ExposeSecret, SecretVec};
use zeroize::Zeroizing;

use crate::{context::EncryptionContext, error::Error};

/// AES-256-SIV key size (two 256-bit halves).
pub const SIV_KEY_SIZE: usize = 64;

/// Deterministic cipher using AES-256-SIV.
///
/// # Example
///
/// ```
/// use secrecy::SecretVec;
/// use sorgudb::context::{EncryptionContext, FieldRef, KeyId};
/// use sorgudb::deterministic::DeterministicCipher;
///
/// let cipher = DeterministicCipher::new(SecretVec::new(vec![0u8; 64])).unwrap();
/// let field = FieldRef::new("accounts", "ssn");
/// let key_id = KeyId::new(field.clone(), 1);
/// let context = EncryptionContext::new(&field, &key_id);
///
/// let ct1 = cipher.encrypt(b"123-45-6789", &context).unwrap();
/// let ct2 = cipher.encrypt(b"123-45-6789", &context).unwrap();
/// assert_eq!(ct1, ct2);
/// ```
pub struct DeterministicCipher {
    key: SecretVec<u8>,
}

impl DeterministicCipher {
    /// Creates a cipher from a 64-byte key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key length is not 64 bytes.
    pub fn new(key: SecretVec<u8>) -> Result<Self, Error> {
        if key.expose_secret().len() != SIV_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: SIV_KEY_SIZE,
                actual: key.expose_secret().len(),
            });
        }
        Ok(Self { key })
    }

    /// Encrypts plaintext deterministically, with the context as AAD.
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
            reason: "AES-SIV encryption failed",
        };

        let cipher = Aes256SivAead::new_from_slice(self.key.expose_secret())
            .map_err(|_| encoding_error())?;

        let aad = Zeroizing::new(context.to_string().into_bytes());
        let payload = Payload {
            msg: plaintext,
            aad: &aad,
        };

        // SIV derives its IV from the input; the nonce stays fixed.
        cipher
            .encrypt(&Default::default(), payload)
            .map_err(|_| encoding_error())
    }

    /// Decrypts ciphertext produced under the same key and context.
    ///
    /// # Errors
    ///
    /// Returns `Error::DecryptionFailed` if the ciphertext is corrupted, the
    /// context differs, or the key does not match.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &EncryptionContext<'_>,
    ) -> Result<Vec<u8>, Error> {
        let decryption_failed = || Error::DecryptionFailed {
            field: context.field().to_string(),
        };

        let cipher = Aes256SivAead::new_from_slice(self.key.expose_secret())
            .map_err(|_| decryption_failed())?;

        let aad = Zeroizing::new(context.to_string().into_bytes());
        let payload = Payload {
            msg: ciphertext,
            aad: &aad,
        };

        cipher
            .decrypt(&Default::default(), payload)
            .map_err(|_| decryption_failed())
    }
}
