//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! A DEK is never used directly. Each strategy derives its own subkey from the
//! DEK with HKDF-SHA256, so the equality cipher, the range cipher and the
//! order-preserving transform never share key material.

use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretVec};
use sha2::Sha256;

use crate::context::EncryptionContext;
use crate::error::Error;

/// Standard DEK size in bytes (256 bits).
pub const DEK_SIZE: usize = 32;

/// What a derived subkey is used for. Part of the HKDF `info` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// AES-256-SIV key for equality ciphertexts (64 bytes).
    Equality,
    /// AES-256-SIV key for the reversible part of range values (64 bytes).
    RangeCiphertext,
    /// HMAC-SHA256 key driving the order-preserving transform (32 bytes).
    RangeToken,
    /// ChaCha20-Poly1305 key for randomized fields (32 bytes).
    Randomized,
}

impl KeyPurpose {
    const fn label(self) -> &'static str {
        match self {
            Self::Equality => "eq",
            Self::RangeCiphertext => "range-ct",
            Self::RangeToken => "range-ope",
            Self::Randomized => "rnd",
        }
    }

    /// Length of the subkey for this purpose.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Equality | Self::RangeCiphertext => 64,
            Self::RangeToken | Self::Randomized => 32,
        }
    }
}

/// Derives a purpose-bound subkey from a DEK.
///
/// The `info` parameter is `sorgudb|<purpose>|<collection>|<field>|<key id>`.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the derivation fails.
///
/// # Example
///
/// ```
/// use secrecy::{ExposeSecret, SecretVec};
/// use sorgudb::context::{EncryptionContext, FieldRef, KeyId};
/// use sorgudb::kdf::{derive_subkey, KeyPurpose};
///
/// let dek = SecretVec::new(vec![0u8; 32]);
/// let field = FieldRef::new("accounts", "ssn");
/// let key_id = KeyId::new(field.clone(), 1);
/// let ctx = EncryptionContext::new(&field, &key_id);
/// let subkey = derive_subkey(&dek, KeyPurpose::Equality, &ctx).expect("derivation failed");
/// assert_eq!(subkey.expose_secret().len(), 64);
/// ```
pub fn derive_subkey(
    dek: &SecretVec<u8>,
    purpose: KeyPurpose,
    context: &EncryptionContext<'_>,
) -> Result<SecretVec<u8>, Error> {
    let hkdf = Hkdf::<Sha256>::new(None, dek.expose_secret());

    let info = format!("sorgudb|{}|{context}", purpose.label());

    let mut subkey = vec![0u8; purpose.key_len()];
    hkdf.expand(info.as_bytes(), &mut subkey)
        .map_err(|_| Error::KeyDerivation)?;

    Ok(SecretVec::new(subkey))
}

/// Generates a random DEK.
///
/// The DEK must be wrapped with a KEK before it is handed to a key vault.
#[must_use]
pub fn generate_dek() -> SecretVec<u8> {
    use chacha20poly1305::aead::{rand_core::RngCore, OsRng};

    let mut dek = vec![0u8; DEK_SIZE];
    OsRng.fill_bytes(&mut dek);
    SecretVec::new(dek)
}
