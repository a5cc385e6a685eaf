//! Master key (KEK) abstraction used to wrap data encryption keys.

use std::collections::HashMap;

use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretVec};

use crate::error::KeyProviderError;
use crate::kdf::DEK_SIZE;

/// Nonce size for ChaCha20-Poly1305 (96 bits).
pub const WRAP_NONCE_SIZE: usize = 12;

/// Provides master key operations for wrapping and unwrapping DEKs.
///
/// Implementations must be thread-safe (`Send + Sync`) to support
/// concurrent encryption operations.
pub trait KeyProvider: Send + Sync {
    /// Creates a new Key Encryption Key (KEK), makes it current and returns
    /// its identifier.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::CreationFailed` if KEK creation fails.
    fn create_kek(&self) -> Result<String, KeyProviderError>;

    /// Returns the identifier of the current (active) KEK.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NoActiveKek` if no KEK is configured.
    fn current_kek_id(&self) -> Result<String, KeyProviderError>;

    /// Wraps (encrypts) a DEK with the specified KEK.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::WrapFailed` if wrapping fails.
    fn wrap_dek(&self, kek_id: &str, dek: &[u8]) -> Result<Vec<u8>, KeyProviderError>;

    /// Unwraps (decrypts) a DEK using the specified KEK.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::UnwrapFailed` if unwrapping fails.
    fn unwrap_dek(
        &self,
        kek_id: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError>;
}

/// Wraps a DEK under a raw KEK: `[nonce:12][ciphertext+tag]`.
///
/// The KEK id is bound as associated data so a wrapped DEK cannot be
/// presented under another KEK id.
///
/// # Errors
///
/// Returns `KeyProviderError::WrapFailed` if the KEK has the wrong size.
pub fn seal_dek(kek: &[u8], kek_id: &str, dek: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
    let cipher = ChaCha20Poly1305::new_from_slice(kek).map_err(|_| {
        KeyProviderError::WrapFailed(format!("invalid KEK length for {kek_id}"))
    })?;

    let mut nonce_bytes = [0u8; WRAP_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let payload = Payload {
        msg: dek,
        aad: kek_id.as_bytes(),
    };
    let sealed = cipher
        .encrypt(&Nonce::from(nonce_bytes), payload)
        .map_err(|_| KeyProviderError::WrapFailed(format!("seal under {kek_id} failed")))?;

    let mut wrapped = Vec::with_capacity(WRAP_NONCE_SIZE + sealed.len());
    wrapped.extend_from_slice(&nonce_bytes);
    wrapped.extend_from_slice(&sealed);
    Ok(wrapped)
}

/// Reverses [`seal_dek`].
///
/// # Errors
///
/// Returns `KeyProviderError::UnwrapFailed` if the wrapped DEK is truncated,
/// was sealed under another KEK, or has been tampered with.
pub fn open_dek(
    kek: &[u8],
    kek_id: &str,
    wrapped_dek: &[u8],
) -> Result<SecretVec<u8>, KeyProviderError> {
    if wrapped_dek.len() < WRAP_NONCE_SIZE {
        return Err(KeyProviderError::UnwrapFailed("wrapped DEK truncated".to_string()));
    }
    let (nonce_bytes, sealed) = wrapped_dek.split_at(WRAP_NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new_from_slice(kek).map_err(|_| {
        KeyProviderError::UnwrapFailed(format!("invalid KEK length for {kek_id}"))
    })?;

    let payload = Payload {
        msg: sealed,
        aad: kek_id.as_bytes(),
    };
    let dek = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), payload)
        .map_err(|_| KeyProviderError::UnwrapFailed(format!("open under {kek_id} failed")))?;

    Ok(SecretVec::new(dek))
}

/// In-process key provider holding KEKs in memory.
///
/// Suitable for tests and for embedding where the master key is supplied by
/// the host (for example from an environment secret).
pub struct LocalKeyProvider {
    keks: RwLock<LocalKeks>,
}

struct LocalKeks {
    keys: HashMap<String, SecretVec<u8>>,
    current: Option<String>,
}

impl LocalKeyProvider {
    /// Creates a provider without any KEK. Call [`KeyProvider::create_kek`]
    /// before wrapping.
    #[must_use]
    pub fn new() -> Self {
        Self::from_keks(HashMap::new(), None)
    }

    /// Creates a provider whose current KEK is the given 32-byte key.
    ///
    /// Two providers built from the same master key and id unwrap each
    /// other's DEKs, which is how a process gets its keys back after a
    /// restart when the master key comes from the environment.
    ///
    /// ```
    /// use secrecy::{ExposeSecret, SecretVec};
    /// use sorgudb::key_provider::{KeyProvider, LocalKeyProvider};
    ///
    /// let master = || SecretVec::new(vec![7u8; 32]);
    /// let before = LocalKeyProvider::with_master_key("master_v1", master()).unwrap();
    /// let wrapped = before.wrap_dek("master_v1", &[1u8; 32]).unwrap();
    ///
    /// let after = LocalKeyProvider::with_master_key("master_v1", master()).unwrap();
    /// assert_eq!(after.current_kek_id().unwrap(), "master_v1");
    /// let dek = after.unwrap_dek("master_v1", &wrapped).unwrap();
    /// assert_eq!(dek.expose_secret().as_slice(), &[1u8; 32]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::CreationFailed` if the key has the wrong
    /// size.
    pub fn with_master_key(
        kek_id: impl Into<String>,
        kek: SecretVec<u8>,
    ) -> Result<Self, KeyProviderError> {
        if kek.expose_secret().len() != DEK_SIZE {
            return Err(KeyProviderError::CreationFailed(format!(
                "master key must be {DEK_SIZE} bytes"
            )));
        }
        let kek_id = kek_id.into();
        let keys = HashMap::from([(kek_id.clone(), kek)]);
        Ok(Self::from_keks(keys, Some(kek_id)))
    }

    fn from_keks(keys: HashMap<String, SecretVec<u8>>, current: Option<String>) -> Self {
        Self {
            keks: RwLock::new(LocalKeks { keys, current }),
        }
    }

    fn kek<'a>(keks: &'a LocalKeks, kek_id: &str) -> Result<&'a SecretVec<u8>, KeyProviderError> {
        keks.keys
            .get(kek_id)
            .ok_or_else(|| KeyProviderError::KekNotFound(kek_id.to_string()))
    }
}

impl Default for LocalKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for LocalKeyProvider {
    fn create_kek(&self) -> Result<String, KeyProviderError> {
        let mut keks = self.keks.write();
        let kek_id = format!("kek_v{}", keks.keys.len() + 1);
        keks.keys.insert(kek_id.clone(), crate::kdf::generate_dek());
        keks.current = Some(kek_id.clone());
        drop(keks);
        Ok(kek_id)
    }

    fn current_kek_id(&self) -> Result<String, KeyProviderError> {
        let current = self.keks.read().current.clone();
        current.ok_or(KeyProviderError::NoActiveKek)
    }

    fn wrap_dek(&self, kek_id: &str, dek: &[u8]) -> Result<Vec<u8>, KeyProviderError> {
        let keks = self.keks.read();
        let kek = Self::kek(&keks, kek_id)?;
        seal_dek(kek.expose_secret(), kek_id, dek)
    }

    fn unwrap_dek(
        &self,
        kek_id: &str,
        wrapped_dek: &[u8],
    ) -> Result<SecretVec<u8>, KeyProviderError> {
        let keks = self.keks.read();
        let kek = Self::kek(&keks, kek_id)?;
        open_dek(kek.expose_secret(), kek_id, wrapped_dek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let provider = LocalKeyProvider::new();
        let kek_id = provider.create_kek().unwrap();
        let dek = [9u8; 32];

        let wrapped = provider.wrap_dek(&kek_id, &dek).unwrap();
        assert_ne!(&wrapped[WRAP_NONCE_SIZE..WRAP_NONCE_SIZE + 32], &dek[..]);

        let unwrapped = provider.unwrap_dek(&kek_id, &wrapped).unwrap();
        assert_eq!(unwrapped.expose_secret().as_slice(), &dek[..]);
    }

    #[test]
    fn test_no_active_kek() {
        let provider = LocalKeyProvider::new();
        let result = provider.current_kek_id();
        assert!(matches!(result, Err(KeyProviderError::NoActiveKek)));
    }

    #[test]
    fn test_create_kek_becomes_current() {
        let provider = LocalKeyProvider::new();
        let first = provider.create_kek().unwrap();
        let second = provider.create_kek().unwrap();
        assert_ne!(first, second);
        assert_eq!(provider.current_kek_id().unwrap(), second);
    }

    #[test]
    fn test_unwrap_with_other_kek_fails() {
        let provider = LocalKeyProvider::new();
        let first = provider.create_kek().unwrap();
        let second = provider.create_kek().unwrap();

        let wrapped = provider.wrap_dek(&first, &[1u8; 32]).unwrap();
        let result = provider.unwrap_dek(&second, &wrapped);
        assert!(matches!(result, Err(KeyProviderError::UnwrapFailed(_))));
    }

    #[test]
    fn test_unknown_kek() {
        let provider = LocalKeyProvider::new();
        let result = provider.wrap_dek("kek_v7", &[0u8; 32]);
        assert!(matches!(result, Err(KeyProviderError::KekNotFound(id)) if id == "kek_v7"));
    }

    #[test]
    fn test_truncated_wrapped_dek() {
        let result = open_dek(&[0u8; 32], "kek_v1", &[0u8; 4]);
        assert!(matches!(result, Err(KeyProviderError::UnwrapFailed(_))));
    }

    #[test]
    fn test_with_master_key_rejects_short_key() {
        let short = SecretVec::new(vec![0u8; 16]);
        let result = LocalKeyProvider::with_master_key("master", short);
        assert!(matches!(result, Err(KeyProviderError::CreationFailed(_))));
    }

    #[test]
    fn test_with_master_key_survives_restart() {
        let master = || SecretVec::new(vec![5u8; 32]);
        let first = LocalKeyProvider::with_master_key("master", master()).unwrap();
        assert_eq!(first.current_kek_id().unwrap(), "master");
        let wrapped = first.wrap_dek("master", &[3u8; 32]).unwrap();

        let second = LocalKeyProvider::with_master_key("master", master()).unwrap();
        let dek = second.unwrap_dek("master", &wrapped).unwrap();
        assert_eq!(dek.expose_secret().as_slice(), &[3u8; 32]);

        let other = SecretVec::new(vec![6u8; 32]);
        let other = LocalKeyProvider::with_master_key("master", other).unwrap();
        let result = other.unwrap_dek("master", &wrapped);
        assert!(matches!(result, Err(KeyProviderError::UnwrapFailed(_))));
    }
}
