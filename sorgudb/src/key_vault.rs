//! Durable storage for wrapped DEKs.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::context::{FieldRef, KeyId};
use crate::error::KeyProviderError;

/// A DEK as persisted by a key vault: wrapped under a KEK, never in clear.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Identifier of the DEK
    pub key_id: KeyId,
    /// Identifier of the KEK the DEK is wrapped by
    pub wrapped_by: String,
    /// The wrapped DEK bytes
    pub wrapped_dek: Vec<u8>,
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("key_id", &self.key_id)
            .field("wrapped_by", &self.wrapped_by)
            .field("wrapped_dek_len", &self.wrapped_dek.len())
            .finish()
    }
}

/// Storage collaborator for wrapped DEKs.
///
/// Vaults only ever see wrapped key material. Retired keys stay in the vault
/// until an administrator removes them; nothing in this crate deletes keys.
pub trait KeyVault: Send + Sync {
    /// Fetches a wrapped key by id. Returns `Ok(None)` if the id is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key_id: &KeyId) -> Result<Option<WrappedKey>, KeyProviderError>;

    /// Stores a new wrapped key. Ids are write-once.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Storage` if the id already exists or the
    /// backend cannot be written.
    fn put(&self, key: WrappedKey) -> Result<(), KeyProviderError>;

    /// Lists the retained key ids for a field slot in ascending version
    /// order. The last entry is the active key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn list_active(&self, field: &FieldRef) -> Result<Vec<KeyId>, KeyProviderError>;
}

/// Key vault backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryKeyVault {
    keys: RwLock<BTreeMap<KeyId, WrappedKey>>,
}

impl MemoryKeyVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns `true` if no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl KeyVault for MemoryKeyVault {
    fn get(&self, key_id: &KeyId) -> Result<Option<WrappedKey>, KeyProviderError> {
        Ok(self.keys.read().get(key_id).cloned())
    }

    fn put(&self, key: WrappedKey) -> Result<(), KeyProviderError> {
        let mut keys = self.keys.write();
        if keys.contains_key(&key.key_id) {
            return Err(KeyProviderError::Storage(format!("key {} already exists", key.key_id)));
        }
        keys.insert(key.key_id.clone(), key);
        drop(keys);
        Ok(())
    }

    fn list_active(&self, field: &FieldRef) -> Result<Vec<KeyId>, KeyProviderError> {
        // BTreeMap order on KeyId is (field, version), so ids come out sorted.
        Ok(self
            .keys
            .read()
            .keys()
            .filter(|id| id.field() == field)
            .cloned()
            .collect())
    }
}
