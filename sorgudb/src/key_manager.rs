//! Key manager: owns data encryption keys and their rotation.
//!
//! The active key per field slot lives in an immutable snapshot that is
//! swapped atomically, so a reader sees either the old or the new active key
//! and never a partial update. Rotations are serialized among themselves.
//! Retired keys stay resolvable through [`KeyManager::get_key`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretVec};
use tracing::{debug, info};

use crate::context::{FieldRef, KeyId};
use crate::error::Error;
use crate::kdf::{generate_dek, DEK_SIZE};
use crate::key_provider::KeyProvider;
use crate::key_vault::{KeyVault, WrappedKey};
use crate::schema::FieldSchema;

/// An unwrapped data encryption key.
///
/// Key material is only reachable from inside the crate and is zeroized on
/// drop. `Debug` prints the key id only.
pub struct DataEncryptionKey {
    key_id: KeyId,
    wrapped_by: String,
    material: SecretVec<u8>,
}

impl DataEncryptionKey {
    /// Returns the key id.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Returns the id of the KEK this key is wrapped by.
    #[must_use]
    pub fn wrapped_by(&self) -> &str {
        &self.wrapped_by
    }

    pub(crate) const fn material(&self) -> &SecretVec<u8> {
        &self.material
    }
}

impl fmt::Debug for DataEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataEncryptionKey")
            .field("key_id", &self.key_id)
            .field("wrapped_by", &self.wrapped_by)
            .finish_non_exhaustive()
    }
}

/// Resolves and rotates DEKs on top of a [`KeyProvider`] and a [`KeyVault`].
pub struct KeyManager {
    provider: Arc<dyn KeyProvider>,
    vault: Arc<dyn KeyVault>,
    active: ArcSwap<HashMap<FieldRef, KeyId>>,
    unwrapped: RwLock<HashMap<KeyId, Arc<DataEncryptionKey>>>,
    rotation: Mutex<()>,
}

impl KeyManager {
    /// Creates a key manager. Active keys are loaded lazily from the vault.
    pub fn new(provider: Arc<dyn KeyProvider>, vault: Arc<dyn KeyVault>) -> Self {
        Self {
            provider,
            vault,
            active: ArcSwap::from_pointee(HashMap::new()),
            unwrapped: RwLock::new(HashMap::new()),
            rotation: Mutex::new(()),
        }
    }

    /// Returns the key used to encrypt new values for the field.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyUnavailable` if no key has been provisioned for the
    /// field, or a provider error if the key cannot be unwrapped.
    pub fn get_active_key(&self, schema: &FieldSchema) -> Result<Arc<DataEncryptionKey>, Error> {
        let field = schema.field_ref();
        let published = self.active.load().get(field).cloned();
        let key_id = match published {
            Some(key_id) => key_id,
            None => self.load_active(field)?,
        };
        self.get_key(&key_id)
    }

    /// Resolves a specific key, active or retired.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyNotFound` if the vault does not know the id.
    pub fn get_key(&self, key_id: &KeyId) -> Result<Arc<DataEncryptionKey>, Error> {
        if let Some(dek) = self.unwrapped.read().get(key_id) {
            return Ok(Arc::clone(dek));
        }

        let wrapped = self
            .vault
            .get(key_id)?
            .ok_or_else(|| Error::KeyNotFound {
                key_id: key_id.to_string(),
            })?;
        let material = self
            .provider
            .unwrap_dek(&wrapped.wrapped_by, &wrapped.wrapped_dek)?;
        if material.expose_secret().len() != DEK_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: DEK_SIZE,
                actual: material.expose_secret().len(),
            });
        }
        let kek_id = &wrapped.wrapped_by;
        debug!(key_id = %key_id, kek_id = %kek_id, "unwrapped data encryption key");

        let dek = Arc::new(DataEncryptionKey {
            key_id: key_id.clone(),
            wrapped_by: wrapped.wrapped_by,
            material,
        });
        let mut unwrapped = self.unwrapped.write();
        Ok(Arc::clone(unwrapped.entry(key_id.clone()).or_insert(dek)))
    }

    /// Provisions a new active key for the field, retiring the previous one.
    ///
    /// Existing ciphertexts are not re-encrypted; they keep resolving their
    /// original key through the key id they carry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSchema` for fields without an encryption
    /// strategy, or a provider error if wrapping or storing the key fails.
    pub fn rotate_key(&self, schema: &FieldSchema) -> Result<Arc<DataEncryptionKey>, Error> {
        if !schema.strategy().is_encrypted() {
            let reason = format!("{} is not encrypted", schema.field_ref());
            return Err(Error::InvalidSchema(reason));
        }
        let field = schema.field_ref();
        let _rotation = self.rotation.lock();

        let previous = self.vault.list_active(field)?.pop();
        let key_id = previous
            .as_ref()
            .map_or_else(|| KeyId::new(field.clone(), 1), KeyId::next);

        let material = generate_dek();
        let kek_id = self.provider.current_kek_id()?;
        let wrapped_dek = self.provider.wrap_dek(&kek_id, material.expose_secret())?;
        self.vault.put(WrappedKey {
            key_id: key_id.clone(),
            wrapped_by: kek_id.clone(),
            wrapped_dek,
        })?;

        let dek = Arc::new(DataEncryptionKey {
            key_id: key_id.clone(),
            wrapped_by: kek_id,
            material,
        });
        self.unwrapped
            .write()
            .insert(key_id.clone(), Arc::clone(&dek));
        self.active.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(field.clone(), key_id.clone());
            next
        });

        match previous {
            Some(retired) => {
                info!(
                    field = %field,
                    key_id = %key_id,
                    retired = %retired,
                    "rotated data encryption key"
                );
            }
            None => info!(field = %field, key_id = %key_id, "provisioned data encryption key"),
        }
        Ok(dek)
    }

    /// Provisions a first key for the field if it has none yet.
    ///
    /// Returns the new key id, or `None` if the field already had an active
    /// key, which is left untouched.
    ///
    /// # Errors
    ///
    /// Same as [`KeyManager::rotate_key`], plus the errors of
    /// [`KeyManager::get_active_key`] other than `Error::KeyUnavailable`.
    pub fn ensure_key(&self, schema: &FieldSchema) -> Result<Option<KeyId>, Error> {
        match self.get_active_key(schema) {
            Ok(_) => Ok(None),
            Err(Error::KeyUnavailable { .. }) => {
                let dek = self.rotate_key(schema)?;
                Ok(Some(dek.key_id().clone()))
            }
            Err(err) => Err(err),
        }
    }

    /// Returns every retained key id for the field, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the vault cannot be read.
    pub fn key_history(&self, field: &FieldRef) -> Result<Vec<KeyId>, Error> {
        Ok(self.vault.list_active(field)?)
    }

    fn load_active(&self, field: &FieldRef) -> Result<KeyId, Error> {
        let latest = self
            .vault
            .list_active(field)?
            .pop()
            .ok_or_else(|| Error::KeyUnavailable {
                field: field.to_string(),
            })?;

        // A concurrent rotation may already have published a newer key.
        self.active.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(field.clone()).or_insert_with(|| latest.clone());
            next
        });
        debug!(field = %field, key_id = %latest, "loaded active key from vault");

        self.active
            .load()
            .get(field)
            .cloned()
            .ok_or_else(|| Error::KeyUnavailable {
                field: field.to_string(),
            })
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("active", &*self.active.load())
            .field("unwrapped", &self.unwrapped.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::LocalKeyProvider;
    use crate::key_vault::MemoryKeyVault;
    use crate::schema::{FieldSchema, RangeDomain};

    fn manager() -> (KeyManager, Arc<MemoryKeyVault>) {
        let provider = LocalKeyProvider::new();
        provider.create_kek().unwrap();
        let vault = Arc::new(MemoryKeyVault::new());
        let shared = Arc::clone(&vault) as Arc<dyn KeyVault>;
        let manager = KeyManager::new(Arc::new(provider), shared);
        (manager, vault)
    }

    fn ssn() -> FieldSchema {
        FieldSchema::equality("accounts", "ssn")
    }

    #[test]
    fn test_active_key_unavailable_before_provisioning() {
        let (manager, _) = manager();
        let result = manager.get_active_key(&ssn());
        assert!(matches!(
            result,
            Err(Error::KeyUnavailable { field }) if field == "accounts.ssn"
        ));
    }

    #[test]
    fn test_rotate_provisions_first_version() {
        let (manager, vault) = manager();
        let dek = manager.rotate_key(&ssn()).unwrap();

        assert_eq!(dek.key_id().to_string(), "accounts.ssn.v1");
        let active = manager.get_active_key(&ssn()).unwrap();
        assert_eq!(active.key_id(), dek.key_id());
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn test_rotate_retains_previous_key() {
        let (manager, _) = manager();
        let v1 = manager.rotate_key(&ssn()).unwrap();
        let v2 = manager.rotate_key(&ssn()).unwrap();

        assert_eq!(v2.key_id().version(), 2);
        let active = manager.get_active_key(&ssn()).unwrap();
        assert_eq!(active.key_id(), v2.key_id());

        let old = manager.get_key(v1.key_id()).unwrap();
        assert_eq!(old.material().expose_secret(), v1.material().expose_secret());
        assert_ne!(v1.material().expose_secret(), v2.material().expose_secret());
    }

    #[test]
    fn test_get_key_unknown() {
        let (manager, _) = manager();
        let key_id = KeyId::new(FieldRef::new("accounts", "ssn"), 4);
        let result = manager.get_key(&key_id);
        assert!(matches!(
            result,
            Err(Error::KeyNotFound { key_id }) if key_id == "accounts.ssn.v4"
        ));
    }

    #[test]
    fn test_active_key_loaded_from_vault_after_restart() {
        let provider: Arc<dyn KeyProvider> = {
            let provider = LocalKeyProvider::new();
            provider.create_kek().unwrap();
            Arc::new(provider)
        };
        let vault: Arc<dyn KeyVault> = Arc::new(MemoryKeyVault::new());

        let first = KeyManager::new(Arc::clone(&provider), Arc::clone(&vault));
        first.rotate_key(&ssn()).unwrap();
        let v2 = first.rotate_key(&ssn()).unwrap();

        let second = KeyManager::new(provider, vault);
        let active = second.get_active_key(&ssn()).unwrap();
        assert_eq!(active.key_id(), v2.key_id());
        assert_eq!(active.material().expose_secret(), v2.material().expose_secret());
    }

    #[test]
    fn test_ensure_key_is_idempotent() {
        let (manager, vault) = manager();
        let first = manager.ensure_key(&ssn()).unwrap();
        assert_eq!(first.unwrap().to_string(), "accounts.ssn.v1");
        assert_eq!(manager.ensure_key(&ssn()).unwrap(), None);
        assert_eq!(vault.len(), 1);

        manager.rotate_key(&ssn()).unwrap();
        assert_eq!(manager.ensure_key(&ssn()).unwrap(), None);
        let active = manager.get_active_key(&ssn()).unwrap();
        assert_eq!(active.key_id().version(), 2);
    }

    #[test]
    fn test_ensure_key_rejects_plaintext_field() {
        let (manager, _) = manager();
        let result = manager.ensure_key(&FieldSchema::plain("accounts", "email"));
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_rotate_plaintext_field_rejected() {
        let (manager, _) = manager();
        let result = manager.rotate_key(&FieldSchema::plain("accounts", "email"));
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_key_slots_are_independent() {
        let (manager, _) = manager();
        let domain = RangeDomain::new(0.0, 100.0, 2).unwrap();
        let balance = FieldSchema::range("accounts", "balance", domain);
        manager.rotate_key(&ssn()).unwrap();
        manager.rotate_key(&ssn()).unwrap();
        let dek = manager.rotate_key(&balance).unwrap();

        assert_eq!(dek.key_id().to_string(), "accounts.balance.v1");
        assert_eq!(manager.key_history(ssn().field_ref()).unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_rotation_and_reads() {
        let (manager, _) = manager();
        let manager = Arc::new(manager);
        manager.rotate_key(&ssn()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        if i == 0 {
                            manager.rotate_key(&ssn()).unwrap();
                        } else {
                            let dek = manager.get_active_key(&ssn()).unwrap();
                            assert!(manager.get_key(dek.key_id()).is_ok());
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = manager.key_history(ssn().field_ref()).unwrap();
        assert_eq!(history.len(), 11);
        let active = manager.get_active_key(&ssn()).unwrap();
        assert_eq!(active.key_id().version(), 11);
    }

    #[test]
    fn test_debug_never_prints_material() {
        let (manager, _) = manager();
        let dek = manager.rotate_key(&ssn()).unwrap();
        let rendered = format!("{dek:?}");
        assert!(rendered.contains("accounts.ssn.v1"));
        assert!(!rendered.contains("material"));
    }
}
